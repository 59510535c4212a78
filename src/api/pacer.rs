use std::time::Duration;
use tokio::time::Instant;

use crate::cache::{TtlCache, DEFAULT_SWEEP_INTERVAL};

/// Gaps longer than this are treated as a fresh visit
pub const PACER_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Remembers when each client last hit the tracking endpoint so the bot
/// classifier can see request rates
pub struct RequestPacer {
    last_seen: TtlCache<String, Instant>,
}

impl RequestPacer {
    pub fn new(window: Duration) -> Self {
        Self {
            last_seen: TtlCache::new(window, DEFAULT_SWEEP_INTERVAL),
        }
    }

    /// Time since `client`'s last accepted request, if that is still
    /// remembered. Does not record anything.
    pub fn interval_since_last(&self, client: &str) -> Option<Duration> {
        self.last_seen
            .get(client)
            .map(|at| Instant::now().saturating_duration_since(at))
    }

    /// Record an accepted request from `client`
    pub fn touch(&self, client: &str) {
        self.last_seen.set(client.to_string(), Instant::now());
    }

    pub fn shutdown(&self) {
        self.last_seen.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time;

    #[tokio::test(start_paused = true)]
    async fn test_first_request_has_no_interval() {
        let pacer = RequestPacer::new(PACER_WINDOW);
        assert_eq!(pacer.interval_since_last("client-a"), None);
        pacer.touch("client-a");
        assert_eq!(pacer.interval_since_last("client-b"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_between_requests() {
        let pacer = RequestPacer::new(PACER_WINDOW);
        pacer.touch("client-a");

        time::advance(Duration::from_millis(50)).await;
        assert_eq!(
            pacer.interval_since_last("client-a"),
            Some(Duration::from_millis(50))
        );
        pacer.touch("client-a");

        time::advance(Duration::from_secs(2)).await;
        assert_eq!(pacer.interval_since_last("client-a"), Some(Duration::from_secs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reading_does_not_restart_the_clock() {
        let pacer = RequestPacer::new(PACER_WINDOW);
        pacer.touch("client-a");

        time::advance(Duration::from_secs(1)).await;
        pacer.interval_since_last("client-a");
        time::advance(Duration::from_secs(1)).await;

        assert_eq!(pacer.interval_since_last("client-a"), Some(Duration::from_secs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forgets_clients_after_window() {
        let pacer = RequestPacer::new(Duration::from_secs(10));
        pacer.touch("client-a");

        time::advance(Duration::from_secs(11)).await;
        assert_eq!(pacer.interval_since_last("client-a"), None);
    }
}
