//! Registry of visitors currently active on each website
//!
//! Sessions live in a [`TtlCache`] keyed by session id, so a visitor drops out
//! once no ping arrives within the session timeout. A secondary index maps
//! each website to the ids seen on it; it is pruned by its own background pass
//! because cache eviction alone would leave stale ids behind.

use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;
use tracing::debug;

use crate::cache::TtlCache;
use crate::models::{Session, SessionUpdate};

/// A session with no activity for this long is no longer active
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Interval of both the cache sweep and the index cleanup
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

pub struct SessionTracker {
    sessions: Arc<TtlCache<String, Session>>,
    /// website id -> ids of sessions seen on it
    websites: Arc<DashMap<String, HashSet<String>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl SessionTracker {
    /// Start a tracker with the default timeout and cleanup interval.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new() -> Self {
        Self::with_timeouts(SESSION_TIMEOUT, CLEANUP_INTERVAL)
    }

    pub fn with_timeouts(session_timeout: Duration, cleanup_interval: Duration) -> Self {
        let sessions = Arc::new(TtlCache::new(session_timeout, cleanup_interval));
        let websites: Arc<DashMap<String, HashSet<String>>> = Arc::new(DashMap::new());
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task_sessions = Arc::clone(&sessions);
        let task_websites = Arc::clone(&websites);
        let cleanup_interval = cleanup_interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut interval = time::interval(cleanup_interval);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = prune_index(&task_websites, &task_sessions);
                        if removed > 0 {
                            debug!(removed, websites = task_websites.len(), "pruned stale session ids");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!("session index cleanup stopped");
                            break;
                        }
                    }
                }
            }
        });

        Self {
            sessions,
            websites,
            shutdown_tx,
        }
    }

    /// Insert or overwrite a session and register it under its website.
    ///
    /// Tracking counts as activity, so `last_active_at` is set to now.
    pub fn track_session(&self, mut session: Session) -> String {
        session.last_active_at = Utc::now();
        let id = session.id.clone();
        let website_id = session.website_id.clone();

        // Cache first: the index cleanup must never see an indexed id whose
        // session is not stored yet.
        self.sessions.set(id.clone(), session);
        self.index(&website_id, &id);

        debug!(session_id = %id, website_id = %website_id, "tracking session");
        id
    }

    /// Refresh an existing session. Returns `false` if it is missing or expired;
    /// the caller then decides whether to track it again.
    pub fn update_session(&self, session_id: &str) -> bool {
        self.update_engagement(session_id, SessionUpdate::default())
    }

    /// Refresh an existing session and apply the changes carried by a ping
    pub fn update_engagement(&self, session_id: &str, update: SessionUpdate) -> bool {
        self.refresh(session_id, None, update)
    }

    /// Like [`SessionTracker::update_engagement`], but only for a session
    /// living on `website_id`. A live session on another website is left
    /// alone and `false` is returned so the caller can track it afresh.
    pub fn update_engagement_on(
        &self,
        website_id: &str,
        session_id: &str,
        update: SessionUpdate,
    ) -> bool {
        self.refresh(session_id, Some(website_id), update)
    }

    fn refresh(&self, session_id: &str, on_website: Option<&str>, update: SessionUpdate) -> bool {
        let Some(mut session) = self.sessions.get(session_id) else {
            return false;
        };
        if on_website.is_some_and(|website_id| session.website_id != website_id) {
            return false;
        }

        session.last_active_at = Utc::now();
        if let Some(url) = update.url {
            session.url = url;
        }
        if update.referrer.is_some() {
            session.referrer = update.referrer;
        }
        if update.metrics.is_some() {
            session.metrics = update.metrics;
        }

        let website_id = session.website_id.clone();
        self.sessions.set(session_id.to_string(), session);
        // Re-index in case a cleanup pass ran between the read and the write
        self.index(&website_id, session_id);
        true
    }

    /// Active visitors on a website.
    ///
    /// At least 1 while the website still has an index entry, even if every
    /// session in it has expired but not yet been pruned; 0 once the entry is
    /// gone or was never created.
    pub fn get_active_users(&self, website_id: &str) -> usize {
        let Some(ids) = self.indexed_ids(website_id) else {
            return 0;
        };

        let live = ids
            .iter()
            .filter(|id| self.is_live_on(id, website_id))
            .count();

        live.max(1)
    }

    /// Live sessions on a website, most recently active first
    pub fn get_active_sessions(&self, website_id: &str) -> Vec<Session> {
        let Some(ids) = self.indexed_ids(website_id) else {
            return Vec::new();
        };

        let mut sessions: Vec<Session> = ids
            .iter()
            .filter_map(|id| self.sessions.get(id))
            .filter(|session| session.website_id == website_id)
            .collect();
        sessions.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        sessions
    }

    /// Websites that currently have an index entry
    pub fn website_ids(&self) -> Vec<String> {
        self.websites
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Run one index cleanup pass now, returning the number of ids dropped
    pub fn cleanup(&self) -> usize {
        prune_index(&self.websites, &self.sessions)
    }

    /// Stop the index cleanup and the session cache sweep
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.sessions.shutdown();
    }

    fn index(&self, website_id: &str, session_id: &str) {
        self.websites
            .entry(website_id.to_string())
            .or_default()
            .insert(session_id.to_string());
    }

    /// Snapshot of a website's index so the shard lock is not held while
    /// sessions are checked
    fn indexed_ids(&self, website_id: &str) -> Option<Vec<String>> {
        self.websites
            .get(website_id)
            .map(|ids| ids.iter().cloned().collect())
    }

    fn is_live_on(&self, session_id: &str, website_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .is_some_and(|session| session.website_id == website_id)
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop ids whose session expired (or moved to another website), then drop
/// websites left with no ids
fn prune_index(
    websites: &DashMap<String, HashSet<String>>,
    sessions: &TtlCache<String, Session>,
) -> usize {
    let mut removed = 0;
    websites.retain(|website_id, ids| {
        let before = ids.len();
        ids.retain(|id| {
            sessions
                .get(id)
                .is_some_and(|session| &session.website_id == website_id)
        });
        removed += before - ids.len();
        !ids.is_empty()
    });
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EngagementMetrics;

    fn session(id: &str, website_id: &str) -> Session {
        Session::new(id, website_id, "https://shop.example.com/", "203.0.113.10")
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_returns_id_and_counts_user() {
        let tracker = SessionTracker::new();

        let id = tracker.track_session(session("s-1", "site-1"));

        assert_eq!(id, "s-1");
        assert_eq!(tracker.get_active_users("site-1"), 1);
        assert_eq!(tracker.get_active_sessions("site-1").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_website_has_no_users() {
        let tracker = SessionTracker::new();
        assert_eq!(tracker.get_active_users("nobody"), 0);
        assert!(tracker.get_active_sessions("nobody").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_sessions_are_excluded() {
        let tracker = SessionTracker::new();
        tracker.track_session(session("old", "site-1"));

        time::advance(Duration::from_secs(200)).await;
        tracker.track_session(session("new-1", "site-1"));
        tracker.track_session(session("new-2", "site-1"));
        tracker.track_session(session("new-3", "site-1"));

        time::advance(Duration::from_secs(100)).await;

        // "old" is exactly SESSION_TIMEOUT past its last activity
        assert_eq!(tracker.get_active_users("site-1"), 3);
        let ids: HashSet<String> = tracker
            .get_active_sessions("site-1")
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert!(!ids.contains("old"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_floor_of_one_until_cleanup() {
        let tracker = SessionTracker::new();
        tracker.track_session(session("s-1", "site-1"));

        time::advance(SESSION_TIMEOUT).await;

        assert!(tracker.get_active_sessions("site-1").is_empty());
        assert_eq!(tracker.get_active_users("site-1"), 1, "index entry still present");

        assert_eq!(tracker.cleanup(), 1);
        assert_eq!(tracker.get_active_users("site-1"), 0);
        assert!(tracker.website_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_cleanup_drops_empty_websites() {
        let tracker = SessionTracker::new();
        tracker.track_session(session("s-1", "site-1"));

        // Expires at 300s, next cleanup tick at 360s
        time::sleep(Duration::from_secs(361)).await;

        assert_eq!(tracker.get_active_users("site-1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_refreshes_expiry() {
        let tracker = SessionTracker::new();
        tracker.track_session(session("s-1", "site-1"));

        time::advance(Duration::from_secs(240)).await;
        assert!(tracker.update_session("s-1"));

        time::advance(Duration::from_secs(240)).await;
        assert_eq!(tracker.get_active_sessions("site-1").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_does_not_resurrect() {
        let tracker = SessionTracker::new();
        assert!(!tracker.update_session("never-tracked"));

        tracker.track_session(session("s-1", "site-1"));
        time::advance(SESSION_TIMEOUT).await;

        assert!(!tracker.update_session("s-1"));
        assert!(tracker.get_active_sessions("site-1").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_engagement_applies_changes() {
        let tracker = SessionTracker::new();
        tracker.track_session(session("s-1", "site-1"));

        let metrics = EngagementMetrics {
            scroll_percentage: 75.0,
            time_on_page: 42.0,
            click_count: 2,
        };
        let updated = tracker.update_engagement(
            "s-1",
            SessionUpdate {
                url: Some("https://shop.example.com/cart".to_string()),
                referrer: None,
                metrics: Some(metrics),
            },
        );
        assert!(updated);

        let sessions = tracker.get_active_sessions("site-1");
        assert_eq!(sessions[0].url, "https://shop.example.com/cart");
        assert_eq!(sessions[0].metrics, Some(metrics));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_moved_to_another_website() {
        let tracker = SessionTracker::new();
        tracker.track_session(session("s-1", "site-1"));
        tracker.track_session(session("s-1", "site-2"));

        assert!(tracker.get_active_sessions("site-1").is_empty());
        assert_eq!(tracker.get_active_sessions("site-2").len(), 1);

        tracker.cleanup();
        assert_eq!(tracker.website_ids(), vec!["site-2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_engagement_on_other_website_is_refused() {
        let tracker = SessionTracker::new();
        tracker.track_session(session("c-1", "site-1"));

        assert!(!tracker.update_engagement_on("site-2", "c-1", SessionUpdate::default()));
        assert!(tracker.get_active_sessions("site-2").is_empty());

        assert!(tracker.update_engagement_on("site-1", "c-1", SessionUpdate::default()));

        // Re-tracking under the new website moves the session there
        tracker.track_session(session("c-1", "site-2"));
        assert_eq!(tracker.get_active_users("site-2"), 1);
        assert!(tracker.get_active_sessions("site-1").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_websites_are_isolated() {
        let tracker = SessionTracker::new();
        tracker.track_session(session("a-1", "site-a"));
        tracker.track_session(session("a-2", "site-a"));
        tracker.track_session(session("b-1", "site-b"));

        assert_eq!(tracker.get_active_users("site-a"), 2);
        assert_eq!(tracker.get_active_users("site-b"), 1);
    }
}
