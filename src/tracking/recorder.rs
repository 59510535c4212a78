//! Impression and click recording
//!
//! Every event is persisted, bots included. Only human traffic moves the
//! notification counters: clicks always, impressions only the first time a
//! session sees a notification.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::bot::{self, BotSignals};
use crate::cache::{TtlCache, DEFAULT_SWEEP_INTERVAL};
use crate::error::{TrackingError, TrackingResult};
use crate::models::{Metric, MetricEvent, MetricKind, Notification};
use crate::storage::Storage;

/// How long a (notification, session) pair stays in the in-process dedup set.
/// Older pairs fall back to the storage lookup.
pub const DEFAULT_IMPRESSION_DEDUP_TTL: Duration = Duration::from_secs(30 * 60);

type ImpressionKey = (String, String);

pub struct MetricRecorder {
    storage: Arc<dyn Storage>,
    recent_impressions: TtlCache<ImpressionKey, ()>,
}

impl MetricRecorder {
    /// Must be called within a Tokio runtime
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_dedup_ttl(storage, DEFAULT_IMPRESSION_DEDUP_TTL)
    }

    pub fn with_dedup_ttl(storage: Arc<dyn Storage>, dedup_ttl: Duration) -> Self {
        Self {
            storage,
            recent_impressions: TtlCache::new(dedup_ttl, DEFAULT_SWEEP_INTERVAL),
        }
    }

    /// Validate, classify and persist one event, bumping the owning
    /// notification's counter when it counts.
    pub async fn record_metric(&self, event: MetricEvent) -> TrackingResult<Metric> {
        let kind = validate(&event)?;
        let notification = self.resolve_notification(&event).await?;

        let is_bot = bot::is_bot(&BotSignals {
            user_agent: event.user_agent.as_deref(),
            ip: event.ip_address.as_deref(),
            referrer: event.referrer.as_deref(),
            request_interval: event.request_interval,
        });

        let dedup_key = match (kind, event.session_id.as_deref()) {
            (MetricKind::Impression, Some(session_id)) => {
                Some((notification.id.clone(), session_id.to_string()))
            }
            _ => None,
        };
        let is_unique = match &dedup_key {
            Some(key) => self.claim_first_impression(key).await?,
            None => true,
        };

        let metric = Metric {
            site_id: event.site_id,
            notification_id: notification.id,
            kind,
            url: event.url,
            user_agent: event.user_agent,
            ip_address: event.ip_address,
            referrer: event.referrer,
            session_id: event.session_id,
            client_id: event.client_id,
            is_bot,
            is_unique,
            timestamp: Utc::now(),
        };

        if let Err(err) = self.storage.insert_metric(&metric).await {
            // Give the pair back so a retry of this event can still count
            if let (true, Some(key)) = (is_unique, &dedup_key) {
                self.recent_impressions.delete(key);
            }
            return Err(TrackingError::TransientStore(err));
        }

        if !is_bot && (kind == MetricKind::Click || is_unique) {
            let updated = self
                .storage
                .increment_counter(&metric.notification_id, kind.counter_field(), 1)
                .await?;
            if !updated {
                warn!(notification_id = %metric.notification_id, "notification vanished before counter update");
                return Err(TrackingError::NotFound(format!(
                    "notification {}",
                    metric.notification_id
                )));
            }
        }

        debug!(
            notification_id = %metric.notification_id,
            kind = %kind,
            is_bot,
            is_unique,
            "recorded metric"
        );

        Ok(metric)
    }

    async fn resolve_notification(&self, event: &MetricEvent) -> TrackingResult<Notification> {
        let notification = self
            .storage
            .get_notification(&event.notification_id)
            .await?
            .filter(|notification| notification.website_id == event.site_id);

        notification.ok_or_else(|| {
            TrackingError::NotFound(format!(
                "notification {} on website {}",
                event.notification_id, event.site_id
            ))
        })
    }

    /// `true` only for the first impression of this pair. The storage lookup
    /// covers pairs older than the dedup window; the atomic claim settles
    /// concurrent first impressions inside this process.
    async fn claim_first_impression(&self, key: &ImpressionKey) -> TrackingResult<bool> {
        if self.recent_impressions.contains(key) {
            return Ok(false);
        }

        let (notification_id, session_id) = key;
        if self
            .storage
            .has_impression(notification_id, session_id)
            .await?
        {
            self.recent_impressions.set(key.clone(), ());
            return Ok(false);
        }

        Ok(self.recent_impressions.set_if_absent(key.clone(), ()))
    }

    /// Stop the dedup set's background sweep
    pub fn shutdown(&self) {
        self.recent_impressions.shutdown();
    }
}

fn validate(event: &MetricEvent) -> TrackingResult<MetricKind> {
    if event.site_id.trim().is_empty() {
        return Err(TrackingError::InvalidInput("siteId is required".to_string()));
    }
    if event.notification_id.trim().is_empty() {
        return Err(TrackingError::InvalidInput(
            "notificationId is required".to_string(),
        ));
    }
    event.kind.ok_or_else(|| {
        TrackingError::InvalidInput("type must be 'impression' or 'click'".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CounterField, Website, WebsiteStats};
    use crate::storage::{SqliteStorage, StorageResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    async fn setup() -> (Arc<dyn Storage>, MetricRecorder) {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        let storage: Arc<dyn Storage> = Arc::new(storage);
        storage
            .create_website("site-1", "Shop", "shop.example.com", "key-1")
            .await
            .unwrap();
        storage
            .create_notification("n-1", "site-1", "5 people are viewing this")
            .await
            .unwrap();
        let recorder = MetricRecorder::new(Arc::clone(&storage));
        (storage, recorder)
    }

    fn event(kind: MetricKind, session_id: Option<&str>) -> MetricEvent {
        MetricEvent {
            site_id: "site-1".to_string(),
            notification_id: "n-1".to_string(),
            kind: Some(kind),
            url: Some("https://shop.example.com/".to_string()),
            user_agent: Some("Mozilla/5.0 (Macintosh)".to_string()),
            ip_address: Some("203.0.113.20".to_string()),
            session_id: session_id.map(str::to_string),
            ..Default::default()
        }
    }

    async fn counters(storage: &Arc<dyn Storage>) -> (i64, i64) {
        let n = storage.get_notification("n-1").await.unwrap().unwrap();
        (n.impressions, n.clicks)
    }

    #[tokio::test]
    async fn test_duplicate_impression_counted_once() {
        let (storage, recorder) = setup().await;

        let first = recorder
            .record_metric(event(MetricKind::Impression, Some("s-1")))
            .await
            .unwrap();
        let second = recorder
            .record_metric(event(MetricKind::Impression, Some("s-1")))
            .await
            .unwrap();

        assert!(first.is_unique);
        assert!(!second.is_unique);
        assert_eq!(counters(&storage).await, (1, 0));
    }

    #[tokio::test]
    async fn test_prior_impression_in_storage_is_not_unique() {
        let (storage, recorder) = setup().await;
        recorder
            .record_metric(event(MetricKind::Impression, Some("s-1")))
            .await
            .unwrap();

        // A fresh recorder has an empty dedup set and must ask storage
        let restarted = MetricRecorder::new(Arc::clone(&storage));
        let again = restarted
            .record_metric(event(MetricKind::Impression, Some("s-1")))
            .await
            .unwrap();

        assert!(!again.is_unique);
        assert_eq!(counters(&storage).await, (1, 0));
    }

    #[tokio::test]
    async fn test_impressions_from_different_sessions_are_unique() {
        let (storage, recorder) = setup().await;
        for session in ["s-1", "s-2", "s-3"] {
            let metric = recorder
                .record_metric(event(MetricKind::Impression, Some(session)))
                .await
                .unwrap();
            assert!(metric.is_unique);
        }
        assert_eq!(counters(&storage).await, (3, 0));
    }

    #[tokio::test]
    async fn test_impression_without_session_always_counts() {
        let (storage, recorder) = setup().await;
        for _ in 0..2 {
            let metric = recorder
                .record_metric(event(MetricKind::Impression, None))
                .await
                .unwrap();
            assert!(metric.is_unique);
        }
        assert_eq!(counters(&storage).await, (2, 0));
    }

    #[tokio::test]
    async fn test_clicks_always_unique() {
        let (storage, recorder) = setup().await;
        for _ in 0..3 {
            let metric = recorder
                .record_metric(event(MetricKind::Click, Some("s-1")))
                .await
                .unwrap();
            assert!(metric.is_unique);
        }
        assert_eq!(counters(&storage).await, (0, 3));
    }

    #[tokio::test]
    async fn test_bot_impression_recorded_but_not_counted() {
        let (storage, recorder) = setup().await;
        let mut bot_event = event(MetricKind::Impression, Some("s-bot"));
        bot_event.user_agent = Some("Mozilla/5.0 Googlebot/2.1".to_string());

        let metric = recorder.record_metric(bot_event).await.unwrap();

        assert!(metric.is_bot);
        assert!(metric.is_unique);
        assert!(storage.has_impression("n-1", "s-bot").await.unwrap());
        assert_eq!(counters(&storage).await, (0, 0));
    }

    #[tokio::test]
    async fn test_bot_click_not_counted() {
        let (storage, recorder) = setup().await;
        let mut bot_event = event(MetricKind::Click, None);
        bot_event.request_interval = Some(Duration::from_millis(20));

        let metric = recorder.record_metric(bot_event).await.unwrap();

        assert!(metric.is_bot);
        assert_eq!(counters(&storage).await, (0, 0));
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let (_storage, recorder) = setup().await;

        let mut missing_site = event(MetricKind::Click, None);
        missing_site.site_id = String::new();
        assert!(matches!(
            recorder.record_metric(missing_site).await,
            Err(TrackingError::InvalidInput(_))
        ));

        let mut missing_notification = event(MetricKind::Click, None);
        missing_notification.notification_id = " ".to_string();
        assert!(matches!(
            recorder.record_metric(missing_notification).await,
            Err(TrackingError::InvalidInput(_))
        ));

        let mut missing_kind = event(MetricKind::Click, None);
        missing_kind.kind = None;
        assert!(matches!(
            recorder.record_metric(missing_kind).await,
            Err(TrackingError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_or_foreign_notification_is_not_found() {
        let (storage, recorder) = setup().await;

        let mut unknown = event(MetricKind::Click, None);
        unknown.notification_id = "ghost".to_string();
        assert!(matches!(
            recorder.record_metric(unknown).await,
            Err(TrackingError::NotFound(_))
        ));

        let mut foreign = event(MetricKind::Click, None);
        foreign.site_id = "site-2".to_string();
        assert!(matches!(
            recorder.record_metric(foreign).await,
            Err(TrackingError::NotFound(_))
        ));

        assert_eq!(counters(&storage).await, (0, 0));
    }

    /// Delegates to SQLite but can be told to fail metric writes
    struct FlakyStorage {
        inner: Arc<dyn Storage>,
        fail_inserts: AtomicBool,
    }

    #[async_trait]
    impl Storage for FlakyStorage {
        async fn init(&self) -> anyhow::Result<()> {
            self.inner.init().await
        }

        async fn create_website(
            &self,
            id: &str,
            name: &str,
            domain: &str,
            api_key: &str,
        ) -> StorageResult<Website> {
            self.inner.create_website(id, name, domain, api_key).await
        }

        async fn get_website(&self, id: &str) -> anyhow::Result<Option<Website>> {
            self.inner.get_website(id).await
        }

        async fn find_website_by_api_key(&self, api_key: &str) -> anyhow::Result<Option<Website>> {
            self.inner.find_website_by_api_key(api_key).await
        }

        async fn create_notification(
            &self,
            id: &str,
            website_id: &str,
            message: &str,
        ) -> StorageResult<Notification> {
            self.inner.create_notification(id, website_id, message).await
        }

        async fn get_notification(&self, id: &str) -> anyhow::Result<Option<Notification>> {
            self.inner.get_notification(id).await
        }

        async fn list_notifications(&self, website_id: &str) -> anyhow::Result<Vec<Notification>> {
            self.inner.list_notifications(website_id).await
        }

        async fn insert_metric(&self, metric: &Metric) -> anyhow::Result<()> {
            if self.fail_inserts.load(Ordering::SeqCst) {
                anyhow::bail!("database is locked");
            }
            self.inner.insert_metric(metric).await
        }

        async fn has_impression(
            &self,
            notification_id: &str,
            session_id: &str,
        ) -> anyhow::Result<bool> {
            self.inner.has_impression(notification_id, session_id).await
        }

        async fn increment_counter(
            &self,
            notification_id: &str,
            field: CounterField,
            delta: u64,
        ) -> anyhow::Result<bool> {
            self.inner
                .increment_counter(notification_id, field, delta)
                .await
        }

        async fn upsert_website_stats(&self, stats: &WebsiteStats) -> anyhow::Result<()> {
            self.inner.upsert_website_stats(stats).await
        }

        async fn get_website_stats(
            &self,
            website_id: &str,
        ) -> anyhow::Result<Option<WebsiteStats>> {
            self.inner.get_website_stats(website_id).await
        }
    }

    #[tokio::test]
    async fn test_failed_insert_is_transient_and_releases_dedup_claim() {
        let (sqlite, _) = setup().await;
        let flaky = Arc::new(FlakyStorage {
            inner: Arc::clone(&sqlite),
            fail_inserts: AtomicBool::new(true),
        });
        let storage: Arc<dyn Storage> = flaky.clone();
        let recorder = MetricRecorder::new(Arc::clone(&storage));

        let result = recorder
            .record_metric(event(MetricKind::Impression, Some("s-1")))
            .await;
        assert!(matches!(result, Err(TrackingError::TransientStore(_))));

        let result = recorder
            .record_metric(event(MetricKind::Click, Some("s-1")))
            .await;
        assert!(matches!(result, Err(TrackingError::TransientStore(_))));
        assert_eq!(counters(&storage).await, (0, 0));

        // Store recovers: the retried impression still counts
        flaky.fail_inserts.store(false, Ordering::SeqCst);
        let retried = recorder
            .record_metric(event(MetricKind::Impression, Some("s-1")))
            .await
            .unwrap();
        assert!(retried.is_unique);
        assert_eq!(counters(&storage).await, (1, 0));
    }
}
