use crate::models::{CounterField, Metric, Notification, Website, WebsiteStats};
use crate::storage::{Storage, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Storage wrapper caching website identity lookups.
///
/// Ingestion resolves an API key or website id on every request, and website
/// rows never change after creation, so those reads are served from a Moka
/// cache. Only hits are cached so a newly created website is visible at once.
/// Counters, metrics and stats always go straight to the inner storage: the
/// counter increment has to stay a single atomic statement there.
pub struct CachedStorage {
    /// Underlying storage implementation
    inner: Arc<dyn Storage>,
    /// Websites keyed by id
    website_cache: Cache<String, Website>,
    /// Websites keyed by API key
    api_key_cache: Cache<String, Website>,
}

impl CachedStorage {
    pub fn new(inner: Arc<dyn Storage>, max_cache_entries: u64, ttl_secs: u64) -> Self {
        let website_cache = Cache::builder()
            .max_capacity(max_cache_entries)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();
        let api_key_cache = Cache::builder()
            .max_capacity(max_cache_entries)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self {
            inner,
            website_cache,
            api_key_cache,
        }
    }

    async fn remember(&self, website: &Website) {
        self.website_cache
            .insert(website.id.clone(), website.clone())
            .await;
        self.api_key_cache
            .insert(website.api_key.clone(), website.clone())
            .await;
    }
}

#[async_trait]
impl Storage for CachedStorage {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn create_website(
        &self,
        id: &str,
        name: &str,
        domain: &str,
        api_key: &str,
    ) -> StorageResult<Website> {
        let website = self
            .inner
            .create_website(id, name, domain, api_key)
            .await?;

        self.remember(&website).await;

        Ok(website)
    }

    async fn get_website(&self, id: &str) -> Result<Option<Website>> {
        if let Some(cached) = self.website_cache.get(id).await {
            return Ok(Some(cached));
        }

        let website = self.inner.get_website(id).await?;
        if let Some(ref website) = website {
            self.remember(website).await;
        }

        Ok(website)
    }

    async fn find_website_by_api_key(&self, api_key: &str) -> Result<Option<Website>> {
        if let Some(cached) = self.api_key_cache.get(api_key).await {
            return Ok(Some(cached));
        }

        let website = self.inner.find_website_by_api_key(api_key).await?;
        if let Some(ref website) = website {
            self.remember(website).await;
        }

        Ok(website)
    }

    async fn create_notification(
        &self,
        id: &str,
        website_id: &str,
        message: &str,
    ) -> StorageResult<Notification> {
        self.inner.create_notification(id, website_id, message).await
    }

    async fn get_notification(&self, id: &str) -> Result<Option<Notification>> {
        self.inner.get_notification(id).await
    }

    async fn list_notifications(&self, website_id: &str) -> Result<Vec<Notification>> {
        self.inner.list_notifications(website_id).await
    }

    async fn insert_metric(&self, metric: &Metric) -> Result<()> {
        self.inner.insert_metric(metric).await
    }

    async fn has_impression(&self, notification_id: &str, session_id: &str) -> Result<bool> {
        self.inner.has_impression(notification_id, session_id).await
    }

    async fn increment_counter(
        &self,
        notification_id: &str,
        field: CounterField,
        delta: u64,
    ) -> Result<bool> {
        self.inner
            .increment_counter(notification_id, field, delta)
            .await
    }

    async fn upsert_website_stats(&self, stats: &WebsiteStats) -> Result<()> {
        self.inner.upsert_website_stats(stats).await
    }

    async fn get_website_stats(&self, website_id: &str) -> Result<Option<WebsiteStats>> {
        self.inner.get_website_stats(website_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    async fn setup() -> (Arc<dyn Storage>, CachedStorage) {
        let inner = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        inner.init().await.unwrap();
        let inner: Arc<dyn Storage> = Arc::new(inner);
        let cached = CachedStorage::new(Arc::clone(&inner), 100, 300);
        (inner, cached)
    }

    #[tokio::test]
    async fn test_lookup_by_api_key_is_cached() {
        let (inner, cached) = setup().await;
        inner
            .create_website("site-1", "Shop", "shop.example.com", "key-1")
            .await
            .unwrap();

        let first = cached.find_website_by_api_key("key-1").await.unwrap();
        assert_eq!(first.map(|w| w.id), Some("site-1".to_string()));

        // Served from the cache by id as well, since both keys are filled together
        assert!(cached.website_cache.get("site-1").await.is_some());
        assert!(cached.api_key_cache.get("key-1").await.is_some());
    }

    #[tokio::test]
    async fn test_misses_are_not_cached() {
        let (inner, cached) = setup().await;

        assert!(cached.get_website("late").await.unwrap().is_none());

        inner
            .create_website("late", "Late", "late.example.com", "key-late")
            .await
            .unwrap();

        assert!(cached.get_website("late").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_counters_bypass_cache() {
        let (inner, cached) = setup().await;
        inner
            .create_website("site-1", "Shop", "shop.example.com", "key-1")
            .await
            .unwrap();
        cached
            .create_notification("n-1", "site-1", "Someone just bought this")
            .await
            .unwrap();

        assert!(cached
            .increment_counter("n-1", CounterField::Clicks, 2)
            .await
            .unwrap());

        let notification = inner.get_notification("n-1").await.unwrap().unwrap();
        assert_eq!(notification.clicks, 2);
        assert_eq!(notification.impressions, 0);
    }
}
