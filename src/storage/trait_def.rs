use crate::models::{CounterField, Metric, Notification, Website, WebsiteStats};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record already exists")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    /// Register a website under a caller-provided id and API key
    async fn create_website(
        &self,
        id: &str,
        name: &str,
        domain: &str,
        api_key: &str,
    ) -> StorageResult<Website>;

    async fn get_website(&self, id: &str) -> Result<Option<Website>>;

    /// Resolve the website owning a public API key
    async fn find_website_by_api_key(&self, api_key: &str) -> Result<Option<Website>>;

    /// Create a notification with zeroed counters
    async fn create_notification(
        &self,
        id: &str,
        website_id: &str,
        message: &str,
    ) -> StorageResult<Notification>;

    async fn get_notification(&self, id: &str) -> Result<Option<Notification>>;

    async fn list_notifications(&self, website_id: &str) -> Result<Vec<Notification>>;

    /// Append a metric row
    async fn insert_metric(&self, metric: &Metric) -> Result<()>;

    /// Whether any impression was already recorded for this notification/session pair
    async fn has_impression(&self, notification_id: &str, session_id: &str) -> Result<bool>;

    /// Add `delta` to one counter in a single UPDATE statement.
    ///
    /// Returns `false` when no notification has that id.
    async fn increment_counter(
        &self,
        notification_id: &str,
        field: CounterField,
        delta: u64,
    ) -> Result<bool>;

    /// Insert or overwrite the stats snapshot for a website
    async fn upsert_website_stats(&self, stats: &WebsiteStats) -> Result<()>;

    async fn get_website_stats(&self, website_id: &str) -> Result<Option<WebsiteStats>>;
}
