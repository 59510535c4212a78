use crate::models::{CounterField, Metric, Notification, Website, WebsiteStats};
use crate::storage::rows::{unix_now, WebsiteStatsColumns, WebsiteStatsRow};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS websites (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                domain TEXT NOT NULL,
                api_key TEXT NOT NULL UNIQUE,
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                website_id TEXT NOT NULL,
                message TEXT NOT NULL,
                impressions BIGINT NOT NULL DEFAULT 0,
                clicks BIGINT NOT NULL DEFAULT 0,
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_notifications_website ON notifications(website_id)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metrics (
                id BIGSERIAL PRIMARY KEY,
                site_id TEXT NOT NULL,
                notification_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                url TEXT,
                user_agent TEXT,
                ip_address TEXT,
                referrer TEXT,
                session_id TEXT,
                client_id TEXT,
                is_bot BOOLEAN NOT NULL,
                is_unique BOOLEAN NOT NULL,
                timestamp BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_metrics_dedup ON metrics(notification_id, session_id, kind)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS website_stats (
                website_id TEXT PRIMARY KEY,
                active_users BIGINT NOT NULL,
                avg_scroll_percentage DOUBLE PRECISION NOT NULL,
                avg_time_on_page DOUBLE PRECISION NOT NULL,
                total_clicks BIGINT NOT NULL,
                users_by_country TEXT NOT NULL,
                users_by_city TEXT NOT NULL,
                updated_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn create_website(
        &self,
        id: &str,
        name: &str,
        domain: &str,
        api_key: &str,
    ) -> StorageResult<Website> {
        let website = sqlx::query_as::<_, Website>(
            r#"
            INSERT INTO websites (id, name, domain, api_key, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT DO NOTHING
            RETURNING id, name, domain, api_key, created_at
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(domain)
        .bind(api_key)
        .bind(unix_now())
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        website.ok_or(StorageError::Conflict)
    }

    async fn get_website(&self, id: &str) -> Result<Option<Website>> {
        let website = sqlx::query_as::<_, Website>(
            "SELECT id, name, domain, api_key, created_at FROM websites WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(website)
    }

    async fn find_website_by_api_key(&self, api_key: &str) -> Result<Option<Website>> {
        let website = sqlx::query_as::<_, Website>(
            "SELECT id, name, domain, api_key, created_at FROM websites WHERE api_key = $1",
        )
        .bind(api_key)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(website)
    }

    async fn create_notification(
        &self,
        id: &str,
        website_id: &str,
        message: &str,
    ) -> StorageResult<Notification> {
        let notification = sqlx::query_as::<_, Notification>(
            r#"
            INSERT INTO notifications (id, website_id, message, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            RETURNING id, website_id, message, impressions, clicks, created_at
            "#,
        )
        .bind(id)
        .bind(website_id)
        .bind(message)
        .bind(unix_now())
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        notification.ok_or(StorageError::Conflict)
    }

    async fn get_notification(&self, id: &str) -> Result<Option<Notification>> {
        let notification = sqlx::query_as::<_, Notification>(
            r#"
            SELECT id, website_id, message, impressions, clicks, created_at
            FROM notifications
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(notification)
    }

    async fn list_notifications(&self, website_id: &str) -> Result<Vec<Notification>> {
        let notifications = sqlx::query_as::<_, Notification>(
            r#"
            SELECT id, website_id, message, impressions, clicks, created_at
            FROM notifications
            WHERE website_id = $1
            ORDER BY created_at DESC, id
            "#,
        )
        .bind(website_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(notifications)
    }

    async fn insert_metric(&self, metric: &Metric) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO metrics (
                site_id, notification_id, kind, url, user_agent, ip_address,
                referrer, session_id, client_id, is_bot, is_unique, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&metric.site_id)
        .bind(&metric.notification_id)
        .bind(metric.kind.as_str())
        .bind(&metric.url)
        .bind(&metric.user_agent)
        .bind(&metric.ip_address)
        .bind(&metric.referrer)
        .bind(&metric.session_id)
        .bind(&metric.client_id)
        .bind(metric.is_bot)
        .bind(metric.is_unique)
        .bind(metric.timestamp.timestamp_millis())
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn has_impression(&self, notification_id: &str, session_id: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM metrics
                WHERE notification_id = $1 AND session_id = $2 AND kind = 'impression'
            )
            "#,
        )
        .bind(notification_id)
        .bind(session_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(exists)
    }

    async fn increment_counter(
        &self,
        notification_id: &str,
        field: CounterField,
        delta: u64,
    ) -> Result<bool> {
        let column = field.column();
        let statement = format!("UPDATE notifications SET {column} = {column} + $1 WHERE id = $2");

        let result = sqlx::query(&statement)
            .bind(i64::try_from(delta)?)
            .bind(notification_id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_website_stats(&self, stats: &WebsiteStats) -> Result<()> {
        let columns = WebsiteStatsColumns::from_stats(stats)?;

        sqlx::query(
            r#"
            INSERT INTO website_stats (
                website_id, active_users, avg_scroll_percentage, avg_time_on_page,
                total_clicks, users_by_country, users_by_city, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (website_id) DO UPDATE SET
                active_users = EXCLUDED.active_users,
                avg_scroll_percentage = EXCLUDED.avg_scroll_percentage,
                avg_time_on_page = EXCLUDED.avg_time_on_page,
                total_clicks = EXCLUDED.total_clicks,
                users_by_country = EXCLUDED.users_by_country,
                users_by_city = EXCLUDED.users_by_city,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&stats.website_id)
        .bind(columns.active_users)
        .bind(stats.avg_scroll_percentage)
        .bind(stats.avg_time_on_page)
        .bind(columns.total_clicks)
        .bind(&columns.users_by_country)
        .bind(&columns.users_by_city)
        .bind(columns.updated_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn get_website_stats(&self, website_id: &str) -> Result<Option<WebsiteStats>> {
        let row = sqlx::query_as::<_, WebsiteStatsRow>(
            r#"
            SELECT website_id, active_users, avg_scroll_percentage, avg_time_on_page,
                   total_clicks, users_by_country, users_by_city, updated_at
            FROM website_stats
            WHERE website_id = $1
            "#,
        )
        .bind(website_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(WebsiteStats::try_from).transpose()
    }
}
