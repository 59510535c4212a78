#[cfg(test)]
mod tests {
    use crate::models::{CounterField, Metric, MetricKind, WebsiteStats};
    use crate::storage::{SqliteStorage, Storage, StorageError};
    use chrono::{DateTime, Utc};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    async fn setup_sqlite() -> Arc<dyn Storage> {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        Arc::new(storage)
    }

    async fn seed(storage: &Arc<dyn Storage>) {
        storage
            .create_website("site-1", "Shop", "shop.example.com", "key-1")
            .await
            .unwrap();
        storage
            .create_notification("n-1", "site-1", "12 people bought this today")
            .await
            .unwrap();
    }

    fn impression(session_id: &str) -> Metric {
        Metric {
            site_id: "site-1".to_string(),
            notification_id: "n-1".to_string(),
            kind: MetricKind::Impression,
            url: Some("https://shop.example.com/".to_string()),
            user_agent: Some("Mozilla/5.0 (Macintosh)".to_string()),
            ip_address: Some("203.0.113.7".to_string()),
            referrer: None,
            session_id: Some(session_id.to_string()),
            client_id: None,
            is_bot: false,
            is_unique: true,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_website_is_conflict() {
        let storage = setup_sqlite().await;
        seed(&storage).await;

        let duplicate_id = storage
            .create_website("site-1", "Other", "other.example.com", "key-2")
            .await;
        assert!(matches!(duplicate_id, Err(StorageError::Conflict)));

        let duplicate_key = storage
            .create_website("site-2", "Other", "other.example.com", "key-1")
            .await;
        assert!(matches!(duplicate_key, Err(StorageError::Conflict)));
    }

    #[tokio::test]
    async fn test_website_lookups() {
        let storage = setup_sqlite().await;
        seed(&storage).await;

        let by_id = storage.get_website("site-1").await.unwrap().unwrap();
        assert_eq!(by_id.api_key, "key-1");

        let by_key = storage.find_website_by_api_key("key-1").await.unwrap().unwrap();
        assert_eq!(by_key.id, "site-1");

        assert!(storage.find_website_by_api_key("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_increment_counter_targets_one_column() {
        let storage = setup_sqlite().await;
        seed(&storage).await;

        assert!(storage
            .increment_counter("n-1", CounterField::Impressions, 1)
            .await
            .unwrap());
        assert!(storage
            .increment_counter("n-1", CounterField::Impressions, 1)
            .await
            .unwrap());
        assert!(storage
            .increment_counter("n-1", CounterField::Clicks, 3)
            .await
            .unwrap());

        let notification = storage.get_notification("n-1").await.unwrap().unwrap();
        assert_eq!(notification.impressions, 2);
        assert_eq!(notification.clicks, 3);
    }

    #[tokio::test]
    async fn test_increment_unknown_notification() {
        let storage = setup_sqlite().await;
        let updated = storage
            .increment_counter("ghost", CounterField::Clicks, 1)
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn test_has_impression_matches_exact_pair() {
        let storage = setup_sqlite().await;
        seed(&storage).await;

        assert!(!storage.has_impression("n-1", "s-1").await.unwrap());
        storage.insert_metric(&impression("s-1")).await.unwrap();

        assert!(storage.has_impression("n-1", "s-1").await.unwrap());
        assert!(!storage.has_impression("n-1", "s-2").await.unwrap());
        assert!(!storage.has_impression("n-2", "s-1").await.unwrap());

        // Clicks never count as prior impressions
        let mut click = impression("s-3");
        click.kind = MetricKind::Click;
        storage.insert_metric(&click).await.unwrap();
        assert!(!storage.has_impression("n-1", "s-3").await.unwrap());
    }

    #[tokio::test]
    async fn test_website_stats_upsert_overwrites() {
        let storage = setup_sqlite().await;

        let mut by_country = BTreeMap::new();
        by_country.insert("US".to_string(), 2);
        let first = WebsiteStats {
            website_id: "site-1".to_string(),
            active_users: 2,
            avg_scroll_percentage: 40.0,
            avg_time_on_page: 12.5,
            total_clicks: 3,
            users_by_country: by_country,
            users_by_city: BTreeMap::new(),
            updated_at: DateTime::from_timestamp_millis(1_700_000_000_123).unwrap(),
        };
        storage.upsert_website_stats(&first).await.unwrap();
        assert_eq!(
            storage.get_website_stats("site-1").await.unwrap(),
            Some(first.clone())
        );

        let second = WebsiteStats {
            active_users: 0,
            users_by_country: BTreeMap::new(),
            ..first
        };
        storage.upsert_website_stats(&second).await.unwrap();
        assert_eq!(
            storage.get_website_stats("site-1").await.unwrap(),
            Some(second)
        );
    }

    #[tokio::test]
    async fn test_list_notifications_by_website() {
        let storage = setup_sqlite().await;
        seed(&storage).await;
        storage
            .create_notification("n-2", "site-1", "Low stock")
            .await
            .unwrap();
        storage
            .create_notification("n-3", "site-2", "Elsewhere")
            .await
            .unwrap();

        let notifications = storage.list_notifications("site-1").await.unwrap();
        let mut ids: Vec<_> = notifications.into_iter().map(|n| n.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["n-1".to_string(), "n-2".to_string()]);
    }
}
