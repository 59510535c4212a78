//! Row shapes shared by the SQL backends

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::models::WebsiteStats;

#[derive(Debug, FromRow)]
pub(crate) struct WebsiteStatsRow {
    pub website_id: String,
    pub active_users: i64,
    pub avg_scroll_percentage: f64,
    pub avg_time_on_page: f64,
    pub total_clicks: i64,
    pub users_by_country: String,
    pub users_by_city: String,
    pub updated_at: i64,
}

/// Column values for a stats snapshot, ready to bind
pub(crate) struct WebsiteStatsColumns {
    pub active_users: i64,
    pub total_clicks: i64,
    pub users_by_country: String,
    pub users_by_city: String,
    pub updated_at: i64,
}

impl WebsiteStatsColumns {
    pub fn from_stats(stats: &WebsiteStats) -> Result<Self> {
        Ok(Self {
            active_users: i64::try_from(stats.active_users)?,
            total_clicks: i64::try_from(stats.total_clicks)?,
            users_by_country: serde_json::to_string(&stats.users_by_country)?,
            users_by_city: serde_json::to_string(&stats.users_by_city)?,
            updated_at: stats.updated_at.timestamp_millis(),
        })
    }
}

impl TryFrom<WebsiteStatsRow> for WebsiteStats {
    type Error = anyhow::Error;

    fn try_from(row: WebsiteStatsRow) -> Result<Self> {
        Ok(WebsiteStats {
            active_users: u64::try_from(row.active_users)?,
            avg_scroll_percentage: row.avg_scroll_percentage,
            avg_time_on_page: row.avg_time_on_page,
            total_clicks: u64::try_from(row.total_clicks)?,
            users_by_country: serde_json::from_str(&row.users_by_country)
                .context("corrupt users_by_country column")?,
            users_by_city: serde_json::from_str(&row.users_by_city)
                .context("corrupt users_by_city column")?,
            updated_at: millis_to_datetime(row.updated_at)?,
            website_id: row.website_id,
        })
    }
}

pub(crate) fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .with_context(|| format!("timestamp {millis} out of range"))
}

pub(crate) fn unix_now() -> i64 {
    Utc::now().timestamp()
}
