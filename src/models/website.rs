use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Website {
    pub id: String,
    pub name: String,
    pub domain: String,
    pub api_key: String,
    pub created_at: i64,
}

/// A social-proof notification and its engagement counters
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub website_id: String,
    pub message: String,
    pub impressions: i64,
    pub clicks: i64,
    pub created_at: i64,
}
