use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Kind of interaction recorded against a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Impression,
    Click,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Impression => "impression",
            MetricKind::Click => "click",
        }
    }

    /// Notification counter bumped by this kind of metric
    pub fn counter_field(&self) -> CounterField {
        match self {
            MetricKind::Impression => CounterField::Impressions,
            MetricKind::Click => CounterField::Clicks,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "impression" => Ok(MetricKind::Impression),
            "click" => Ok(MetricKind::Click),
            other => Err(format!("unknown metric type '{other}'")),
        }
    }
}

/// Counter columns on a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterField {
    Impressions,
    Clicks,
}

impl CounterField {
    /// Column name in the notifications table
    pub fn column(&self) -> &'static str {
        match self {
            CounterField::Impressions => "impressions",
            CounterField::Clicks => "clicks",
        }
    }
}

/// Incoming impression/click event, before validation
#[derive(Debug, Clone, Default)]
pub struct MetricEvent {
    pub site_id: String,
    pub notification_id: String,
    /// `None` when the caller sent no type or one we do not recognise
    pub kind: Option<MetricKind>,
    pub url: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub referrer: Option<String>,
    pub session_id: Option<String>,
    pub client_id: Option<String>,
    /// Time since the same client's previous request, if it made one
    pub request_interval: Option<Duration>,
}

/// A recorded impression or click. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub site_id: String,
    pub notification_id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    pub url: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub referrer: Option<String>,
    pub session_id: Option<String>,
    pub client_id: Option<String>,
    pub is_bot: bool,
    pub is_unique: bool,
    pub timestamp: DateTime<Utc>,
}

/// Per-website engagement snapshot, recomputed wholesale on every pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsiteStats {
    pub website_id: String,
    pub active_users: u64,
    pub avg_scroll_percentage: f64,
    pub avg_time_on_page: f64,
    pub total_clicks: u64,
    pub users_by_country: BTreeMap<String, u64>,
    pub users_by_city: BTreeMap<String, u64>,
    pub updated_at: DateTime<Utc>,
}
