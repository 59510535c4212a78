use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Geographic location resolved from a visitor's IP address
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub country: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Engagement figures reported by the widget script for a page view
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngagementMetrics {
    /// How far down the page the visitor scrolled, 0-100
    pub scroll_percentage: f64,
    /// Seconds spent on the page
    pub time_on_page: f64,
    pub click_count: u64,
}

/// A visitor currently engaged with a website
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub website_id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<EngagementMetrics>,
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        website_id: impl Into<String>,
        url: impl Into<String>,
        ip_address: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            website_id: website_id.into(),
            url: url.into(),
            referrer: None,
            ip_address: ip_address.into(),
            user_agent: None,
            location: None,
            metrics: None,
            last_active_at: Utc::now(),
        }
    }
}

/// Changes carried by an engagement ping for an existing session
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub url: Option<String>,
    pub referrer: Option<String>,
    pub metrics: Option<EngagementMetrics>,
}
