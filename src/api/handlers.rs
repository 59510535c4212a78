use axum::{
    extract::{ConnectInfo, FromRequestParts, Path, State},
    http::{header, request::Parts, HeaderMap},
    Json,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::GeoConfig;
use crate::error::{TrackingError, TrackingResult};
use crate::geo::{extract_client_ip, GeoIpService};
use crate::models::{
    EngagementMetrics, Metric, MetricEvent, Session, SessionUpdate, Website, WebsiteStats,
};
use crate::storage::Storage;
use crate::tracking::{EngagementAggregator, MetricRecorder, SessionTracker};

use super::pacer::{RequestPacer, PACER_WINDOW};

pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub tracker: Arc<SessionTracker>,
    pub recorder: Arc<MetricRecorder>,
    pub aggregator: Arc<EngagementAggregator>,
    pub geoip: GeoIpService,
    pub geo_config: GeoConfig,
    pub pacer: RequestPacer,
}

impl AppState {
    /// Must be called within a Tokio runtime
    pub fn new(
        storage: Arc<dyn Storage>,
        tracker: Arc<SessionTracker>,
        recorder: Arc<MetricRecorder>,
        aggregator: Arc<EngagementAggregator>,
        geoip: GeoIpService,
        geo_config: GeoConfig,
    ) -> Self {
        Self {
            storage,
            tracker,
            recorder,
            aggregator,
            geoip,
            geo_config,
            pacer: RequestPacer::new(PACER_WINDOW),
        }
    }
}

/// Client address after proxy header validation. Falls back to loopback when
/// the server was started without connect info.
pub struct ClientIp(pub IpAddr);

impl FromRequestParts<Arc<AppState>> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let socket_ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

        Ok(ClientIp(extract_client_ip(
            &parts.headers,
            socket_ip,
            &state.geo_config,
        )))
    }
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementRequest {
    pub session_id: Option<String>,
    pub client_id: Option<String>,
    pub website_id: Option<String>,
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub referrer: Option<String>,
    pub metrics: Option<EngagementMetrics>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngagementResponse {
    pub success: bool,
    pub active_users: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRequest {
    pub api_key: Option<String>,
    pub website_id: Option<String>,
    pub notification_id: Option<String>,
    pub action: Option<String>,
    pub url: Option<String>,
    pub session_id: Option<String>,
    pub client_id: Option<String>,
    pub referrer: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUsersResponse {
    pub website_id: String,
    pub active_users: usize,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Referrer from the body, else the `Referer` header the browser attaches
fn referrer(payload: Option<String>, headers: &HeaderMap) -> Option<String> {
    non_blank(payload).or_else(|| {
        non_blank(
            headers
                .get(header::REFERER)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string),
        )
    })
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
}

/// Resolve the calling website by API key, or by id when no key is sent
async fn resolve_website(
    storage: &dyn Storage,
    api_key: Option<&str>,
    website_id: Option<&str>,
) -> TrackingResult<Website> {
    let website = match (api_key, website_id) {
        (Some(key), _) => storage.find_website_by_api_key(key).await?,
        (None, Some(id)) => storage.get_website(id).await?,
        (None, None) => {
            return Err(TrackingError::InvalidInput(
                "websiteId or apiKey is required".to_string(),
            ))
        }
    };

    website.ok_or_else(|| TrackingError::NotFound("website".to_string()))
}

/// Engagement ping from the widget script.
///
/// Refreshes the visitor's session, or starts one (with a geo lookup) when it
/// is unknown or has expired.
pub async fn record_engagement(
    State(state): State<Arc<AppState>>,
    ClientIp(client_ip): ClientIp,
    headers: HeaderMap,
    Json(payload): Json<EngagementRequest>,
) -> TrackingResult<Json<EngagementResponse>> {
    let session_id = non_blank(payload.session_id)
        .or_else(|| non_blank(payload.client_id))
        .ok_or_else(|| {
            TrackingError::InvalidInput("sessionId or clientId is required".to_string())
        })?;

    let api_key = non_blank(payload.api_key);
    let website_id = non_blank(payload.website_id);
    let website = resolve_website(
        state.storage.as_ref(),
        api_key.as_deref(),
        website_id.as_deref(),
    )
    .await?;

    let page_referrer = referrer(payload.referrer, &headers);
    let update = SessionUpdate {
        url: payload.url.clone(),
        referrer: page_referrer.clone(),
        metrics: payload.metrics,
    };

    if !state
        .tracker
        .update_engagement_on(&website.id, &session_id, update)
    {
        let mut session = Session::new(
            session_id.as_str(),
            website.id.as_str(),
            payload.url.unwrap_or_default(),
            client_ip.to_string(),
        );
        session.referrer = page_referrer;
        session.user_agent = user_agent(&headers);
        session.location = state.geoip.lookup(client_ip);
        session.metrics = payload.metrics;

        state.tracker.track_session(session);
        debug!(session_id = %session_id, website_id = %website.id, "started session");
    }

    Ok(Json(EngagementResponse {
        success: true,
        active_users: state.tracker.get_active_users(&website.id),
    }))
}

/// Impression or click on a notification
pub async fn track_notification(
    State(state): State<Arc<AppState>>,
    ClientIp(client_ip): ClientIp,
    headers: HeaderMap,
    Json(payload): Json<TrackRequest>,
) -> TrackingResult<Json<Metric>> {
    let api_key = non_blank(payload.api_key);
    let website_id = non_blank(payload.website_id);
    let website = resolve_website(
        state.storage.as_ref(),
        api_key.as_deref(),
        website_id.as_deref(),
    )
    .await?;

    let kind = match payload.action.as_deref() {
        Some(action) => match action.parse() {
            Ok(kind) => Some(kind),
            Err(e) => {
                warn!(website_id = %website.id, error = %e, "rejected tracking event");
                None
            }
        },
        None => None,
    };

    let session_id = non_blank(payload.session_id);
    let client_id = non_blank(payload.client_id);
    let ip_address = client_ip.to_string();

    let pace_key = client_id
        .as_deref()
        .or(session_id.as_deref())
        .unwrap_or(ip_address.as_str())
        .to_string();
    let request_interval = state.pacer.interval_since_last(&pace_key);

    let event = MetricEvent {
        site_id: website.id,
        notification_id: payload.notification_id.unwrap_or_default(),
        kind,
        url: payload.url,
        user_agent: user_agent(&headers),
        ip_address: Some(ip_address),
        referrer: referrer(payload.referrer, &headers),
        session_id,
        client_id,
        request_interval,
    };

    let metric = state.recorder.record_metric(event).await?;
    // Rejected events leave the client's pacing untouched
    state.pacer.touch(&pace_key);
    Ok(Json(metric))
}

pub async fn get_active_users(
    State(state): State<Arc<AppState>>,
    Path(website_id): Path<String>,
) -> Json<ActiveUsersResponse> {
    let active_users = state.tracker.get_active_users(&website_id);
    Json(ActiveUsersResponse {
        website_id,
        active_users,
    })
}

/// Recompute and return the engagement snapshot for a website
pub async fn get_website_stats(
    State(state): State<Arc<AppState>>,
    Path(website_id): Path<String>,
) -> TrackingResult<Json<WebsiteStats>> {
    if state.storage.get_website(&website_id).await?.is_none() {
        return Err(TrackingError::NotFound(format!("website {website_id}")));
    }

    let stats = state.aggregator.compute_stats(&website_id).await?;
    Ok(Json(stats))
}

/// Health check endpoint
pub async fn health_check() -> Json<SuccessResponse> {
    Json(SuccessResponse {
        message: "OK".to_string(),
    })
}
