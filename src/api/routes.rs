use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers::{
    get_active_users, get_website_stats, health_check, record_engagement, track_notification,
    AppState,
};

pub fn create_api_router(state: Arc<AppState>) -> Router {
    // Ingestion is called from the widget on customer sites
    let ingest_routes = Router::new()
        .route("/api/engagement", post(record_engagement))
        .route("/api/track", post(track_notification))
        .layer(CorsLayer::permissive());

    Router::new()
        .route("/health", get(health_check))
        .route("/api/websites/{id}/active-users", get(get_active_users))
        .route("/api/websites/{id}/stats", get(get_website_stats))
        .merge(ingest_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
