use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::TrackingError;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for TrackingError {
    fn into_response(self) -> Response {
        let status = match &self {
            TrackingError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            TrackingError::NotFound(_) => StatusCode::NOT_FOUND,
            TrackingError::TransientStore(e) => {
                tracing::error!(error = %e, "storage failure while handling request");
                StatusCode::SERVICE_UNAVAILABLE
            }
        };

        let error = match &self {
            TrackingError::TransientStore(_) => "Storage temporarily unavailable".to_string(),
            other => other.to_string(),
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}
