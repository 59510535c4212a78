//! HTTP surface over the tracking core

mod error;
pub mod handlers;
pub mod pacer;
pub mod routes;

pub use error::ErrorResponse;
pub use handlers::AppState;
pub use routes::create_api_router;
