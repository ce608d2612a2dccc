//! HTTP surface for Prometheus remote storage
//!
//! - `POST /write`: snappy-compressed protobuf `WriteRequest`
//! - `POST /read`: snappy-compressed protobuf `ReadRequest`, answered in kind
//! - `GET /health`
//!
//! `GET /metrics` is served by a separate router on its own listener.

mod metrics;
pub mod read;
mod telemetry;
pub mod write;

pub use metrics::build_metrics_router;

use crate::adapter::Adapter;
use crate::Error;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Maximum compressed request body size
    pub max_body_size: usize,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            max_body_size: 16 * 1024 * 1024, // 16MB
        }
    }
}

/// Build the HTTP API router
pub fn build_http_router(adapter: Arc<Adapter>, config: &ApiServerConfig) -> Router {
    use axum::middleware;
    use axum::routing::{get, post};
    use tower_http::limit::RequestBodyLimitLayer;

    Router::new()
        .route("/health", get(health_check))
        .route("/write", post(write::handle_write))
        .route("/read", post(read::handle_read))
        .with_state(ApiState { adapter })
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_body_size))
        .layer(middleware::from_fn(telemetry::http_observability_middleware))
}

/// Shared API state
#[derive(Clone)]
pub struct ApiState {
    pub adapter: Arc<Adapter>,
}

async fn health_check() -> &'static str {
    "OK"
}

/// Status for a failed request: caller mistakes are 400, an expired request
/// deadline is 503, everything else is 500.
pub(crate) fn error_status(error: &Error) -> StatusCode {
    match error {
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        Error::Timeout => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Plain-text error response carrying the error message.
pub(crate) fn error_response(route: &'static str, error: Error) -> Response {
    let status = error_status(&error);
    warn!(route, status = status.as_u16(), error = %error, "request failed");
    (status, error.to_string()).into_response()
}
