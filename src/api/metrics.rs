//! Prometheus scrape endpoint for the adapter's own instruments

use crate::telemetry::render_metrics;

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::Registry;
use tracing::warn;

/// Router serving `GET /metrics` from `registry`, meant for its own listener.
pub fn build_metrics_router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(handle_metrics))
        .with_state(registry)
}

async fn handle_metrics(State(registry): State<Registry>) -> Response {
    match render_metrics(&registry) {
        Ok(body) => ([(CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            warn!(error = %e, "metrics scrape failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
