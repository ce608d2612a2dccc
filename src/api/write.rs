//! Prometheus remote-write receiver

use super::{error_response, ApiState};
use crate::remote::{self, WriteRequest};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::debug;

/// POST /write
/// Content-Encoding: snappy
/// Content-Type: application/x-protobuf
pub async fn handle_write(State(state): State<ApiState>, body: Bytes) -> Response {
    let request: WriteRequest = match remote::decode_snappy(&body) {
        Ok(request) => request,
        Err(e) => return error_response("/write", e),
    };

    match state.adapter.ingest(&request).await {
        Ok(inserted) => {
            debug!(series = request.timeseries.len(), inserted, "write handled");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => error_response("/write", e),
    }
}
