//! Prometheus remote-read endpoint

use super::{error_response, ApiState};
use crate::remote::{self, ReadRequest};

use axum::extract::State;
use axum::http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

/// POST /read
///
/// Answers with a snappy-compressed protobuf `ReadResponse`, one result per
/// query in request order.
pub async fn handle_read(State(state): State<ApiState>, body: Bytes) -> Response {
    let request: ReadRequest = match remote::decode_snappy(&body) {
        Ok(request) => request,
        Err(e) => return error_response("/read", e),
    };

    let response = match state.adapter.read(&request).await {
        Ok(response) => response,
        Err(e) => return error_response("/read", e),
    };

    match remote::encode_snappy(&response) {
        Ok(body) => (
            [
                (CONTENT_TYPE, "application/x-protobuf"),
                (CONTENT_ENCODING, "snappy"),
            ],
            body,
        )
            .into_response(),
        Err(e) => error_response("/read", e),
    }
}
