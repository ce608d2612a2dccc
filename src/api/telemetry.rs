//! HTTP request instrumentation.

use axum::extract::MatchedPath;
use axum::http::{header, HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, UpDownCounter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{info_span, Instrument};

struct HttpInstruments {
    requests: Counter<u64>,
    duration_seconds: Histogram<f64>,
    errors: Counter<u64>,
    request_bytes: Histogram<u64>,
    response_bytes: Histogram<u64>,
    in_flight: UpDownCounter<i64>,
}

fn http_instruments() -> &'static HttpInstruments {
    static INSTRUMENTS: OnceLock<HttpInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("monet_adapter.http");
        HttpInstruments {
            requests: meter
                .u64_counter("monet_adapter.http.requests")
                .with_description("Remote storage requests served")
                .init(),
            duration_seconds: meter
                .f64_histogram("monet_adapter.http.request.duration")
                .with_description("Time from request receipt to response")
                .with_unit("s")
                .init(),
            errors: meter
                .u64_counter("monet_adapter.http.request.errors")
                .with_description("Requests answered with a 4xx or 5xx status")
                .init(),
            request_bytes: meter
                .u64_histogram("monet_adapter.http.request.size")
                .with_description("Compressed request body size")
                .with_unit("By")
                .init(),
            response_bytes: meter
                .u64_histogram("monet_adapter.http.response.size")
                .with_description("Compressed response body size")
                .with_unit("By")
                .init(),
            in_flight: meter
                .i64_up_down_counter("monet_adapter.http.requests.in_flight")
                .with_description("Requests currently being served")
                .init(),
        }
    })
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

/// Holds one unit of the in-flight gauge; released even if the client goes away.
struct InFlight {
    route: [KeyValue; 1],
}

impl InFlight {
    fn enter(route: &str) -> Self {
        let route = [KeyValue::new("http.route", route.to_string())];
        http_instruments().in_flight.add(1, &route);
        Self { route }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        http_instruments().in_flight.add(-1, &self.route);
    }
}

pub async fn http_observability_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().as_str().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| req.uri().path().to_string(), |m| m.as_str().to_string());
    let request_size = content_length(req.headers());

    let instruments = http_instruments();
    let _in_flight = InFlight::enter(&route);
    let span = info_span!(
        "http.request",
        otel.kind = "server",
        http.request.method = %method,
        http.route = %route
    );
    let response = next.run(req).instrument(span).await;

    let status = response.status();
    let attrs = [
        KeyValue::new("http.request.method", method),
        KeyValue::new("http.route", route),
        KeyValue::new("http.response.status_code", status.as_u16() as i64),
    ];
    instruments.requests.add(1, &attrs);
    instruments
        .duration_seconds
        .record(start.elapsed().as_secs_f64(), &attrs);
    if let Some(size) = request_size {
        instruments.request_bytes.record(size, &attrs);
    }
    if let Some(size) = content_length(response.headers()) {
        instruments.response_bytes.record(size, &attrs);
    }
    if status.is_client_error() || status.is_server_error() {
        instruments.errors.add(1, &attrs);
    }

    response
}
