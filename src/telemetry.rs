//! Logging and metrics bootstrap for the adapter binary.
//!
//! Logs are JSON lines from a `tracing` subscriber. Metrics go through the
//! global OpenTelemetry meter provider, whose reader is a Prometheus exporter
//! backed by a `prometheus::Registry` that the binary serves at `/metrics`.
//! The resource is built from `OTEL_SERVICE_NAME` and
//! `OTEL_RESOURCE_ATTRIBUTES`.

use crate::{Error, Result};

use opentelemetry::global;
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::Resource;
use prometheus::{Registry, TextEncoder};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const SERVICE_NAMESPACE: &str = "monet-adapter";

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub resource_attributes: Vec<KeyValue>,
}

impl TelemetryConfig {
    pub fn from_env(default_service_name: &str) -> Result<Self> {
        let service_name = std::env::var("OTEL_SERVICE_NAME")
            .unwrap_or_else(|_| default_service_name.to_string());
        let raw = std::env::var("OTEL_RESOURCE_ATTRIBUTES").unwrap_or_default();
        Self::build(&service_name, &raw)
    }

    fn build(service_name: &str, raw_attributes: &str) -> Result<Self> {
        let service_name = service_name.trim();
        if service_name.is_empty() {
            return Err(Error::Config("OTEL_SERVICE_NAME cannot be empty".to_string()));
        }

        // Later entries win; the service name always comes from the dedicated variable.
        let mut attributes: BTreeMap<String, String> = [
            ("service.namespace", SERVICE_NAMESPACE),
            ("db.system", "monetdb"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        attributes.extend(parse_resource_attributes(raw_attributes)?);
        attributes.insert("service.name".to_string(), service_name.to_string());

        Ok(Self {
            service_name: service_name.to_string(),
            resource_attributes: attributes
                .into_iter()
                .map(|(k, v)| KeyValue::new(k, v))
                .collect(),
        })
    }
}

/// Meter provider whose instruments are collected into `registry` on scrape.
pub fn prometheus_meter_provider(
    resource_attributes: Vec<KeyValue>,
) -> Result<(SdkMeterProvider, Registry)> {
    let registry = Registry::new();
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()
        .map_err(|e| Error::Config(format!("prometheus exporter: {e}")))?;
    let provider = SdkMeterProvider::builder()
        .with_reader(exporter)
        .with_resource(Resource::new(resource_attributes))
        .build();
    Ok((provider, registry))
}

/// Render every metric in `registry` in the Prometheus text format.
pub fn render_metrics(registry: &Registry) -> Result<String> {
    TextEncoder::new()
        .encode_to_string(&registry.gather())
        .map_err(|e| Error::Internal(format!("encode metrics: {e}")))
}

/// Owns the meter provider; dropping it flushes and shuts metrics down.
pub struct Telemetry {
    config: TelemetryConfig,
    meter_provider: SdkMeterProvider,
    registry: Registry,
}

impl Telemetry {
    pub fn init(default_service_name: &str, log_level: &str) -> Result<Self> {
        let config = TelemetryConfig::from_env(default_service_name)?;
        let level = parse_log_level(log_level)?;

        FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .with_thread_ids(true)
            .json()
            .try_init()
            .map_err(|e| Error::Config(format!("log subscriber: {e}")))?;

        let (meter_provider, registry) =
            prometheus_meter_provider(config.resource_attributes.clone())?;
        global::set_meter_provider(meter_provider.clone());

        info!(service_name = %config.service_name, %level, "telemetry ready");
        Ok(Self {
            config,
            meter_provider,
            registry,
        })
    }

    /// Registry scraped by the `/metrics` endpoint.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Err(e) = self.meter_provider.shutdown() {
            eprintln!("meter provider shutdown failed: {e}");
        }
    }
}

pub fn parse_log_level(raw: &str) -> Result<Level> {
    Level::from_str(raw.trim())
        .map_err(|_| Error::Config(format!("invalid log level '{}'", raw.trim())))
}

/// `key=value` pairs separated by commas; blank entries are skipped.
fn parse_resource_attributes(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(Error::Config(format!(
                "OTEL_RESOURCE_ATTRIBUTES entry '{entry}' is not key=value"
            ))),
        })
        .collect()
}
