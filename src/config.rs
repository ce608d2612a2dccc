//! Adapter configuration

use crate::db::{ConnectionConfig, Connector, MapiConnector, PoolConfig};
use crate::{Error, Result};

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Metrics accepted for writing before any table exists: the adapter's own
/// instrumentation plus `up`.
pub const DEFAULT_METRICS: &[&str] = &[
    "up",
    "monetdb_adapter_http_read_response_size_bytes_bucket",
    "monetdb_adapter_http_read_response_size_bytes_sum",
    "monetdb_adapter_http_read_response_size_bytes_count",
    "monetdb_adapter_http_request_duration_seconds_bucket",
    "monetdb_adapter_http_request_duration_seconds_sum",
    "monetdb_adapter_http_request_duration_seconds_count",
    "monetdb_adapter_http_requests_total",
    "monetdb_adapter_http_write_response_size_bytes_bucket",
    "monetdb_adapter_http_write_response_size_bytes_sum",
    "monetdb_adapter_http_write_response_size_bytes_count",
    "monetdb_adapter_queries_total",
    "monetdb_adapter_query_errors_total",
    "monetdb_adapter_reads_inflight",
    "monetdb_adapter_row_errors_total",
    "monetdb_adapter_rows_inserted_total",
    "monetdb_adapter_rows_read_total",
    "monetdb_adapter_rowscan_errors_total",
    "monetdb_adapter_tables_created_total",
    "monetdb_adapter_writes_inflight",
    "monetdb_adapter_open_connections_total",
];

pub const DEFAULT_ALLOW_PREFIX: &str = "monetdb";

/// Split a comma-separated metric list, ignoring blanks.
pub fn parse_whitelist(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub pool: PoolConfig,
    pub whitelist: Vec<String>,
    /// Metrics with this prefix are always accepted; `None` disables the exception.
    pub allow_prefix: Option<String>,
    pub refresh_interval: Duration,
    pub pool_stats_interval: Duration,
    /// Deadline for one read or write request, database work included
    pub request_timeout: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            whitelist: DEFAULT_METRICS.iter().map(|s| s.to_string()).collect(),
            allow_prefix: Some(DEFAULT_ALLOW_PREFIX.to_string()),
            refresh_interval: Duration::from_secs(30),
            pool_stats_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl AdapterConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("refresh interval", self.refresh_interval),
            ("pool stats interval", self.pool_stats_interval),
            ("request timeout", self.request_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::Config(format!("{} must be greater than zero", name)));
            }
        }
        if self.pool.max_open == 0 {
            return Err(Error::Config(
                "max open connections must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Build the MonetDB connector for a `username:password@hostname:port/database` URL.
pub fn connector_from_url(url: &str) -> Result<Arc<dyn Connector>> {
    let config: ConnectionConfig = url.parse()?;
    info!(
        host = %config.host,
        port = config.port,
        database = %config.database,
        "using MonetDB connector"
    );
    Ok(Arc::new(MapiConnector::new(config)))
}
