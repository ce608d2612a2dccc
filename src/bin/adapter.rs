//! MonetDB remote storage adapter for Prometheus.

use monet_adapter::api::{self, ApiServerConfig};
use monet_adapter::config::{self, AdapterConfig, DEFAULT_METRICS};
use monet_adapter::db::PoolConfig;
use monet_adapter::telemetry::Telemetry;
use monet_adapter::{Adapter, Error};

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// MonetDB connection, username:password@hostname:port/database
    #[arg(long, env = "MONETDB_URL", default_value = "monetdb:monetdb@monetdb:50000/db")]
    db_url: String,

    /// HTTP listen address
    #[arg(long, env = "ADAPTER_LISTEN", default_value = "0.0.0.0:1234")]
    listen: SocketAddr,

    /// Listen address for the Prometheus `/metrics` endpoint
    #[arg(long, env = "ADAPTER_METRICS_LISTEN", default_value = "0.0.0.0:8080")]
    metrics_listen: SocketAddr,

    /// Comma-separated metric names accepted before their table exists
    #[arg(long, env = "ADAPTER_WHITELIST")]
    whitelist: Option<String>,

    /// Metric name prefix that is always accepted; empty disables it
    #[arg(long, env = "ADAPTER_ALLOW_PREFIX", default_value = config::DEFAULT_ALLOW_PREFIX)]
    allow_prefix: String,

    /// Catalog refresh interval in seconds
    #[arg(long, default_value = "30")]
    refresh_interval_secs: u64,

    /// Pool statistics sampling interval in seconds
    #[arg(long, default_value = "5")]
    pool_stats_interval_secs: u64,

    #[arg(long, env = "MONETDB_MAX_OPEN_CONNECTIONS", default_value = "32")]
    max_open_connections: usize,

    #[arg(long, env = "MONETDB_MAX_IDLE_CONNECTIONS", default_value = "16")]
    max_idle_connections: usize,

    /// Rows fetched per result block
    #[arg(long, default_value = "100")]
    reply_size: usize,

    /// Deadline for one read or write request in seconds
    #[arg(long, default_value = "60")]
    request_timeout_secs: u64,

    /// Maximum compressed request body in bytes (default: 16MB)
    #[arg(long, default_value = "16777216")]
    max_body_size: usize,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let telemetry = Telemetry::init("monet-adapter", &args.log_level)?;

    info!("Starting MonetDB adapter");

    let whitelist = match &args.whitelist {
        Some(raw) => config::parse_whitelist(raw),
        None => DEFAULT_METRICS.iter().map(|s| s.to_string()).collect(),
    };
    let adapter_config = AdapterConfig {
        pool: PoolConfig {
            max_open: args.max_open_connections,
            max_idle: args.max_idle_connections,
            reply_size: args.reply_size,
        },
        whitelist,
        allow_prefix: Some(args.allow_prefix.clone()).filter(|p| !p.is_empty()),
        refresh_interval: Duration::from_secs(args.refresh_interval_secs),
        pool_stats_interval: Duration::from_secs(args.pool_stats_interval_secs),
        request_timeout: Duration::from_secs(args.request_timeout_secs),
    };

    info!(
        whitelist = adapter_config.whitelist.len(),
        allow_prefix = %args.allow_prefix,
        max_open_connections = adapter_config.pool.max_open,
        max_idle_connections = adapter_config.pool.max_idle,
        "adapter configuration"
    );

    let connector = config::connector_from_url(&args.db_url)?;
    let adapter = Arc::new(Adapter::start(adapter_config, connector).await?);

    let router = api::build_http_router(
        adapter.clone(),
        &ApiServerConfig {
            max_body_size: args.max_body_size,
        },
    );

    let metrics_listener = TcpListener::bind(args.metrics_listen).await?;
    let metrics_router = api::build_metrics_router(telemetry.registry().clone());
    let metrics_shutdown = adapter.shutdown_token();
    let metrics_server = tokio::spawn(async move {
        axum::serve(metrics_listener, metrics_router)
            .with_graceful_shutdown(metrics_shutdown.cancelled_owned())
            .await
    });
    info!(listen = %args.metrics_listen, "exposing prometheus metrics");

    let listener = TcpListener::bind(args.listen).await?;
    info!(listen = %args.listen, "Adapter ready");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Internal(format!("HTTP server error: {e}")))?;

    info!("Adapter shutting down");
    adapter.shutdown().await;
    match metrics_server.await {
        Ok(Err(e)) => tracing::warn!(error = %e, "metrics server error"),
        Err(e) => tracing::warn!(error = %e, "metrics server task failed"),
        Ok(Ok(())) => {}
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
