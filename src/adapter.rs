//! Adapter service: owns the pool, catalog and background tasks.

use crate::catalog::SchemaCatalog;
use crate::config::AdapterConfig;
use crate::db::{Connector, Pool, PoolStats};
use crate::ingest::{WriteFilter, Writer};
use crate::query::Reader;
use crate::remote::{ReadRequest, ReadResponse, WriteRequest};
use crate::Result;

use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Adapter {
    catalog: Arc<SchemaCatalog>,
    pool: Pool,
    writer: Writer,
    reader: Reader,
    request_timeout: Duration,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Adapter {
    /// Connect, load the catalog and start the refresh and pool-stats tasks.
    pub async fn start(config: AdapterConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;

        let pool = Pool::new(connector, config.pool.clone());
        let catalog = Arc::new(SchemaCatalog::new(pool.clone()));
        catalog.ensure_bookkeeping_table().await?;
        catalog.refresh().await?;
        info!(metrics = catalog.len(), "catalog loaded");

        let shutdown = CancellationToken::new();
        let mut tasks = Vec::with_capacity(2);

        let refresh_catalog = catalog.clone();
        let refresh_token = shutdown.child_token();
        let refresh_interval = config.refresh_interval;
        tasks.push(tokio::spawn(async move {
            refresh_catalog
                .run_refresh_loop(refresh_interval, refresh_token)
                .await;
        }));

        let stats_pool = pool.clone();
        let stats_token = shutdown.child_token();
        let stats_interval = config.pool_stats_interval;
        tasks.push(tokio::spawn(async move {
            stats_pool.run_stats_loop(stats_interval, stats_token).await;
        }));

        let filter = WriteFilter::new(config.whitelist, config.allow_prefix);
        Ok(Self {
            writer: Writer::new(catalog.clone(), pool.clone(), filter),
            reader: Reader::new(catalog.clone(), pool.clone()),
            catalog,
            pool,
            request_timeout: config.request_timeout,
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }

    /// Persist a write batch within the request deadline.
    pub async fn ingest(&self, request: &WriteRequest) -> Result<u64> {
        timeout(self.request_timeout, self.writer.ingest(request)).await?
    }

    /// Answer a read request within the request deadline.
    pub async fn read(&self, request: &ReadRequest) -> Result<ReadResponse> {
        timeout(self.request_timeout, self.reader.read(request)).await?
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop background tasks and close the pool.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for result in join_all(tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        self.pool.close();
        info!("adapter stopped");
    }
}
