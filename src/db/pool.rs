//! Bounded connection pool

use super::telemetry;
use super::{Connection, Connector};
use crate::{Error, Result};

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Pool sizing
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound on connections open at once
    pub max_open: usize,
    /// Idle connections kept for reuse (clamped to `max_open`)
    pub max_idle: usize,
    /// Rows fetched per continuation block
    pub reply_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open: 32,
            max_idle: 16,
            reply_size: 100,
        }
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub open: usize,
    pub idle: usize,
    pub in_use: usize,
}

struct PoolInner {
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    idle: Mutex<Vec<Connection>>,
    permits: Arc<Semaphore>,
    open: AtomicUsize,
}

impl PoolInner {
    fn release(&self, conn: Connection) {
        if conn.is_reusable() {
            let mut idle = self.idle.lock();
            if idle.len() < self.config.max_idle {
                idle.push(conn);
                return;
            }
        } else {
            debug!("discarding connection in unknown state");
        }
        self.open.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Shared connection pool. Cloning is cheap.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    pub fn new(connector: Arc<dyn Connector>, mut config: PoolConfig) -> Self {
        config.max_open = config.max_open.max(1);
        config.max_idle = config.max_idle.min(config.max_open);
        Self {
            inner: Arc::new(PoolInner {
                connector,
                permits: Arc::new(Semaphore::new(config.max_open)),
                config,
                idle: Mutex::new(Vec::new()),
                open: AtomicUsize::new(0),
            }),
        }
    }

    /// Check out a connection, waiting while `max_open` are in use.
    pub async fn get(&self) -> Result<PooledConnection> {
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Connection("connection pool is closed".to_string()))?;

        let idle = self.inner.idle.lock().pop();
        let conn = match idle {
            Some(conn) => conn,
            None => {
                let transport = self.inner.connector.connect().await?;
                self.inner.open.fetch_add(1, Ordering::Relaxed);
                Connection::new(transport, self.inner.config.reply_size)
            }
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    pub fn stats(&self) -> PoolStats {
        let open = self.inner.open.load(Ordering::Relaxed);
        let idle = self.inner.idle.lock().len();
        PoolStats {
            open,
            idle,
            in_use: open.saturating_sub(idle),
        }
    }

    /// Stop handing out connections and drop the idle ones.
    pub fn close(&self) {
        self.inner.permits.close();
        let dropped = std::mem::take(&mut *self.inner.idle.lock());
        self.inner.open.fetch_sub(dropped.len(), Ordering::Relaxed);
    }

    /// Sample pool counters until cancelled.
    pub async fn run_stats_loop(&self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = self.stats();
                    telemetry::record_open_connections(stats.open);
                    debug!(open = stats.open, idle = stats.idle, in_use = stats.in_use, "pool stats");
                }
                _ = shutdown.cancelled() => {
                    info!("pool stats sampler stopped");
                    return;
                }
            }
        }
    }
}

/// A checked-out connection, returned to the pool on drop.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
