//! Label/schema catalog
//!
//! Maps metric names to the frozen label layout of their backing table. The
//! persisted form is the bookkeeping table; readers work from an in-memory
//! snapshot that is replaced wholesale on every refresh.
//!
//! Three locks with different scopes:
//! - `create_lock` serializes existence check, DDL and bookkeeping insert
//!   across the process, so concurrent writers never create a table twice.
//! - `refresh_lock` is held from the bookkeeping read to the swap, so an
//!   older read can never replace a newer snapshot.
//! - `cache` is only held for the pointer swap, so lookups of known metrics
//!   never wait on table creation or refresh.
//!
//! Lock order is `create_lock` then `refresh_lock`.

mod schema;

pub use schema::{
    validate_name, MetricSchema, BOOKKEEPING_TABLE, LABEL_COLUMN_WIDTH, TIMESTAMP_COLUMN,
    VALUE_COLUMN,
};

use crate::db::{self, Pool, PooledConnection};
use crate::remote::METRIC_NAME_LABEL;
use crate::wire::Value;
use crate::{Error, Result};

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Snapshot = Arc<HashMap<String, MetricSchema>>;

pub struct SchemaCatalog {
    pool: Pool,
    cache: RwLock<Snapshot>,
    create_lock: Mutex<()>,
    refresh_lock: Mutex<()>,
}

impl SchemaCatalog {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            cache: RwLock::new(Arc::new(HashMap::new())),
            create_lock: Mutex::new(()),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Create the bookkeeping table if the database does not have it yet.
    pub async fn ensure_bookkeeping_table(&self) -> Result<()> {
        let _guard = self.create_lock.lock().await;
        let mut conn = self.pool.get().await?;
        if conn.table_exists(BOOKKEEPING_TABLE).await? {
            return Ok(());
        }

        let sql = format!(
            "CREATE TABLE {} (\"metric\" VARCHAR({}), \"labels\" VARCHAR(1024))",
            BOOKKEEPING_TABLE, LABEL_COLUMN_WIDTH
        );
        conn.execute(&sql)
            .await
            .map_err(|e| Error::SchemaCreation(format!("create {}: {}", BOOKKEEPING_TABLE, e)))?;
        db::telemetry::record_table_created();
        info!(table = BOOKKEEPING_TABLE, "created bookkeeping table");
        Ok(())
    }

    /// Current cache snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.cache.read().clone()
    }

    pub fn lookup(&self, name: &str) -> Result<MetricSchema> {
        self.cache
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cache.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the layout for `name`, creating its table on first sight.
    ///
    /// `label_keys` are the keys present on the sample; the metric-name label
    /// is excluded and the rest are sorted to form the new layout. An existing
    /// layout is returned unchanged whatever keys are passed.
    pub async fn lookup_or_create<'a, I>(&self, name: &str, label_keys: I) -> Result<MetricSchema>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut labels: Vec<String> = label_keys
            .into_iter()
            .filter(|key| *key != METRIC_NAME_LABEL)
            .map(str::to_string)
            .collect();
        labels.sort_unstable();
        labels.dedup();

        if let Ok(schema) = self.lookup(name) {
            return Ok(schema);
        }

        let _guard = self.create_lock.lock().await;
        // Another writer may have created it while we waited.
        if let Ok(schema) = self.lookup(name) {
            return Ok(schema);
        }

        validate_name("metric", name)?;
        for label in &labels {
            validate_name("label", label)?;
        }
        let schema = MetricSchema::new(name, labels);

        let mut conn = self.pool.get().await?;
        if conn.table_exists(name).await? {
            drop(conn);
            self.refresh().await?;
            return self.lookup(name).map_err(|_| {
                Error::SchemaCreation(format!(
                    "table {} exists but has no {} entry",
                    name, BOOKKEEPING_TABLE
                ))
            });
        }

        if let Err(e) = create_table(&mut conn, &schema).await {
            if conn.in_transaction() {
                if let Err(rollback) = conn.rollback().await {
                    warn!(metric = name, error = %rollback, "rollback after failed create");
                }
            }
            return Err(Error::SchemaCreation(format!("create table {}: {}", name, e)));
        }
        drop(conn);

        db::telemetry::record_table_created();
        info!(metric = name, labels = %schema.joined_labels(), "created metric table");

        self.refresh().await?;
        self.lookup(name).map_err(|_| {
            Error::SchemaCreation(format!("table {} missing from catalog after create", name))
        })
    }

    /// Reload the bookkeeping table and swap in a new snapshot.
    pub async fn refresh(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        let rows = {
            let mut conn = self.pool.get().await?;
            conn.query(&format!(
                "SELECT \"metric\", \"labels\" FROM {}",
                BOOKKEEPING_TABLE
            ))
            .await?
        };

        let mut next = HashMap::with_capacity(rows.len());
        for row in rows {
            let (name, joined) = match row.as_slice() {
                [name, joined] => (text(name, "metric")?, text(joined, "labels")?),
                other => {
                    db::telemetry::record_row_error();
                    return Err(Error::Protocol(format!(
                        "expected 2 catalog columns, got {}",
                        other.len()
                    )));
                }
            };
            next.insert(name.clone(), MetricSchema::from_catalog_row(name, &joined));
        }

        let count = next.len();
        *self.cache.write() = Arc::new(next);
        debug!(metrics = count, "catalog refreshed");
        Ok(())
    }

    /// Refresh on a fixed interval until cancelled.
    pub async fn run_refresh_loop(&self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        warn!(error = %e, "catalog refresh failed, keeping previous snapshot");
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("catalog refresh stopped");
                    return;
                }
            }
        }
    }
}

async fn create_table(conn: &mut PooledConnection, schema: &MetricSchema) -> Result<()> {
    let insert = schema.bookkeeping_insert_sql()?;
    conn.begin().await?;
    conn.execute(&schema.create_table_sql()).await?;
    conn.execute(&insert).await?;
    conn.commit().await
}

fn text(value: &Value, column: &str) -> Result<String> {
    match value {
        Value::Text(s) => Ok(s.clone()),
        Value::Null => Ok(String::new()),
        other => {
            db::telemetry::record_row_error();
            Err(Error::Conversion {
                column: column.to_string(),
                message: format!("expected text, got {:?}", other),
            })
        }
    }
}
