//! Write path: remote-write batches to one INSERT transaction.

use crate::catalog::{MetricSchema, SchemaCatalog};
use crate::db::{self, sql, Pool, PooledConnection, SqlValue};
use crate::remote::{TimeSeries, WriteRequest, METRIC_NAME_LABEL};
use crate::{Error, Result};

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Decides which series are persisted.
///
/// A series is accepted when its metric already has a table, is on the
/// allow-list, or starts with the allowed prefix. Everything else is dropped
/// without error.
#[derive(Debug, Clone, Default)]
pub struct WriteFilter {
    whitelist: HashSet<String>,
    allow_prefix: Option<String>,
}

impl WriteFilter {
    pub fn new<I, S>(whitelist: I, allow_prefix: Option<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            whitelist: whitelist.into_iter().map(Into::into).collect(),
            allow_prefix: allow_prefix.filter(|p| !p.is_empty()),
        }
    }

    pub fn accepts(&self, name: &str, catalog: &SchemaCatalog) -> bool {
        catalog.contains(name)
            || self.whitelist.contains(name)
            || self
                .allow_prefix
                .as_deref()
                .is_some_and(|prefix| name.starts_with(prefix))
    }
}

pub struct Writer {
    catalog: Arc<SchemaCatalog>,
    pool: Pool,
    filter: WriteFilter,
}

impl Writer {
    pub fn new(catalog: Arc<SchemaCatalog>, pool: Pool, filter: WriteFilter) -> Self {
        Self {
            catalog,
            pool,
            filter,
        }
    }

    /// Persist a batch. All rows commit together or none do.
    ///
    /// Returns the number of rows inserted.
    pub async fn ingest(&self, request: &WriteRequest) -> Result<u64> {
        let mut statements = Vec::new();
        let mut dropped_series = 0usize;
        let mut dropped_samples = 0usize;

        for series in &request.timeseries {
            let Some(name) = series.metric_name() else {
                dropped_series += 1;
                continue;
            };
            if !self.filter.accepts(name, &self.catalog) {
                dropped_series += 1;
                continue;
            }

            let finite = series.samples.iter().filter(|s| s.value.is_finite()).count();
            dropped_samples += series.samples.len() - finite;
            if finite == 0 {
                continue;
            }

            let keys = series.labels.iter().map(|l| l.name.as_str());
            let schema = self.catalog.lookup_or_create(name, keys).await?;
            append_inserts(&schema, series, &mut statements)?;
        }

        if dropped_series > 0 || dropped_samples > 0 {
            debug!(dropped_series, dropped_samples, "filtered write batch");
        }
        if statements.is_empty() {
            return Ok(0);
        }

        let mut conn = self.pool.get().await?;
        let inserted = run_batch(&mut conn, &statements).await?;
        db::telemetry::record_rows_inserted(inserted);
        debug!(statements = statements.len(), inserted, "write batch committed");
        Ok(inserted)
    }
}

/// Render one INSERT per finite sample of `series`, in the table's column order.
fn append_inserts(
    schema: &MetricSchema,
    series: &TimeSeries,
    statements: &mut Vec<String>,
) -> Result<()> {
    let keys = series
        .labels
        .iter()
        .map(|l| l.name.as_str())
        .filter(|k| *k != METRIC_NAME_LABEL);
    if !schema.has_label_set(keys.clone()) {
        let mut actual: Vec<String> = keys.map(str::to_string).collect();
        actual.sort_unstable();
        actual.dedup();
        return Err(Error::SchemaMismatch {
            metric: schema.name.clone(),
            expected: schema.labels.clone(),
            actual,
        });
    }

    let label_values: Vec<SqlValue> = schema
        .labels
        .iter()
        .map(|column| {
            let value = series
                .labels
                .iter()
                .find(|l| &l.name == column)
                .map(|l| l.value.clone())
                .unwrap_or_default();
            SqlValue::Text(value)
        })
        .collect();

    let template = schema.insert_template();
    for sample in series.samples.iter().filter(|s| s.value.is_finite()) {
        let mut params = Vec::with_capacity(label_values.len() + 2);
        params.push(SqlValue::BigInt(sample.timestamp));
        params.push(SqlValue::Double(sample.value));
        params.extend(label_values.iter().cloned());
        statements.push(sql::bind(&template, &params)?);
    }
    Ok(())
}

async fn run_batch(conn: &mut PooledConnection, statements: &[String]) -> Result<u64> {
    conn.begin()
        .await
        .map_err(|e| Error::Transaction(format!("begin: {}", e)))?;

    let mut inserted = 0u64;
    for statement in statements {
        match conn.execute(statement).await {
            Ok(result) => inserted += result.rows_affected.max(0) as u64,
            Err(e) => {
                if let Err(rollback) = conn.rollback().await {
                    warn!(error = %rollback, "rollback of write batch failed");
                }
                return Err(Error::Transaction(format!("insert: {}", e)));
            }
        }
    }

    conn.commit()
        .await
        .map_err(|e| Error::Transaction(format!("commit: {}", e)))?;
    Ok(inserted)
}
