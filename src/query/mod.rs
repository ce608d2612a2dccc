//! Read path: remote-read queries to SQL and back into series.

mod translate;

pub use translate::{build_query, metric_name, IGNORED_LABEL};

use crate::catalog::{MetricSchema, SchemaCatalog, TIMESTAMP_COLUMN, VALUE_COLUMN};
use crate::db::{self, Pool};
use crate::remote::{
    Label, Query, QueryResult, ReadRequest, ReadResponse, Sample, TimeSeries, METRIC_NAME_LABEL,
};
use crate::wire::Value;
use crate::{Error, Result};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub struct Reader {
    catalog: Arc<SchemaCatalog>,
    pool: Pool,
}

impl Reader {
    pub fn new(catalog: Arc<SchemaCatalog>, pool: Pool) -> Self {
        Self { catalog, pool }
    }

    /// Answer every query of a read request, one result per query in order.
    pub async fn read(&self, request: &ReadRequest) -> Result<ReadResponse> {
        let started = Instant::now();
        let mut results = Vec::with_capacity(request.queries.len());
        for query in &request.queries {
            results.push(QueryResult {
                timeseries: self.execute_query(query).await?,
            });
        }
        info!(
            queries = request.queries.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "read request served"
        );
        Ok(ReadResponse { results })
    }

    pub async fn execute_query(&self, query: &Query) -> Result<Vec<TimeSeries>> {
        let name = metric_name(query)?;
        let schema = self.catalog.lookup(name)?;
        let Some(sql) = build_query(query, &schema)? else {
            debug!(metric = name, "query cannot match any series");
            return Ok(Vec::new());
        };

        let rows = {
            let mut conn = self.pool.get().await?;
            conn.query(&sql).await?
        };
        let series = regroup(&schema, rows)?;
        debug!(metric = name, series = series.len(), "query executed");
        Ok(series)
    }
}

/// Group rows by their label-value tuple, in first-encounter order.
pub fn regroup<I>(schema: &MetricSchema, rows: I) -> Result<Vec<TimeSeries>>
where
    I: IntoIterator<Item = Vec<Value>>,
{
    let mut index: HashMap<Vec<String>, usize> = HashMap::new();
    let mut groups: Vec<(Vec<String>, Vec<Sample>)> = Vec::new();

    for row in rows {
        let (sample, key) =
            scan_row(schema, row).inspect_err(|_| db::telemetry::record_row_error())?;
        match index.get(&key) {
            Some(&i) => groups[i].1.push(sample),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![sample]));
            }
        }
    }

    Ok(groups
        .into_iter()
        .map(|(values, samples)| {
            let mut labels = Vec::with_capacity(values.len() + 1);
            labels.push(Label::new(METRIC_NAME_LABEL, schema.name.as_str()));
            labels.extend(
                schema
                    .labels
                    .iter()
                    .zip(values)
                    .map(|(name, value)| Label::new(name.as_str(), value)),
            );
            TimeSeries { labels, samples }
        })
        .collect())
}

fn scan_row(schema: &MetricSchema, row: Vec<Value>) -> Result<(Sample, Vec<String>)> {
    if row.len() != schema.labels.len() + 2 {
        return Err(Error::Protocol(format!(
            "row has {} columns, {} expects {}",
            row.len(),
            schema.name,
            schema.labels.len() + 2
        )));
    }

    let mut fields = row.into_iter();
    let timestamp = fields
        .next()
        .and_then(|v| v.as_i64())
        .ok_or_else(|| conversion(TIMESTAMP_COLUMN, "expected integer timestamp"))?;
    let value = fields
        .next()
        .and_then(|v| v.as_f64())
        .ok_or_else(|| conversion(VALUE_COLUMN, "expected numeric value"))?;

    let key = fields
        .zip(&schema.labels)
        .map(|(field, column)| match field {
            Value::Text(s) => Ok(s),
            Value::Null => Ok(String::new()),
            other => Err(conversion(column, &format!("expected text, got {:?}", other))),
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((Sample { value, timestamp }, key))
}

fn conversion(column: &str, message: &str) -> Error {
    Error::Conversion {
        column: column.to_string(),
        message: message.to_string(),
    }
}
