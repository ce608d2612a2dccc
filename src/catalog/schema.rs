//! Per-metric table layout

use crate::db::sql::{self, quote_identifier, SqlValue};
use crate::{Error, Result};

use regex::Regex;
use std::sync::OnceLock;

/// Column names every metric table starts with, in order.
pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const VALUE_COLUMN: &str = "value";

/// Width of the text column holding one label value.
pub const LABEL_COLUMN_WIDTH: usize = 120;

/// Bookkeeping table mapping metric name to its comma-joined label list.
pub const BOOKKEEPING_TABLE: &str = "prometheus_adapter_meta";

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("valid metric name regex")
    })
}

/// Reject names that are not valid Prometheus metric or label names.
///
/// Names end up as SQL identifiers, so anything outside the Prometheus
/// alphabet is refused before it reaches a statement.
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(Error::SchemaCreation(format!("invalid {} name '{}'", kind, name)))
    }
}

/// Frozen label layout of one metric table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSchema {
    pub name: String,
    /// Label columns in table order
    pub labels: Vec<String>,
}

impl MetricSchema {
    pub fn new(name: impl Into<String>, labels: Vec<String>) -> Self {
        Self {
            name: name.into(),
            labels,
        }
    }

    /// Rebuild a layout from its bookkeeping row.
    pub fn from_catalog_row(name: impl Into<String>, joined: &str) -> Self {
        let labels = if joined.is_empty() {
            Vec::new()
        } else {
            joined.split(',').map(str::to_string).collect()
        };
        Self::new(name, labels)
    }

    pub fn joined_labels(&self) -> String {
        self.labels.join(",")
    }

    pub fn create_table_sql(&self) -> String {
        let mut sql = format!(
            "CREATE TABLE {} ({} BIGINT, {} DOUBLE",
            quote_identifier(&self.name),
            quote_identifier(TIMESTAMP_COLUMN),
            quote_identifier(VALUE_COLUMN)
        );
        for label in &self.labels {
            sql.push_str(&format!(
                ", {} VARCHAR({})",
                quote_identifier(label),
                LABEL_COLUMN_WIDTH
            ));
        }
        sql.push(')');
        sql
    }

    pub fn bookkeeping_insert_sql(&self) -> Result<String> {
        sql::bind(
            &format!("INSERT INTO {} VALUES (?, ?)", BOOKKEEPING_TABLE),
            &[
                SqlValue::Text(self.name.clone()),
                SqlValue::Text(self.joined_labels()),
            ],
        )
    }

    /// `INSERT` template with one placeholder per column.
    pub fn insert_template(&self) -> String {
        let placeholders = vec!["?"; self.labels.len() + 2].join(", ");
        format!(
            "INSERT INTO {} VALUES ({})",
            quote_identifier(&self.name),
            placeholders
        )
    }

    /// Whether `keys` is exactly this layout's label set, in any order.
    pub fn has_label_set<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> bool {
        let mut keys: Vec<&str> = keys.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();
        let mut labels: Vec<&str> = self.labels.iter().map(String::as_str).collect();
        labels.sort_unstable();
        keys == labels
    }
}
