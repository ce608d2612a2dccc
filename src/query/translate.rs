//! Label matchers to SQL.

use crate::catalog::{MetricSchema, TIMESTAMP_COLUMN, VALUE_COLUMN};
use crate::db::sql::{escape_single_quotes, quote_identifier, replace_dot_star};
use crate::remote::{LabelMatcher, MatchType, Query, METRIC_NAME_LABEL};
use crate::{Error, Result};

/// Matchers on this label are instructions to Prometheus, not data filters.
pub const IGNORED_LABEL: &str = "remote_read";

fn match_type(matcher: &LabelMatcher) -> Result<MatchType> {
    MatchType::try_from(matcher.r#type)
        .map_err(|_| Error::InvalidQuery(format!("unknown match type {}", matcher.r#type)))
}

/// The metric a query targets: exactly one equality matcher on `__name__`.
pub fn metric_name(query: &Query) -> Result<&str> {
    let mut found = None;
    for matcher in query.matchers.iter().filter(|m| m.name == METRIC_NAME_LABEL) {
        if match_type(matcher)? != MatchType::Eq {
            return Err(Error::InvalidQuery(
                "only equality matchers are supported on the metric name".to_string(),
            ));
        }
        if found.replace(matcher.value.as_str()).is_some() {
            return Err(Error::InvalidQuery(
                "more than one metric name matcher".to_string(),
            ));
        }
    }
    found.ok_or_else(|| Error::InvalidQuery("could not find metric name in query".to_string()))
}

/// Build the SELECT for `query` against `schema`.
///
/// Returns `None` when a matcher on a label the table does not have can never
/// match, so the query has no results without asking the database.
pub fn build_query(query: &Query, schema: &MetricSchema) -> Result<Option<String>> {
    let mut predicates = Vec::with_capacity(query.matchers.len() + 2);

    for matcher in &query.matchers {
        if matcher.name == METRIC_NAME_LABEL || matcher.name == IGNORED_LABEL {
            continue;
        }
        let kind = match_type(matcher)?;

        // An absent label reads as the empty string.
        if !schema.labels.iter().any(|l| l == &matcher.name) {
            if matches_empty(kind, &matcher.value) {
                continue;
            }
            return Ok(None);
        }

        let column = quote_identifier(&matcher.name);
        let predicate = match kind {
            MatchType::Eq => format!("{} = '{}'", column, escape_single_quotes(&matcher.value)),
            MatchType::Neq => format!("{} != '{}'", column, escape_single_quotes(&matcher.value)),
            MatchType::Re => format!("{} ILIKE '{}'", column, like_pattern(&matcher.value)),
            MatchType::Nre => format!("{} NOT ILIKE '{}'", column, like_pattern(&matcher.value)),
        };
        predicates.push(predicate);
    }

    let timestamp = quote_identifier(TIMESTAMP_COLUMN);
    predicates.push(format!("{} >= {}", timestamp, query.start_timestamp_ms));
    predicates.push(format!("{} <= {}", timestamp, query.end_timestamp_ms));

    let mut columns = vec![timestamp.clone(), quote_identifier(VALUE_COLUMN)];
    columns.extend(schema.labels.iter().map(|l| quote_identifier(l)));

    Ok(Some(format!(
        "SELECT {} FROM {} WHERE {} ORDER BY {}",
        columns.join(", "),
        quote_identifier(&schema.name),
        predicates.join(" AND "),
        timestamp
    )))
}

fn like_pattern(value: &str) -> String {
    escape_single_quotes(&replace_dot_star(value))
}

/// Evaluate a matcher against the empty string, using the same `.*` → `%`
/// translation the database would see.
fn matches_empty(kind: MatchType, value: &str) -> bool {
    let empty_matches = |v: &str| replace_dot_star(v).chars().all(|c| c == '%');
    match kind {
        MatchType::Eq => value.is_empty(),
        MatchType::Neq => !value.is_empty(),
        MatchType::Re => empty_matches(value),
        MatchType::Nre => !empty_matches(value),
    }
}
