//! Single-pass state machine over a raw MAPI response.

use super::message::{HeaderCategory, Message};
use super::value::{ColumnDescription, ColumnKind, Value};
use crate::{Error, Result};

use tracing::trace;

/// Decoder phase between lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for the next message
    Idle,
    /// Inside a contiguous block of `%` header lines
    Headers,
    /// Terminal: prompt or prepared-statement ack seen
    Done,
}

/// Per-category header values, accumulated positionally by column index.
#[derive(Debug, Default)]
struct HeaderBlock {
    table_names: Vec<String>,
    names: Vec<String>,
    types: Vec<String>,
    lengths: Vec<usize>,
    internal_sizes: Vec<usize>,
    size_pairs: Vec<(u32, u32)>,
}

impl HeaderBlock {
    fn apply(&mut self, category: HeaderCategory, values: &[&str], expected: usize) -> Result<()> {
        if expected > 0 && values.len() != expected {
            return Err(Error::Protocol(format!(
                "{:?} header has {} entries, expected {}",
                category,
                values.len(),
                expected
            )));
        }

        let owned = || values.iter().map(|v| v.to_string()).collect::<Vec<_>>();
        match category {
            HeaderCategory::TableName => self.table_names = owned(),
            HeaderCategory::Name => self.names = owned(),
            HeaderCategory::Type => self.types = owned(),
            HeaderCategory::Length => {
                self.lengths = values
                    .iter()
                    .map(|v| parse_size(v))
                    .collect::<Result<_>>()?;
            }
            HeaderCategory::TypeSizes => {
                self.internal_sizes.clear();
                self.size_pairs.clear();
                for value in values {
                    let mut parts = value.split(' ').filter(|p| !p.is_empty());
                    let first = parts.next().map(parse_size).transpose()?.unwrap_or(0);
                    let second = parts.next().map(parse_size).transpose()?.unwrap_or(0);
                    self.internal_sizes.push(first);
                    self.size_pairs.push((first as u32, second as u32));
                }
            }
            HeaderCategory::Other => {}
        }
        Ok(())
    }

    fn describe(&self, column_count: usize) -> Vec<ColumnDescription> {
        let count = if column_count > 0 {
            column_count
        } else {
            self.names.len()
        };

        (0..count)
            .map(|i| {
                let type_name = self.types.get(i).cloned().unwrap_or_default();
                let kind = ColumnKind::from_type_name(&type_name);
                let (precision, scale) = match kind {
                    ColumnKind::Decimal => self.size_pairs.get(i).copied().unwrap_or((0, 0)),
                    _ => (0, 0),
                };
                ColumnDescription {
                    table_name: self.table_names.get(i).cloned().unwrap_or_default(),
                    name: self.names.get(i).cloned().unwrap_or_default(),
                    kind,
                    type_name,
                    display_size: self.lengths.get(i).copied().unwrap_or(0),
                    internal_size: self.internal_sizes.get(i).copied().unwrap_or(0),
                    precision,
                    scale,
                }
            })
            .collect()
    }
}

fn parse_size(raw: &str) -> Result<usize> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Protocol(format!("invalid size in header: {}", raw)))
}

/// Accumulated outcome of decoding one or more responses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<ColumnDescription>,
    pub rows: Vec<Vec<Value>>,
    /// Total rows in the result set, which may exceed `rows` for paged results
    pub row_count: usize,
    pub rows_affected: i64,
    pub last_id: i64,
    pub query_id: Option<i64>,
    pub exec_id: Option<i64>,
}

/// Stateful decoder for MAPI responses.
///
/// One decoder may be fed several responses in a row (for example the
/// continuation blocks of a paged result); the column set survives between
/// calls while each call starts with the decoder ready for new lines.
#[derive(Debug)]
pub struct ResponseDecoder {
    phase: Phase,
    headers: HeaderBlock,
    column_count: usize,
    result: QueryResult,
    offset: usize,
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseDecoder {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            headers: HeaderBlock::default(),
            column_count: 0,
            result: QueryResult::default(),
            offset: 0,
        }
    }

    /// Decode one complete response.
    pub fn feed(&mut self, raw: &str) -> Result<()> {
        self.phase = Phase::Idle;

        for line in raw.split('\n') {
            let message = Message::parse(line)?;

            if self.phase == Phase::Headers && !matches!(message, Message::Header { .. }) {
                self.finish_headers();
            }

            self.step(message)?;
            if self.phase == Phase::Done {
                return Ok(());
            }
        }

        Err(Error::Protocol(format!("unknown state: {}", raw)))
    }

    fn step(&mut self, message: Message<'_>) -> Result<()> {
        match message {
            Message::Info(text) => trace!(info = text, "server info"),
            Message::Prepared { exec_id } => {
                self.result.exec_id = Some(exec_id);
                self.phase = Phase::Done;
            }
            Message::TableHeader {
                query_id,
                row_count,
                column_count,
            } => {
                self.result.query_id = Some(query_id);
                self.result.row_count = row_count;
                self.result.rows.clear();
                self.result.columns.clear();
                self.column_count = column_count;
                self.headers = HeaderBlock::default();
            }
            Message::Tuple(inner) => {
                let row = self.parse_tuple(inner)?;
                self.result.rows.push(row);
            }
            Message::Block { query_id, offset } => {
                self.result.query_id = Some(query_id);
                self.result.rows.clear();
                self.offset = offset;
            }
            Message::SchemaChanged | Message::Transaction => self.reset(),
            Message::Update {
                rows_affected,
                last_id,
            } => {
                self.result.rows_affected = rows_affected;
                self.result.last_id = last_id;
            }
            Message::Header { category, values } => {
                self.headers.apply(category, &values, self.column_count)?;
                self.phase = Phase::Headers;
            }
            Message::Prompt => self.phase = Phase::Done,
            Message::Error(msg) => return Err(Error::Database(msg.to_string())),
            Message::Redirect(target) => {
                return Err(Error::Protocol(format!("unexpected redirect to {}", target)))
            }
        }
        Ok(())
    }

    fn finish_headers(&mut self) {
        self.result.columns = self.headers.describe(self.column_count);
        self.offset = 0;
        self.result.last_id = 0;
        self.phase = Phase::Idle;
    }

    fn reset(&mut self) {
        self.offset = 0;
        self.column_count = 0;
        self.headers = HeaderBlock::default();
        self.result = QueryResult::default();
    }

    fn parse_tuple(&self, inner: &str) -> Result<Vec<Value>> {
        let fields: Vec<&str> = inner.split(",\t").collect();
        let columns = &self.result.columns;
        if fields.len() != columns.len() {
            return Err(Error::Protocol(format!(
                "length of row ({}) doesn't match header ({})",
                fields.len(),
                columns.len()
            )));
        }

        fields
            .iter()
            .zip(columns)
            .map(|(field, column)| Value::parse(field, column))
            .collect()
    }

    pub fn columns(&self) -> &[ColumnDescription] {
        &self.result.columns
    }

    pub fn row_count(&self) -> usize {
        self.result.row_count
    }

    pub fn query_id(&self) -> Option<i64> {
        self.result.query_id
    }

    /// Take the rows decoded so far, leaving the column set in place.
    pub fn take_rows(&mut self) -> Vec<Vec<Value>> {
        std::mem::take(&mut self.result.rows)
    }

    pub fn finish(self) -> QueryResult {
        self.result
    }
}

/// Decode a single self-contained response.
pub fn decode(raw: &str) -> Result<QueryResult> {
    let mut decoder = ResponseDecoder::new();
    decoder.feed(raw)?;
    Ok(decoder.finish())
}
