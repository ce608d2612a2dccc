//! Database access for the adapter
//!
//! - [`Transport`]/[`Connector`]: raw command channel, opaque to the rest of the crate
//! - [`MapiTransport`]: MonetDB socket implementation
//! - [`Connection`]: SQL execution, paged queries and transactions on top of a transport
//! - [`Pool`]: bounded set of connections shared by all requests

mod mapi;
mod pool;
pub mod sql;
pub mod telemetry;
mod transport;

pub use mapi::{MapiConnector, MapiTransport};
pub use pool::{Pool, PoolConfig, PoolStats, PooledConnection};
pub use sql::SqlValue;
pub use transport::{Connector, Transport};

use crate::wire::{self, ColumnDescription, QueryResult, ResponseDecoder, Value};
use crate::{Error, Result};

use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use tracing::debug;

const DEFAULT_PORT: u16 = 50000;

/// Connection parameters, parsed from `username:password@hostname:port/database`.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

impl FromStr for ConnectionConfig {
    type Err = Error;

    fn from_str(dsn: &str) -> Result<Self> {
        let invalid = |why: &str| {
            Error::Config(format!(
                "invalid database url '{}': {}; expected username:password@hostname:port/database",
                dsn, why
            ))
        };

        let (credentials, location) = dsn.rsplit_once('@').ok_or_else(|| invalid("missing '@'"))?;
        let (username, password) = credentials
            .split_once(':')
            .ok_or_else(|| invalid("missing password"))?;
        let (address, database) = location
            .split_once('/')
            .ok_or_else(|| invalid("missing database"))?;
        let (host, port) = match address.rsplit_once(':') {
            Some((host, port)) => (host, port.parse().map_err(|_| invalid("invalid port"))?),
            None => (address, DEFAULT_PORT),
        };

        if username.is_empty() || host.is_empty() || database.is_empty() {
            return Err(invalid("empty username, host or database"));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            username: username.to_string(),
            password: password.to_string(),
            database: database.to_string(),
        })
    }
}

/// Rows of a completed query.
#[derive(Debug)]
pub struct Rows {
    columns: Vec<ColumnDescription>,
    rows: std::vec::IntoIter<Vec<Value>>,
}

impl Rows {
    pub fn columns(&self) -> &[ColumnDescription] {
        &self.columns
    }
}

impl Iterator for Rows {
    type Item = Vec<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl ExactSizeIterator for Rows {}

/// A SQL session over one transport.
pub struct Connection {
    transport: Box<dyn Transport>,
    reply_size: usize,
    in_flight: bool,
    in_transaction: bool,
    broken: bool,
}

impl Connection {
    pub fn new(transport: Box<dyn Transport>, reply_size: usize) -> Self {
        Self {
            transport,
            reply_size: reply_size.max(1),
            in_flight: false,
            in_transaction: false,
            broken: false,
        }
    }

    /// Whether the session is in a state that cannot be handed to another caller.
    ///
    /// A command whose future was dropped mid-flight leaves an unread response
    /// on the wire, and an open transaction would leak into the next request.
    pub fn is_reusable(&self) -> bool {
        !self.broken && !self.in_flight && !self.in_transaction
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn cmd(&mut self, command: &str) -> Result<String> {
        self.in_flight = true;
        let started = Instant::now();
        let response = self.transport.cmd(command).await;
        self.in_flight = false;

        let outcome = match &response {
            Ok(_) => "ok",
            Err(Error::Io(_)) | Err(Error::Connection(_)) | Err(Error::Protocol(_)) => {
                self.broken = true;
                "transport_error"
            }
            Err(_) => "error",
        };
        telemetry::record_query(started.elapsed().as_secs_f64(), outcome);
        response
    }

    /// Execute a statement and decode its complete response.
    pub async fn execute(&mut self, sql: &str) -> Result<QueryResult> {
        debug!(sql, "execute");
        let raw = self.cmd(&format!("s{}\n;", sql)).await?;
        wire::decode(&raw).map_err(|e| self.note_decode_error(e))
    }

    /// Run a query, fetching continuation blocks until every row is read.
    pub async fn query(&mut self, sql: &str) -> Result<Rows> {
        debug!(sql, "query");
        let raw = self.cmd(&format!("s{}\n;", sql)).await?;

        let mut decoder = ResponseDecoder::new();
        decoder.feed(&raw).map_err(|e| self.note_decode_error(e))?;
        let mut rows = decoder.take_rows();

        let paged = rows.len() < decoder.row_count();
        while rows.len() < decoder.row_count() {
            let query_id = decoder
                .query_id()
                .ok_or_else(|| Error::Protocol("paged result without query id".to_string()))?;
            let command = format!("Xexport {} {} {}", query_id, rows.len(), self.reply_size);
            let raw = self.cmd(&command).await?;
            decoder.feed(&raw).map_err(|e| self.note_decode_error(e))?;

            let block = decoder.take_rows();
            if block.is_empty() {
                self.broken = true;
                return Err(Error::Protocol(format!(
                    "result {} ended after {} of {} rows",
                    query_id,
                    rows.len(),
                    decoder.row_count()
                )));
            }
            rows.extend(block);
        }

        if paged {
            if let Some(query_id) = decoder.query_id() {
                let raw = self.cmd(&format!("Xclose {}", query_id)).await?;
                wire::decode(&raw)?;
            }
        }

        telemetry::record_rows_read(rows.len() as u64);
        let result = decoder.finish();
        Ok(Rows {
            columns: result.columns,
            rows: rows.into_iter(),
        })
    }

    fn note_decode_error(&mut self, error: Error) -> Error {
        if matches!(error, Error::Protocol(_)) {
            self.broken = true;
        }
        error
    }

    pub async fn begin(&mut self) -> Result<()> {
        self.execute("START TRANSACTION").await?;
        self.in_transaction = true;
        Ok(())
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.execute("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<()> {
        self.execute("ROLLBACK").await?;
        self.in_transaction = false;
        Ok(())
    }

    /// Whether a user table with this exact name exists.
    pub async fn table_exists(&mut self, name: &str) -> Result<bool> {
        let sql = sql::bind(
            "SELECT name FROM sys.tables WHERE system = false AND name = ?",
            &[SqlValue::Text(name.to_string())],
        )?;
        let rows = self.query(&sql).await?;
        Ok(rows.len() > 0)
    }
}
