//! Error types for the MonetDB adapter

use std::fmt;

/// Result type alias for adapter operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the adapter
#[derive(Debug)]
pub enum Error {
    /// Unknown metric on the read path
    NotFound(String),
    /// Disallowed or malformed read query
    InvalidQuery(String),
    /// Label keys of a sample differ from the frozen table layout
    SchemaMismatch {
        metric: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },
    /// DDL or bookkeeping insert failed
    SchemaCreation(String),
    /// Begin/exec/commit failure inside a write batch
    Transaction(String),
    /// Malformed wire response
    Protocol(String),
    /// Error line reported by the server
    Database(String),
    /// A field's text does not match its declared column type
    Conversion { column: String, message: String },
    /// Transport or pool failure
    Connection(String),
    /// Remote protocol payload could not be decoded
    Decode(String),
    /// IO errors
    Io(std::io::Error),
    /// Configuration errors
    Config(String),
    /// Timeout
    Timeout,
    /// Internal error
    Internal(String),
}

impl Error {
    /// Whether the failure was caused by the request itself rather than the backend.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::InvalidQuery(_) | Error::Decode(_)
        )
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound(metric) => write!(f, "could not find table for metric {}", metric),
            Error::InvalidQuery(msg) => write!(f, "Invalid query: {}", msg),
            Error::SchemaMismatch {
                metric,
                expected,
                actual,
            } => write!(
                f,
                "Label mismatch for metric {}: table has [{}], sample has [{}]",
                metric,
                expected.join(","),
                actual.join(",")
            ),
            Error::SchemaCreation(msg) => write!(f, "Schema creation failed: {}", msg),
            Error::Transaction(msg) => write!(f, "Transaction failed: {}", msg),
            Error::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Error::Database(msg) => write!(f, "Database error: {}", msg),
            Error::Conversion { column, message } => {
                write!(f, "Conversion error in column {}: {}", column, message)
            }
            Error::Connection(msg) => write!(f, "Connection error: {}", msg),
            Error::Decode(msg) => write!(f, "Decode error: {}", msg),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<prost::DecodeError> for Error {
    fn from(e: prost::DecodeError) -> Self {
        Error::Decode(e.to_string())
    }
}

impl From<snap::Error> for Error {
    fn from(e: snap::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}
