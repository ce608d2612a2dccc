//! Transport seam between the adapter and the database server.

use crate::Result;
use async_trait::async_trait;

/// A raw command channel to the database.
///
/// `cmd` sends one protocol command and returns the complete textual
/// response, which the caller hands to the wire decoder.
#[async_trait]
pub trait Transport: Send {
    async fn cmd(&mut self, command: &str) -> Result<String>;
}

/// Opens new transports for the connection pool.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>>;
}
