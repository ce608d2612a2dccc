//! # monet-adapter
//!
//! Prometheus remote storage backed by MonetDB.
//!
//! Every metric gets its own table with one text column per label. Its label
//! layout is fixed the first time a sample is written and recorded in a
//! bookkeeping table. Remote-read queries are translated into SQL predicates
//! over those columns and the rows are regrouped into series.
//!
//! ## Architecture
//!
//! - **Catalog**: metric name → frozen label layout, cached in memory
//! - **Ingest**: write batches → one INSERT transaction
//! - **Query**: label matchers → SELECT → series
//! - **Wire**: decoder for MonetDB's line-tagged responses
//! - **Db**: MAPI transport, paged queries, bounded connection pool

pub mod adapter;
pub mod api;
pub mod catalog;
pub mod config;
pub mod db;
pub mod ingest;
pub mod query;
pub mod remote;
pub mod telemetry;
pub mod wire;

mod error;

pub use adapter::Adapter;
pub use config::AdapterConfig;
pub use error::{Error, Result};
