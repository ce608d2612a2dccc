//! MAPI response decoding
//!
//! MonetDB answers every SQL command with a line-oriented text response. Each
//! line starts with a tag:
//!
//! - `#` informational, ignored
//! - `&1` table result header, `&6` continuation block
//! - `&2` update count, `&3` schema change, `&4` transaction ack, `&5` prepare ack
//! - `%` column metadata (names, types, sizes)
//! - `[` one tuple
//! - `!` server error
//! - an empty line is the ready prompt
//!
//! [`ResponseDecoder`] folds those lines into a [`QueryResult`].

mod decoder;
mod message;
mod value;

pub use decoder::{decode, QueryResult, ResponseDecoder};
pub use message::{HeaderCategory, Message};
pub use value::{ColumnDescription, ColumnKind, Value};
