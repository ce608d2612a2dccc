//! Line classification for MAPI responses.
//!
//! Every line of a response starts with a tag that selects its meaning. This
//! module turns one line into a [`Message`]; all state lives in the decoder.

use crate::{Error, Result};

const TAG_INFO: char = '#';
const TAG_ERROR: char = '!';
const TAG_QUERY: char = '&';
const TAG_HEADER: char = '%';
const TAG_TUPLE: char = '[';
const TAG_REDIRECT: char = '^';

const Q_TABLE: &str = "&1";
const Q_UPDATE: &str = "&2";
const Q_SCHEMA: &str = "&3";
const Q_TRANS: &str = "&4";
const Q_PREPARE: &str = "&5";
const Q_BLOCK: &str = "&6";

/// Metadata category carried by a `%` header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderCategory {
    TableName,
    Name,
    Type,
    Length,
    TypeSizes,
    Other,
}

impl HeaderCategory {
    fn from_wire(identity: &str) -> Self {
        match identity {
            "table_name" => Self::TableName,
            "name" => Self::Name,
            "type" => Self::Type,
            "length" => Self::Length,
            "typesizes" => Self::TypeSizes,
            _ => Self::Other,
        }
    }
}

/// One decoded response line.
#[derive(Debug, Clone, PartialEq)]
pub enum Message<'a> {
    /// Empty line: the server is ready for the next command
    Prompt,
    Info(&'a str),
    Error(&'a str),
    Redirect(&'a str),
    TableHeader {
        query_id: i64,
        row_count: usize,
        column_count: usize,
    },
    Update {
        rows_affected: i64,
        last_id: i64,
    },
    SchemaChanged,
    Transaction,
    Prepared {
        exec_id: i64,
    },
    Block {
        query_id: i64,
        offset: usize,
    },
    Header {
        category: HeaderCategory,
        values: Vec<&'a str>,
    },
    /// Tuple content with the surrounding brackets removed
    Tuple(&'a str),
}

impl<'a> Message<'a> {
    /// Classify a single line (without its trailing newline).
    pub fn parse(line: &'a str) -> Result<Self> {
        let Some(tag) = line.chars().next() else {
            return Ok(Message::Prompt);
        };

        match tag {
            TAG_INFO => Ok(Message::Info(line[1..].trim())),
            TAG_ERROR => Ok(Message::Error(&line[1..])),
            TAG_REDIRECT => Ok(Message::Redirect(&line[1..])),
            TAG_HEADER => parse_header(line),
            TAG_TUPLE => parse_tuple(line),
            TAG_QUERY => parse_query(line),
            _ => Err(Error::Protocol(format!("unrecognized response line: {}", line))),
        }
    }
}

fn parse_query(line: &str) -> Result<Message<'_>> {
    let tag = line.get(..2).unwrap_or(line);
    let mut fields = line[tag.len()..].split_whitespace();

    match tag {
        Q_TABLE => {
            let query_id = next_number(&mut fields, line)?;
            let row_count = next_number(&mut fields, line)?;
            let column_count = next_number(&mut fields, line)?;
            Ok(Message::TableHeader {
                query_id,
                row_count,
                column_count,
            })
        }
        Q_UPDATE => {
            let rows_affected = next_number(&mut fields, line)?;
            let last_id = next_number(&mut fields, line)?;
            Ok(Message::Update {
                rows_affected,
                last_id,
            })
        }
        Q_SCHEMA => Ok(Message::SchemaChanged),
        Q_TRANS => Ok(Message::Transaction),
        Q_PREPARE => Ok(Message::Prepared {
            exec_id: next_number(&mut fields, line)?,
        }),
        Q_BLOCK => {
            let query_id = next_number(&mut fields, line)?;
            let _columns: usize = next_number(&mut fields, line)?;
            let _rows: usize = next_number(&mut fields, line)?;
            let offset = next_number(&mut fields, line)?;
            Ok(Message::Block { query_id, offset })
        }
        _ => Err(Error::Protocol(format!("unknown query response: {}", line))),
    }
}

fn next_number<'a, T: std::str::FromStr>(
    fields: &mut impl Iterator<Item = &'a str>,
    line: &str,
) -> Result<T> {
    fields
        .next()
        .and_then(|f| f.parse().ok())
        .ok_or_else(|| Error::Protocol(format!("malformed query response: {}", line)))
}

fn parse_header(line: &str) -> Result<Message<'_>> {
    let Some((data, identity)) = line[1..].rsplit_once('#') else {
        return Err(Error::Protocol(format!("header without category: {}", line)));
    };

    let values = data.split(',').map(str::trim).collect();
    Ok(Message::Header {
        category: HeaderCategory::from_wire(identity.trim()),
        values,
    })
}

fn parse_tuple(line: &str) -> Result<Message<'_>> {
    line.strip_suffix(']')
        .map(|inner| Message::Tuple(&inner[1..]))
        .ok_or_else(|| Error::Protocol(format!("unterminated tuple: {}", line)))
}
