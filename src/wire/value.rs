//! Column descriptions and typed scalar conversion.

use crate::{Error, Result};

/// Conversion family for a declared MonetDB column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Boolean,
    Integer,
    HugeInt,
    Float,
    Decimal,
    Text,
    Blob,
}

impl ColumnKind {
    pub fn from_type_name(type_name: &str) -> Self {
        match type_name {
            "boolean" => Self::Boolean,
            "tinyint" | "smallint" | "int" | "bigint" | "oid" | "serial" | "wrd"
            | "month_interval" | "sec_interval" | "day_interval" => Self::Integer,
            "hugeint" => Self::HugeInt,
            "real" | "double" | "float" => Self::Float,
            "decimal" => Self::Decimal,
            "blob" => Self::Blob,
            _ => Self::Text,
        }
    }
}

/// Metadata for one result column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescription {
    pub table_name: String,
    pub name: String,
    pub type_name: String,
    pub kind: ColumnKind,
    pub display_size: usize,
    pub internal_size: usize,
    pub precision: u32,
    pub scale: u32,
}

/// One decoded field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    HugeInt(i128),
    Double(f64),
    Decimal { unscaled: i128, scale: u32 },
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    /// Convert a raw field into the column's declared type.
    pub fn parse(raw: &str, column: &ColumnDescription) -> Result<Self> {
        let raw = raw.trim();
        if raw == "NULL" {
            return Ok(Value::Null);
        }

        let conversion = |message: String| Error::Conversion {
            column: column.name.clone(),
            message,
        };

        match column.kind {
            ColumnKind::Boolean => match raw {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                other => Err(conversion(format!("invalid boolean '{}'", other))),
            },
            ColumnKind::Integer => raw
                .parse()
                .map(Value::Int)
                .map_err(|e| conversion(format!("invalid integer '{}': {}", raw, e))),
            ColumnKind::HugeInt => raw
                .parse()
                .map(Value::HugeInt)
                .map_err(|e| conversion(format!("invalid hugeint '{}': {}", raw, e))),
            ColumnKind::Float => raw
                .parse()
                .map(Value::Double)
                .map_err(|e| conversion(format!("invalid float '{}': {}", raw, e))),
            ColumnKind::Decimal => parse_decimal(raw, column.scale).map_err(conversion),
            ColumnKind::Blob => hex::decode(raw)
                .map(Value::Blob)
                .map_err(|e| conversion(format!("invalid blob: {}", e))),
            ColumnKind::Text => {
                if raw.starts_with('"') {
                    unquote(raw).map(Value::Text).map_err(conversion)
                } else {
                    Ok(Value::Text(raw.to_string()))
                }
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::HugeInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Decimal { unscaled, scale } => {
                Some(*unscaled as f64 / 10f64.powi(*scale as i32))
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

fn parse_decimal(raw: &str, scale: u32) -> std::result::Result<Value, String> {
    let (negative, digits) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));

    if (whole.is_empty() && fraction.is_empty())
        || !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit())
    {
        return Err(format!("invalid decimal '{}'", raw));
    }
    if fraction.len() > scale as usize {
        return Err(format!(
            "decimal '{}' has more than {} fractional digits",
            raw, scale
        ));
    }

    let padded = format!("{}{}{}", whole, fraction, "0".repeat(scale as usize - fraction.len()));
    let magnitude: i128 = padded
        .trim_start_matches('0')
        .parse()
        .or_else(|e| if padded.chars().all(|c| c == '0') { Ok(0) } else { Err(e) })
        .map_err(|e| format!("invalid decimal '{}': {}", raw, e))?;

    Ok(Value::Decimal {
        unscaled: if negative { -magnitude } else { magnitude },
        scale,
    })
}

/// Strip surrounding quotes and undo MonetDB's C-style escaping.
fn unquote(raw: &str) -> std::result::Result<String, String> {
    let inner = raw
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| format!("unterminated string {}", raw))?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{0c}'),
            Some(d @ '0'..='7') => {
                let mut code = d.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.clone().next().and_then(|n| n.to_digit(8)) {
                        Some(v) => {
                            code = code * 8 + v;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            Some(other) => out.push(other),
            None => return Err(format!("dangling escape in {}", raw)),
        }
    }
    Ok(out)
}
