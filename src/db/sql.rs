//! SQL text helpers: identifier quoting, literal rendering, statement binding.

use crate::{Error, Result};

/// A value bound into a statement template.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    BigInt(i64),
    Double(f64),
    Text(String),
}

impl SqlValue {
    /// Render the value as a MonetDB literal.
    pub fn render(&self) -> Result<String> {
        match self {
            SqlValue::BigInt(v) => Ok(v.to_string()),
            SqlValue::Double(v) if v.is_finite() => Ok(format!("{:e}", v)),
            SqlValue::Double(v) => Err(Error::Internal(format!(
                "non-finite double {} has no SQL literal",
                v
            ))),
            SqlValue::Text(s) => Ok(quote_literal(s)),
        }
    }
}

/// Quote an identifier, doubling embedded double quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal. MonetDB treats backslash as an escape character
/// inside string literals, so both backslashes and quotes are escaped.
pub fn quote_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("''"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Substitute `?` placeholders in `template` with rendered parameters, in order.
pub fn bind(template: &str, params: &[SqlValue]) -> Result<String> {
    let placeholders = template.matches('?').count();
    if placeholders != params.len() {
        return Err(Error::Internal(format!(
            "statement has {} placeholders but {} parameters were bound",
            placeholders,
            params.len()
        )));
    }

    let mut out = String::with_capacity(template.len() + params.len() * 8);
    let mut params = params.iter();
    for (i, part) in template.split('?').enumerate() {
        if i > 0 {
            if let Some(param) = params.next() {
                out.push_str(&param.render()?);
            }
        }
        out.push_str(part);
    }
    Ok(out)
}

/// Read-path escaping of matcher values: quotes become `\'`, and backslashes
/// are doubled first so a trailing `\` cannot swallow the escape.
pub fn escape_single_quotes(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Rewrite the literal regex wildcard `.*` to the SQL `%` wildcard.
pub fn replace_dot_star(value: &str) -> String {
    value.replace(".*", "%")
}
