//! SQL values and literal formatting.

use std::cmp::Ordering;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// A single row keyed by column name, in column order.
pub type Row = IndexMap<SmolStr, SqlValue>;

/// A value read from or written to the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum SqlValue {
    /// SQL `NULL`.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Character data.
    Text(String),
    /// Date/time value.
    #[serde(with = "time::serde::rfc3339")]
    Timestamp(OffsetDateTime),
    /// Structured value (JSON/JSONB columns, composite types).
    Json(serde_json::Value),
}

impl SqlValue {
    /// Type tag used for variables and diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "boolean",
            SqlValue::Int(_) => "integer",
            SqlValue::Float(_) => "float",
            SqlValue::Text(_) => "text",
            SqlValue::Timestamp(_) => "timestamp",
            SqlValue::Json(_) => "json",
        }
    }

    /// Whether the value is SQL `NULL`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Compare two values of compatible types. Integers and floats compare
    /// numerically; incompatible types (and `NULL`) yield `None`.
    #[must_use]
    pub fn compare(&self, other: &SqlValue) -> Option<Ordering> {
        match (self, other) {
            (SqlValue::Int(left), SqlValue::Int(right)) => Some(left.cmp(right)),
            (SqlValue::Int(left), SqlValue::Float(right)) => (*left as f64).partial_cmp(right),
            (SqlValue::Float(left), SqlValue::Int(right)) => left.partial_cmp(&(*right as f64)),
            (SqlValue::Float(left), SqlValue::Float(right)) => left.partial_cmp(right),
            (SqlValue::Text(left), SqlValue::Text(right)) => Some(left.cmp(right)),
            (SqlValue::Bool(left), SqlValue::Bool(right)) => Some(left.cmp(right)),
            (SqlValue::Timestamp(left), SqlValue::Timestamp(right)) => Some(left.cmp(right)),
            (SqlValue::Json(left), SqlValue::Json(right)) => (left == right).then_some(Ordering::Equal),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Bool(value) => write!(f, "{value}"),
            SqlValue::Int(value) => write!(f, "{value}"),
            SqlValue::Float(value) => write!(f, "{value}"),
            SqlValue::Text(value) => f.write_str(value),
            SqlValue::Timestamp(value) => f.write_str(&format_timestamp(*value)),
            SqlValue::Json(value) => write!(f, "{value}"),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(i64::from(value))
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<OffsetDateTime> for SqlValue {
    fn from(value: OffsetDateTime) -> Self {
        SqlValue::Timestamp(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => SqlValue::Null,
            serde_json::Value::Bool(value) => SqlValue::Bool(value),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(value) => SqlValue::Int(value),
                None => number.as_f64().map_or(SqlValue::Null, SqlValue::Float),
            },
            serde_json::Value::String(text) => SqlValue::Text(text),
            other => SqlValue::Json(other),
        }
    }
}

/// Render a value as a SQL literal.
///
/// `NULL`, `TRUE` and `FALSE` stay bare, text is single-quoted with embedded
/// quotes doubled and timestamps become quoted ISO-8601 text. Non-finite
/// floats use the quoted spellings `'NaN'`, `'Infinity'` and `'-Infinity'`.
#[must_use]
pub fn format_sql_value(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Text(text) => quote_literal(text),
        SqlValue::Timestamp(value) => quote_literal(&format_timestamp(*value)),
        SqlValue::Json(value) => quote_literal(&value.to_string()),
        SqlValue::Bool(true) => "TRUE".to_string(),
        SqlValue::Bool(false) => "FALSE".to_string(),
        SqlValue::Int(value) => value.to_string(),
        SqlValue::Float(value) if value.is_nan() => "'NaN'".to_string(),
        SqlValue::Float(value) if value.is_infinite() => {
            if value.is_sign_positive() {
                "'Infinity'".to_string()
            } else {
                "'-Infinity'".to_string()
            }
        }
        SqlValue::Float(value) => value.to_string(),
    }
}

/// Wrap an identifier in double quotes, doubling embedded quotes.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn format_timestamp(value: OffsetDateTime) -> String {
    value
        .format(&Rfc3339)
        .unwrap_or_else(|_| value.unix_timestamp().to_string())
}
