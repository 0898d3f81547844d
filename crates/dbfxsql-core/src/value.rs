//! Canonical value domain.
//!
//! Rows read from either engine are normalized into [`Value`] before they
//! are compared or written, so that a DBF `N(10,2)` column and a SQLite
//! `INTEGER` column holding the same number compare equal instead of
//! diffing on driver string representation.

use crate::error::SyncError;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Canonical type universe shared by both engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Text,
    Integer,
    /// Fixed-point decimal (DBF numerics, SQLite REAL/NUMERIC).
    Decimal,
    Boolean,
    Date,
    Timestamp,
    Binary,
    Null,
}

impl DataType {
    pub fn as_str(&self) -> &str {
        match self {
            DataType::Text => "text",
            DataType::Integer => "integer",
            DataType::Decimal => "decimal",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::Timestamp => "timestamp",
            DataType::Binary => "binary",
            DataType::Null => "null",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single normalized field value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Binary(Vec<u8>),
    Null,
}

impl Value {
    /// The canonical type this value belongs to.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Text(_) => DataType::Text,
            Value::Integer(_) => DataType::Integer,
            Value::Decimal(_) => DataType::Decimal,
            Value::Boolean(_) => DataType::Boolean,
            Value::Date(_) => DataType::Date,
            Value::Timestamp(_) => DataType::Timestamp,
            Value::Binary(_) => DataType::Binary,
            Value::Null => DataType::Null,
        }
    }

    /// Whether this value counts as "no data" for the blank-snapshot rule.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            Value::Binary(b) => b.is_empty(),
            _ => false,
        }
    }

    /// Coerce a raw driver/CLI string into the canonical domain.
    ///
    /// Trailing whitespace from fixed-width text fields is stripped before
    /// coercion. Empty input normalizes to [`Value::Null`] except when the
    /// target type is text.
    pub fn coerce(raw: &str, target: DataType, field: &str) -> Result<Value, SyncError> {
        let raw = raw.trim_end();

        if raw.is_empty() && target != DataType::Text {
            return Ok(Value::Null);
        }

        let not_valid = || SyncError::ValueNotValid {
            value: raw.to_string(),
            field: field.to_string(),
            type_tag: target.to_string(),
        };

        match target {
            DataType::Text => Ok(Value::Text(raw.to_string())),
            DataType::Integer => raw.parse::<i64>().map(Value::Integer).map_err(|_| not_valid()),
            DataType::Decimal => raw.parse::<Decimal>().map(Value::Decimal).map_err(|_| not_valid()),
            DataType::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" | "t" | "y" | "1" => Ok(Value::Boolean(true)),
                "false" | "f" | "n" | "0" => Ok(Value::Boolean(false)),
                _ => Err(not_valid()),
            },
            DataType::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| not_valid()),
            DataType::Timestamp => NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
                .map(Value::Timestamp)
                .map_err(|_| not_valid()),
            DataType::Binary => Ok(Value::Binary(raw.as_bytes().to_vec())),
            DataType::Null => Ok(Value::Null),
        }
    }

    /// Render the value as the literal string `coerce` accepts back.
    pub fn to_literal(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Decimal(d) => d.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Timestamp(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
            Value::Binary(b) => String::from_utf8_lossy(b).into_owned(),
            Value::Null => String::new(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_literal())
    }
}

/// Equality is numeric-aware across `Integer` and `Decimal`: the two
/// engines declare numbers differently, yet `1` and `1.0` are the same
/// datum and must not show up as a diff.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::Integer(a), Value::Decimal(b)) | (Value::Decimal(b), Value::Integer(a)) => {
                Decimal::from(*a) == *b
            }
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Binary(a), Value::Binary(b)) => a == b,
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => a.partial_cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.partial_cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) => a.partial_cmp(b),
            (Value::Integer(a), Value::Decimal(b)) => Decimal::from(*a).partial_cmp(b),
            (Value::Decimal(a), Value::Integer(b)) => a.partial_cmp(&Decimal::from(*b)),
            (Value::Boolean(a), Value::Boolean(b)) => a.partial_cmp(b),
            (Value::Date(a), Value::Date(b)) => a.partial_cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.partial_cmp(b),
            (Value::Binary(a), Value::Binary(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}
