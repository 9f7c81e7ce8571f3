//! Owned values decoded from rows
use crate::temporal::{DateTime, Time};

/// A single decoded column value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL, or a value skipped because it was too long
    Null,
    /// A BIT(1) column
    Bool(bool),
    /// Signed integer columns and unsigned columns narrower than 64 bits
    Int(i64),
    /// Unsigned BIGINT columns
    UInt(u64),
    /// FLOAT and DOUBLE columns
    Double(f64),
    /// Binary strings and blobs
    Bytes(Vec<u8>),
    /// Character strings, DECIMAL and integers too large for 64 bits
    Text(String),
    /// DATE, DATETIME and TIMESTAMP columns
    DateTime(DateTime),
    /// TIME columns
    Time(Time),
    /// Parsed JSON columns
    Json(serde_json::Value),
}

/// The kind of a [Value], used in error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueKind {
    #[allow(missing_docs)]
    Null,
    #[allow(missing_docs)]
    Bool,
    #[allow(missing_docs)]
    Int,
    #[allow(missing_docs)]
    UInt,
    #[allow(missing_docs)]
    Double,
    #[allow(missing_docs)]
    Bytes,
    #[allow(missing_docs)]
    Text,
    #[allow(missing_docs)]
    DateTime,
    #[allow(missing_docs)]
    Time,
    #[allow(missing_docs)]
    Json,
    /// A streamed parameter
    Reader,
}

impl Value {
    /// The kind of this value
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::UInt(_) => ValueKind::UInt,
            Value::Double(_) => ValueKind::Double,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Text(_) => ValueKind::Text,
            Value::DateTime(_) => ValueKind::DateTime,
            Value::Time(_) => ValueKind::Time,
            Value::Json(_) => ValueKind::Json,
        }
    }

    /// True if this is [Value::Null]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Return the value as a string slice, if it is text
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Return the value as a signed integer if it is an integer that fits
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => (*v).try_into().ok(),
            Value::Bool(v) => Some((*v).into()),
            _ => None,
        }
    }
}

impl From<DateTime> for Value {
    fn from(v: DateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<Time> for Value {
    fn from(v: Time) -> Self {
        Value::Time(v)
    }
}
