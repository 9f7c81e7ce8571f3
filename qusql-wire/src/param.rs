//! Parameters bound to prepared statements
use std::borrow::Cow;

use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::{
    constants::type_,
    packet_io::put_lenenc,
    temporal::{DateTime, Time},
    value::{Value, ValueKind},
};

/// Text and blob parameters at least this long are sent as long data
pub const LONG_DATA_THRESHOLD: usize = 0xFB;

/// Size of each long data package
pub const LONG_DATA_CHUNK: usize = 1 << 20;

/// Error type returned when binding parameters
#[derive(Error, Debug)]
pub enum BindError {
    /// To many argument has been bound to the query
    #[error("to many arguments given")]
    TooManyArgumentsBound,
    /// Not enough arguments has been bound to the query
    #[error("missing argument")]
    TooFewArgumentsBound,
    /// Error converting between integer types
    #[error("try from int")]
    TryFromInt(#[from] std::num::TryFromIntError),
    /// The value cannot be encoded as the column type
    #[error("cannot encode {got:?} as {expected:?}")]
    TypeMismatch {
        /// The kind the column requires
        expected: ValueKind,
        /// The kind of the value given
        got: ValueKind,
    },
    /// Serializing a json parameter failed
    #[error("json serialization failed")]
    Json,
}

const _: () = {
    assert!(size_of::<BindError>() <= 8);
};

/// Result type returned when binding parameters
pub type BindResult<T> = Result<T, BindError>;

/// A parameter of a prepared statement
pub enum Param<'a> {
    /// SQL NULL
    Null,
    /// Sent as TINY
    Bool(bool),
    /// Sent as LONG if it fits in 32 bits, otherwise as LONGLONG
    Int(i64),
    /// Sent as unsigned LONGLONG
    UInt(u64),
    /// Sent as DOUBLE
    Double(f64),
    /// Sent as STRING
    Text(Cow<'a, str>),
    /// Sent as LONG_BLOB
    Bytes(Cow<'a, [u8]>),
    /// Sent as DATETIME
    DateTime(DateTime),
    /// Sent as TIME
    Time(Time),
    /// Serialized and sent as STRING
    Json(serde_json::Value),
    /// Streamed to the server with long data packages and sent as LONG_BLOB
    Reader(Box<dyn AsyncRead + Unpin + Send + 'a>),
}

impl std::fmt::Debug for Param<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Param::Null => f.write_str("Null"),
            Param::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            Param::Int(v) => f.debug_tuple("Int").field(v).finish(),
            Param::UInt(v) => f.debug_tuple("UInt").field(v).finish(),
            Param::Double(v) => f.debug_tuple("Double").field(v).finish(),
            Param::Text(v) => f.debug_tuple("Text").field(v).finish(),
            Param::Bytes(v) => f.debug_tuple("Bytes").field(&v.len()).finish(),
            Param::DateTime(v) => f.debug_tuple("DateTime").field(v).finish(),
            Param::Time(v) => f.debug_tuple("Time").field(v).finish(),
            Param::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Param::Reader(_) => f.write_str("Reader"),
        }
    }
}

impl<'a> Param<'a> {
    /// Construct a parameter streamed from a reader
    pub fn reader(r: impl AsyncRead + Unpin + Send + 'a) -> Self {
        Param::Reader(Box::new(r))
    }

    /// The kind of this parameter
    pub fn kind(&self) -> ValueKind {
        match self {
            Param::Null => ValueKind::Null,
            Param::Bool(_) => ValueKind::Bool,
            Param::Int(_) => ValueKind::Int,
            Param::UInt(_) => ValueKind::UInt,
            Param::Double(_) => ValueKind::Double,
            Param::Text(_) => ValueKind::Text,
            Param::Bytes(_) => ValueKind::Bytes,
            Param::DateTime(_) => ValueKind::DateTime,
            Param::Time(_) => ValueKind::Time,
            Param::Json(_) => ValueKind::Json,
            Param::Reader(_) => ValueKind::Reader,
        }
    }

    /// The type and flag byte announced for this parameter in COM_STMT_EXECUTE
    pub fn type_code(&self) -> (u8, u8) {
        match self {
            Param::Null => (type_::NULL, 0),
            Param::Bool(_) => (type_::TINY, 0),
            Param::Int(v) if i32::try_from(*v).is_ok() => (type_::LONG, 0),
            Param::Int(_) => (type_::LONG_LONG, 0),
            Param::UInt(_) => (type_::LONG_LONG, 0x80),
            Param::Double(_) => (type_::DOUBLE, 0),
            Param::Text(_) | Param::Json(_) => (type_::STRING, 0),
            Param::Bytes(_) | Param::Reader(_) => (type_::LONG_BLOB, 0),
            Param::DateTime(_) => (type_::DATETIME, 0),
            Param::Time(_) => (type_::TIME, 0),
        }
    }

    /// The value is sent with COM_STMT_SEND_LONG_DATA instead of inline
    pub fn is_long_data(&self) -> bool {
        match self {
            Param::Text(v) => v.len() >= LONG_DATA_THRESHOLD,
            Param::Bytes(v) => v.len() >= LONG_DATA_THRESHOLD,
            Param::Reader(_) => true,
            _ => false,
        }
    }

    /// The bytes sent for text and blob parameters
    pub(crate) fn data(&self) -> Option<&[u8]> {
        match self {
            Param::Text(v) => Some(v.as_bytes()),
            Param::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Append the inline binary encoding of the value
    ///
    /// Null parameters are encoded in the null bitmap and write nothing
    pub fn encode(&self, buf: &mut BytesMut) -> BindResult<()> {
        match self {
            Param::Null => (),
            Param::Bool(v) => buf.put_u8((*v).into()),
            Param::Int(v) => match i32::try_from(*v) {
                Ok(v) => buf.put_i32_le(v),
                Err(_) => buf.put_i64_le(*v),
            },
            Param::UInt(v) => buf.put_u64_le(*v),
            Param::Double(v) => buf.put_f64_le(*v),
            Param::Text(v) => {
                put_lenenc(buf, v.len() as u64);
                buf.put_slice(v.as_bytes());
            }
            Param::Bytes(v) => {
                put_lenenc(buf, v.len() as u64);
                buf.put_slice(v);
            }
            Param::DateTime(v) => v.encode_binary(buf),
            Param::Time(v) => v.encode_binary(buf),
            Param::Json(v) => {
                let s = serde_json::to_vec(v).map_err(|_| BindError::Json)?;
                put_lenenc(buf, s.len() as u64);
                buf.put_slice(&s);
            }
            // A reader that turned out to be empty
            Param::Reader(_) => put_lenenc(buf, 0),
        }
        Ok(())
    }
}

impl From<bool> for Param<'_> {
    fn from(v: bool) -> Self {
        Param::Bool(v)
    }
}

/// Implement [From] for integer types that fit in an i64
macro_rules! impl_from_int {
    ($($t:ty),+) => {
        $(
            impl From<$t> for Param<'_> {
                fn from(v: $t) -> Self {
                    Param::Int(v.into())
                }
            }
        )+
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for Param<'_> {
    fn from(v: u64) -> Self {
        Param::UInt(v)
    }
}

impl From<f32> for Param<'_> {
    fn from(v: f32) -> Self {
        Param::Double(v.into())
    }
}

impl From<f64> for Param<'_> {
    fn from(v: f64) -> Self {
        Param::Double(v)
    }
}

impl<'a> From<&'a str> for Param<'a> {
    fn from(v: &'a str) -> Self {
        Param::Text(Cow::Borrowed(v))
    }
}

impl<'a> From<&'a String> for Param<'a> {
    fn from(v: &'a String) -> Self {
        Param::Text(Cow::Borrowed(v))
    }
}

impl From<String> for Param<'_> {
    fn from(v: String) -> Self {
        Param::Text(Cow::Owned(v))
    }
}

impl<'a> From<&'a [u8]> for Param<'a> {
    fn from(v: &'a [u8]) -> Self {
        Param::Bytes(Cow::Borrowed(v))
    }
}

impl From<Vec<u8>> for Param<'_> {
    fn from(v: Vec<u8>) -> Self {
        Param::Bytes(Cow::Owned(v))
    }
}

impl From<DateTime> for Param<'_> {
    fn from(v: DateTime) -> Self {
        Param::DateTime(v)
    }
}

impl From<Time> for Param<'_> {
    fn from(v: Time) -> Self {
        Param::Time(v)
    }
}

impl From<serde_json::Value> for Param<'_> {
    fn from(v: serde_json::Value) -> Self {
        Param::Json(v)
    }
}

impl<'a, T: Into<Param<'a>>> From<Option<T>> for Param<'a> {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Param::Null,
        }
    }
}

impl From<Value> for Param<'_> {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => Param::Null,
            Value::Bool(v) => Param::Bool(v),
            Value::Int(v) => Param::Int(v),
            Value::UInt(v) => Param::UInt(v),
            Value::Double(v) => Param::Double(v),
            Value::Bytes(v) => Param::Bytes(Cow::Owned(v)),
            Value::Text(v) => Param::Text(Cow::Owned(v)),
            Value::DateTime(v) => Param::DateTime(v),
            Value::Time(v) => Param::Time(v),
            Value::Json(v) => Param::Json(v),
        }
    }
}
