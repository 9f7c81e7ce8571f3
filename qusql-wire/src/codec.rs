//! The binary row protocol
//!
//! A binary row is a 0x00 header, a null bitmap with an offset of two bits and
//! the non-null values in column order. Fixed width types are sent little
//! endian, temporal types with a length byte, and everything else as length
//! encoded bytes.
//!
//! See <https://mariadb.com/docs/server/reference/clientserver-protocol/4-server-response-packets/resultset-row#binary-resultset-row>
use bytes::{BufMut, BytesMut};

use crate::{
    charset::Charset,
    constants::type_,
    decode::Column,
    package_parser::{DecodeError, DecodeResult, PackageParser},
    packet_io::put_lenenc,
    param::{BindError, BindResult},
    temporal::{DateTime, Time},
    value::{Value, ValueKind},
};

/// How a value of a column is framed in a binary row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryWidth {
    /// A fixed number of bytes
    Fixed(usize),
    /// A length byte followed by that many bytes
    Temporal,
    /// Length encoded bytes
    LengthEncoded,
}

/// The framing of values of a column in the binary protocol
pub fn binary_width(col: &Column) -> BinaryWidth {
    match col.r#type {
        type_::TINY => BinaryWidth::Fixed(1),
        type_::SHORT | type_::YEAR => BinaryWidth::Fixed(2),
        type_::INT24 | type_::LONG | type_::FLOAT => BinaryWidth::Fixed(4),
        type_::LONG_LONG | type_::DOUBLE => BinaryWidth::Fixed(8),
        type_::NULL => BinaryWidth::Fixed(0),
        type_::DATE | type_::DATETIME | type_::TIMESTAMP | type_::NEW_DATE | type_::TIME => {
            BinaryWidth::Temporal
        }
        _ => BinaryWidth::LengthEncoded,
    }
}

/// Decode a BIT value, BIT(1) becomes a [Value::Bool]
pub(crate) fn bit_value(col: &Column, bytes: &[u8]) -> Value {
    match bytes {
        [b] if col.column_length <= 1 => Value::Bool(*b != 0),
        _ => Value::Bytes(bytes.to_vec()),
    }
}

/// Decode a JSON value, or return it as text in raw mode
pub(crate) fn json_value(bytes: &[u8], raw_json: bool) -> DecodeResult<Value> {
    if raw_json {
        Ok(Value::Text(std::str::from_utf8(bytes)?.to_string()))
    } else {
        Ok(Value::Json(serde_json::from_slice(bytes)?))
    }
}

/// Decode a string column as bytes or text depending on its character set
pub(crate) fn string_or_bytes(col: &Column, bytes: &[u8], charset: Charset) -> DecodeResult<Value> {
    if col.is_binary() {
        return Ok(Value::Bytes(bytes.to_vec()));
    }
    match charset.decode(bytes) {
        Ok(v) => Ok(Value::Text(v)),
        Err(_) if charset == Charset::Binary => Ok(Value::Bytes(bytes.to_vec())),
        Err(e) => Err(e),
    }
}

/// Decode a non-null binary value
///
/// `body` holds the value without its framing, that is the fixed width bytes,
/// the bytes after the length byte of temporal values or the length encoded content
pub fn decode_binary_value(
    col: &Column,
    body: &[u8],
    charset: Charset,
    raw_json: bool,
) -> DecodeResult<Value> {
    let mut p = PackageParser::new(body);
    let unsigned = col.is_unsigned();
    let v = match col.r#type {
        type_::TINY if unsigned => Value::Int(p.get_u8()?.into()),
        type_::TINY => Value::Int(p.get_i8()?.into()),
        type_::SHORT | type_::YEAR if unsigned => Value::Int(p.get_u16()?.into()),
        type_::SHORT | type_::YEAR => Value::Int(p.get_i16()?.into()),
        type_::INT24 | type_::LONG if unsigned => Value::Int(p.get_u32()?.into()),
        type_::INT24 | type_::LONG => Value::Int(p.get_i32()?.into()),
        type_::LONG_LONG if unsigned => Value::UInt(p.get_u64()?),
        type_::LONG_LONG => Value::Int(p.get_i64()?),
        type_::FLOAT => Value::Double(p.get_f32()?.into()),
        type_::DOUBLE => Value::Double(p.get_f64()?),
        type_::NULL => Value::Null,
        type_::DATE | type_::DATETIME | type_::TIMESTAMP | type_::NEW_DATE => {
            return Ok(Value::DateTime(DateTime::decode_binary(body)?));
        }
        type_::TIME => return Ok(Value::Time(Time::decode_binary(body)?)),
        type_::BIT => return Ok(bit_value(col, body)),
        type_::DECIMAL | type_::NEW_DECIMAL => {
            return Ok(Value::Text(std::str::from_utf8(body)?.to_string()));
        }
        type_::JSON => return json_value(body, raw_json),
        _ => return string_or_bytes(col, body, charset),
    };
    if !p.is_empty() {
        return Err(DecodeError::InvalidSize(body.len().try_into().unwrap_or(0xFF)));
    }
    Ok(v)
}

/// A packed bit array marking NULL values, starting `offset` bits in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NullBitmap {
    /// The packed bits
    bits: Vec<u8>,
    /// Number of unused bits at the start
    offset: usize,
}

impl NullBitmap {
    /// Bytes needed for `columns` values with the given offset
    pub fn len_bytes(columns: usize, offset: usize) -> usize {
        (columns + offset).div_ceil(8)
    }

    /// Construct a bitmap with no values marked as null
    pub fn new(columns: usize, offset: usize) -> Self {
        NullBitmap {
            bits: vec![0; Self::len_bytes(columns, offset)],
            offset,
        }
    }

    /// Construct a bitmap from bytes received
    pub fn from_bytes(bytes: &[u8], offset: usize) -> Self {
        NullBitmap {
            bits: bytes.to_vec(),
            offset,
        }
    }

    /// True if value idx is null
    #[inline]
    pub fn is_null(&self, idx: usize) -> bool {
        let bit = idx + self.offset;
        self.bits.get(bit / 8).is_some_and(|b| b & (1 << (bit % 8)) != 0)
    }

    /// Mark value idx as null
    #[inline]
    pub fn set_null(&mut self, idx: usize) {
        let bit = idx + self.offset;
        if let Some(b) = self.bits.get_mut(bit / 8) {
            *b |= 1 << (bit % 8);
        }
    }

    /// The packed bits
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }
}

/// The kind of value expected by a column when encoding
fn expected_kind(col: &Column) -> ValueKind {
    match col.r#type {
        type_::TINY
        | type_::SHORT
        | type_::YEAR
        | type_::INT24
        | type_::LONG
        | type_::LONG_LONG => ValueKind::Int,
        type_::FLOAT | type_::DOUBLE => ValueKind::Double,
        type_::DATE | type_::DATETIME | type_::TIMESTAMP | type_::NEW_DATE => ValueKind::DateTime,
        type_::TIME => ValueKind::Time,
        type_::NULL => ValueKind::Null,
        type_::JSON => ValueKind::Json,
        _ if col.is_binary() => ValueKind::Bytes,
        _ => ValueKind::Text,
    }
}

/// Append the binary encoding of a non-null value for the given column
pub fn encode_binary_value(buf: &mut BytesMut, col: &Column, value: &Value) -> BindResult<()> {
    let mismatch = || BindError::TypeMismatch {
        expected: expected_kind(col),
        got: value.kind(),
    };
    let unsigned = col.is_unsigned();
    let int: Option<i128> = match value {
        Value::Int(v) => Some((*v).into()),
        Value::UInt(v) => Some((*v).into()),
        Value::Bool(v) => Some((*v).into()),
        _ => None,
    };
    match (col.r#type, value, int) {
        (type_::TINY, _, Some(v)) if unsigned => buf.put_u8(v.try_into()?),
        (type_::TINY, _, Some(v)) => buf.put_i8(v.try_into()?),
        (type_::SHORT | type_::YEAR, _, Some(v)) if unsigned => buf.put_u16_le(v.try_into()?),
        (type_::SHORT | type_::YEAR, _, Some(v)) => buf.put_i16_le(v.try_into()?),
        (type_::INT24 | type_::LONG, _, Some(v)) if unsigned => buf.put_u32_le(v.try_into()?),
        (type_::INT24 | type_::LONG, _, Some(v)) => buf.put_i32_le(v.try_into()?),
        (type_::LONG_LONG, _, Some(v)) if unsigned => buf.put_u64_le(v.try_into()?),
        (type_::LONG_LONG, _, Some(v)) => buf.put_i64_le(v.try_into()?),
        (type_::FLOAT, Value::Double(v), _) => buf.put_f32_le(*v as f32),
        (type_::DOUBLE, Value::Double(v), _) => buf.put_f64_le(*v),
        (type_::DATE | type_::DATETIME | type_::TIMESTAMP | type_::NEW_DATE, Value::DateTime(v), _) => {
            v.encode_binary(buf)
        }
        (type_::TIME, Value::Time(v), _) => v.encode_binary(buf),
        (type_::BIT, Value::Bool(v), _) => {
            buf.put_u8(1);
            buf.put_u8((*v).into());
        }
        (type_::JSON, Value::Json(v), _) => {
            let s = serde_json::to_vec(v).map_err(|_| BindError::Json)?;
            put_lenenc(buf, s.len() as u64);
            buf.put_slice(&s);
        }
        (t, Value::Text(v), _) if binary_width(col) == BinaryWidth::LengthEncoded && t != type_::BIT => {
            put_lenenc(buf, v.len() as u64);
            buf.put_slice(v.as_bytes());
        }
        (_, Value::Bytes(v), _) if binary_width(col) == BinaryWidth::LengthEncoded => {
            put_lenenc(buf, v.len() as u64);
            buf.put_slice(v);
        }
        _ => return Err(mismatch()),
    }
    Ok(())
}

/// Encode a row in the binary row format, as the server would have sent it
pub fn encode_binary_row(columns: &[Column], values: &[Value]) -> BindResult<Vec<u8>> {
    if values.len() > columns.len() {
        return Err(BindError::TooManyArgumentsBound);
    }
    if values.len() < columns.len() {
        return Err(BindError::TooFewArgumentsBound);
    }
    let mut nulls = NullBitmap::new(columns.len(), 2);
    let mut body = BytesMut::new();
    for (idx, (col, value)) in columns.iter().zip(values).enumerate() {
        if value.is_null() {
            nulls.set_null(idx);
        } else {
            encode_binary_value(&mut body, col, value)?;
        }
    }
    let mut out = Vec::with_capacity(1 + nulls.as_bytes().len() + body.len());
    out.push(0);
    out.extend_from_slice(nulls.as_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode a whole binary row package
pub fn decode_binary_row(
    columns: &[Column],
    row: &[u8],
    charset: Charset,
) -> DecodeResult<Vec<Value>> {
    let mut p = PackageParser::new(row);
    if p.get_u8()? != 0 {
        return Err(DecodeError::InvalidValue);
    }
    let nulls = NullBitmap::from_bytes(p.get_bytes(NullBitmap::len_bytes(columns.len(), 2))?, 2);
    let mut values = Vec::with_capacity(columns.len());
    for (idx, col) in columns.iter().enumerate() {
        if nulls.is_null(idx) {
            values.push(Value::Null);
            continue;
        }
        let body = match binary_width(col) {
            BinaryWidth::Fixed(n) => p.get_bytes(n)?,
            BinaryWidth::Temporal => {
                let len = p.get_u8()?;
                p.get_bytes(len.into())?
            }
            BinaryWidth::LengthEncoded => p.get_lenenc_blob()?,
        };
        values.push(decode_binary_value(col, body, charset, false)?);
    }
    if !p.is_empty() {
        return Err(DecodeError::InvalidValue);
    }
    Ok(values)
}
