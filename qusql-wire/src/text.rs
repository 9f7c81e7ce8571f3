//! The text row protocol used for COM_QUERY results
//!
//! Every value is a length encoded string or 0xFB for NULL, and is
//! converted according to the column type.
use crate::{
    charset::Charset,
    codec::{bit_value, json_value, string_or_bytes},
    constants::type_,
    decode::Column,
    package_parser::{DecodeError, DecodeResult},
    temporal::{DateTime, Time},
    value::Value,
};

/// Result of parsing an integer in text form
enum Parsed<T> {
    /// The value fits
    Value(T),
    /// All digits, but too large
    Overflow,
}

/// Accumulate the digits of an unsigned integer
fn parse_unsigned(s: &[u8]) -> DecodeResult<Parsed<u64>> {
    if s.is_empty() {
        return Err(DecodeError::InvalidValue);
    }
    let mut v: u64 = 0;
    let mut overflow = false;
    for c in s {
        if !c.is_ascii_digit() {
            return Err(DecodeError::InvalidValue);
        }
        match v.checked_mul(10).and_then(|v| v.checked_add(u64::from(c - b'0'))) {
            Some(n) => v = n,
            None => overflow = true,
        }
    }
    Ok(if overflow {
        Parsed::Overflow
    } else {
        Parsed::Value(v)
    })
}

/// Accumulate the digits of a signed integer, using the u64 magnitude
fn parse_signed(s: &[u8]) -> DecodeResult<Parsed<i64>> {
    let (negative, digits) = match s.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some((b'+', rest)) => (false, rest),
        _ => (false, s),
    };
    let Parsed::Value(m) = parse_unsigned(digits)? else {
        return Ok(Parsed::Overflow);
    };
    let v = if negative {
        if m == 1 << 63 {
            Some(i64::MIN)
        } else {
            i64::try_from(m).ok().map(|v| -v)
        }
    } else {
        i64::try_from(m).ok()
    };
    Ok(match v {
        Some(v) => Parsed::Value(v),
        None => Parsed::Overflow,
    })
}

/// Decode a non-null value of the text protocol
pub fn decode_text_value(
    col: &Column,
    bytes: &[u8],
    charset: Charset,
    raw_json: bool,
) -> DecodeResult<Value> {
    let text = || -> DecodeResult<Value> { Ok(Value::Text(std::str::from_utf8(bytes)?.to_string())) };
    match col.r#type {
        type_::TINY | type_::SHORT | type_::YEAR | type_::INT24 | type_::LONG => {
            match parse_signed(bytes)? {
                Parsed::Value(v) => Ok(Value::Int(v)),
                Parsed::Overflow => text(),
            }
        }
        type_::LONG_LONG if col.is_unsigned() => match parse_unsigned(bytes)? {
            Parsed::Value(v) => Ok(Value::UInt(v)),
            Parsed::Overflow => text(),
        },
        type_::LONG_LONG => match parse_signed(bytes)? {
            Parsed::Value(v) => Ok(Value::Int(v)),
            Parsed::Overflow => text(),
        },
        type_::FLOAT | type_::DOUBLE => std::str::from_utf8(bytes)?
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| DecodeError::InvalidValue),
        type_::DECIMAL | type_::NEW_DECIMAL => text(),
        type_::DATE | type_::DATETIME | type_::TIMESTAMP | type_::NEW_DATE => {
            Ok(Value::DateTime(DateTime::parse_text(bytes)?))
        }
        type_::TIME => Ok(Value::Time(Time::parse_text(bytes)?)),
        type_::BIT => Ok(bit_value(col, bytes)),
        type_::JSON => json_value(bytes, raw_json),
        type_::NULL => Ok(Value::Null),
        _ => string_or_bytes(col, bytes, charset),
    }
}
