//! Contains parser used to parse whole packages and row values
use bytes::Buf;
use thiserror::Error;

use crate::value::ValueKind;

/// Error returned by the [PackageParser] and the value decoders
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The package was shorter than expected
    #[error("End of package")]
    EndOfPackage,
    /// You are decoding more columns than there is in the response
    #[error("End of columns")]
    EndOfColumns,
    /// A string in a package was not utf-8 as expected
    #[error("Utf-8 error at {valid_up_to}")]
    Utf8Error {
        /// The string is valid utf-8 until this many bytes
        valid_up_to: u32,
        /// The length of the error
        error_len: Option<u8>,
    },
    /// We expected a non-null value, but found null
    #[error("Unexpected null value")]
    Null,
    /// The value we are decoding has a different kind than expected
    #[error("Type error, expected {expected:?} got {got:?}")]
    TypeError {
        /// The kind of the value found
        got: ValueKind,
        /// The kind we expected
        expected: ValueKind,
    },
    /// A variable length encoded field has an unexpected size
    #[error("Invalid size {0}")]
    InvalidSize(u8),
    /// The encoded value is not valid for its type
    #[error("Invalid value")]
    InvalidValue,
    /// The value does not fit in the requested type
    #[error("Value out of range")]
    OutOfRange,
    /// A JSON column did not contain valid JSON
    #[error("Invalid json at line {line} column {column}")]
    Json {
        /// Line of the first error
        line: u32,
        /// Column of the first error
        column: u32,
    },
}

const _: () = {
    assert!(size_of::<DecodeError>() <= 12);
};

impl From<bytes::TryGetError> for DecodeError {
    fn from(_value: bytes::TryGetError) -> Self {
        DecodeError::EndOfPackage
    }
}

impl From<std::str::Utf8Error> for DecodeError {
    fn from(value: std::str::Utf8Error) -> Self {
        DecodeError::Utf8Error {
            valid_up_to: value.valid_up_to().try_into().unwrap_or(u32::MAX),
            error_len: value.error_len().map(|v| v.try_into().unwrap_or(0xFF)),
        }
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(value: serde_json::Error) -> Self {
        DecodeError::Json {
            line: value.line().try_into().unwrap_or(u32::MAX),
            column: value.column().try_into().unwrap_or(u32::MAX),
        }
    }
}

/// Result returned by [PackageParser]
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// Parse a Mysql/Mariadb package
#[derive(Clone, Copy)]
pub struct PackageParser<'a>(&'a [u8]);

impl<'a> PackageParser<'a> {
    /// Construct a new [PackageParser] for the given package
    pub fn new(package: &'a [u8]) -> Self {
        Self(package)
    }

    /// Number of bytes left in the package
    #[inline]
    pub fn remaining(&self) -> usize {
        self.0.len()
    }

    /// True if the whole package has been parsed
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Look at the next byte without consuming it
    #[inline]
    pub fn peek_u8(&self) -> Option<u8> {
        self.0.first().copied()
    }

    /// Read a u8 from the package
    #[inline]
    pub fn get_u8(&mut self) -> DecodeResult<u8> {
        Ok(self.0.try_get_u8()?)
    }

    /// Read a i8 from the package
    #[inline]
    pub fn get_i8(&mut self) -> DecodeResult<i8> {
        Ok(self.0.try_get_i8()?)
    }

    /// Read a u16 from the package
    #[inline]
    pub fn get_u16(&mut self) -> DecodeResult<u16> {
        Ok(self.0.try_get_u16_le()?)
    }

    /// Read a i16 from the package
    #[inline]
    pub fn get_i16(&mut self) -> DecodeResult<i16> {
        Ok(self.0.try_get_i16_le()?)
    }

    /// Read a u32 from the package
    #[inline]
    pub fn get_u32(&mut self) -> DecodeResult<u32> {
        Ok(self.0.try_get_u32_le()?)
    }

    /// Read a i32 from the package
    #[inline]
    pub fn get_i32(&mut self) -> DecodeResult<i32> {
        Ok(self.0.try_get_i32_le()?)
    }

    /// Read a u64 from the package
    #[inline]
    pub fn get_u64(&mut self) -> DecodeResult<u64> {
        Ok(self.0.try_get_u64_le()?)
    }

    /// Read a i64 from the package
    #[inline]
    pub fn get_i64(&mut self) -> DecodeResult<i64> {
        Ok(self.0.try_get_i64_le()?)
    }

    /// Read a f32 from the package
    #[inline]
    pub fn get_f32(&mut self) -> DecodeResult<f32> {
        Ok(self.0.try_get_f32_le()?)
    }

    /// Read a f64 from the package
    #[inline]
    pub fn get_f64(&mut self) -> DecodeResult<f64> {
        Ok(self.0.try_get_f64_le()?)
    }

    /// Read a u24 from the package
    #[inline]
    pub fn get_u24(&mut self) -> DecodeResult<u32> {
        let a: u32 = self.get_u8()?.into();
        let b: u32 = self.get_u8()?.into();
        let c: u32 = self.get_u8()?.into();
        Ok(a | (b << 8) | (c << 16))
    }

    /// Read a little endian unsigned integer of `len` bytes
    pub fn get_uint(&mut self, len: usize) -> DecodeResult<u64> {
        if len > 8 {
            return Err(DecodeError::InvalidSize(len.try_into().unwrap_or(0xFF)));
        }
        let bytes = self.get_bytes(len)?;
        Ok(bytes
            .iter()
            .rev()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    /// Read a variable encoded length
    ///
    /// See <https://mariadb.com/docs/server/reference/clientserver-protocol/protocol-data-types#length-encoded-integers>
    #[inline]
    pub fn get_lenenc(&mut self) -> DecodeResult<u64> {
        let v = self.get_u8()?;
        Ok(match v {
            0xFC => self.get_u16()?.into(),
            0xFD => self.get_u24()?.into(),
            0xFE => self.get_u64()?,
            v => v.into(),
        })
    }

    /// Read a variable encoded blob
    #[inline]
    pub fn get_lenenc_blob(&mut self) -> DecodeResult<&'a [u8]> {
        let len = self.get_lenenc()?;
        self.get_bytes(len.try_into().map_err(|_| DecodeError::EndOfPackage)?)
    }

    /// Read a null-terminated byte string, the terminator is consumed but not returned
    #[inline]
    pub fn get_null_bytes(&mut self) -> DecodeResult<&'a [u8]> {
        match self.0.iter().position(|v| *v == 0) {
            Some(p) => {
                let v = &self.0[..p];
                self.0.advance(p + 1);
                Ok(v)
            }
            None => Err(DecodeError::EndOfPackage),
        }
    }

    /// Read a null-terminated string
    #[inline]
    pub fn get_null_str(&mut self) -> DecodeResult<&'a str> {
        Ok(str::from_utf8(self.get_null_bytes()?)?)
    }

    /// Read the rest of the package as bytes
    #[inline]
    pub fn get_eof_bytes(&mut self) -> &'a [u8] {
        let v = self.0;
        self.0 = &[];
        v
    }

    /// Read some bytes from the package
    #[inline]
    pub fn get_bytes(&mut self, len: usize) -> DecodeResult<&'a [u8]> {
        match self.0.get(..len) {
            Some(v) => {
                self.0.advance(len);
                Ok(v)
            }
            None => Err(DecodeError::EndOfPackage),
        }
    }

    /// Skip some bytes of the package
    #[inline]
    pub fn skip(&mut self, len: usize) -> DecodeResult<()> {
        self.get_bytes(len)?;
        Ok(())
    }
}
