//! Decoding of text from the character set the server sends results in
use crate::{constants::BINARY_COLLATION, package_parser::DecodeResult};

/// The character set used to decode text values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    /// utf8, utf8mb3, utf8mb4 and ascii
    #[default]
    Utf8,
    /// latin1, decoded byte for byte
    Latin1,
    /// `character_set_results` is NULL or binary, values are returned as received
    Binary,
}

impl Charset {
    /// Look up a character set by the name the server reports in session tracking
    ///
    /// Unknown character sets fall back to utf-8
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "latin1" => Charset::Latin1,
            "binary" | "null" | "" => Charset::Binary,
            _ => Charset::Utf8,
        }
    }

    /// The character set of a collation id
    pub fn from_collation(id: u16) -> Self {
        match id {
            BINARY_COLLATION => Charset::Binary,
            5 | 8 | 15 | 31 | 47 | 48 | 49 | 94 => Charset::Latin1,
            _ => Charset::Utf8,
        }
    }

    /// The name of the character set
    pub fn name(&self) -> &'static str {
        match self {
            Charset::Utf8 => "utf8mb4",
            Charset::Latin1 => "latin1",
            Charset::Binary => "binary",
        }
    }

    /// Decode text in this character set
    pub fn decode(&self, bytes: &[u8]) -> DecodeResult<String> {
        match self {
            Charset::Utf8 | Charset::Binary => Ok(std::str::from_utf8(bytes)?.to_string()),
            Charset::Latin1 => Ok(bytes.iter().map(|b| char::from(*b)).collect()),
        }
    }
}
