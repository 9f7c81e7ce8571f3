//! Column metadata and typed decoding of values
use crate::{
    constants::{BINARY_COLLATION, column_flag, type_},
    package_parser::{DecodeError, DecodeResult},
    temporal::{DateTime, Time},
    value::{Value, ValueKind},
};

/// Information about a column in a result set or a prepared statement parameter
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Column {
    /// Always "def"
    pub catalog: String,
    /// Schema the table belongs to
    pub schema: String,
    /// Table alias
    pub table: String,
    /// Table name
    pub org_table: String,
    /// Column alias
    pub name: String,
    /// Column name
    pub org_name: String,
    /// Collation id of the column
    pub character_set: u16,
    /// Declared maximal length of the column
    pub column_length: u32,
    /// The type of the column, see [crate::constants::type_]
    pub r#type: u8,
    /// Column flags, see [crate::constants::column_flag]
    pub flags: u16,
    /// Number of decimals
    pub decimals: u8,
}

impl Column {
    /// Construct a column with the given name and type, and utf8mb4 character set
    pub fn new(name: impl Into<String>, r#type: u8) -> Self {
        let name = name.into();
        Column {
            catalog: "def".to_string(),
            org_name: name.clone(),
            name,
            character_set: 45,
            r#type,
            ..Default::default()
        }
    }

    /// Set the column flags
    pub fn flags(self, flags: u16) -> Self {
        Column { flags, ..self }
    }

    /// Set the collation id
    pub fn character_set(self, character_set: u16) -> Self {
        Column {
            character_set,
            ..self
        }
    }

    /// Set the declared length
    pub fn column_length(self, column_length: u32) -> Self {
        Column {
            column_length,
            ..self
        }
    }

    /// Set the number of decimals
    pub fn decimals(self, decimals: u8) -> Self {
        Column { decimals, ..self }
    }

    /// The column is part of a key
    pub fn is_key(&self) -> bool {
        self.flags
            & (column_flag::PRIMARY_KEY | column_flag::UNIQUE_KEY | column_flag::MULTIPLE_KEY)
            != 0
    }

    /// The column is part of the primary key
    pub fn is_primary_key(&self) -> bool {
        self.flags & column_flag::PRIMARY_KEY != 0
    }

    /// The column is unsigned
    pub fn is_unsigned(&self) -> bool {
        self.flags & column_flag::UNSIGNED != 0
    }

    /// The column holds binary data rather than text
    pub fn is_binary(&self) -> bool {
        self.character_set == BINARY_COLLATION
    }

    /// The column is NOT NULL
    pub fn is_not_null(&self) -> bool {
        self.flags & column_flag::NOT_NULL != 0
    }

    /// The column is AUTO_INCREMENT
    pub fn is_auto_increment(&self) -> bool {
        self.flags & column_flag::AUTO_INCREMENT != 0
    }

    /// The column is a blob or text
    pub fn is_blob(&self) -> bool {
        self.flags & column_flag::BLOB != 0
            || matches!(
                self.r#type,
                type_::TINY_BLOB | type_::MEDIUM_BLOB | type_::LONG_BLOB | type_::BLOB
            )
    }

    /// The column is ZEROFILL
    pub fn is_zero_fill(&self) -> bool {
        self.flags & column_flag::ZEROFILL != 0
    }

    /// The sql name of the column type
    pub fn type_name(&self) -> &'static str {
        let unsigned = self.is_unsigned();
        match self.r#type {
            type_::DECIMAL | type_::NEW_DECIMAL => {
                if unsigned {
                    "DECIMAL UNSIGNED"
                } else {
                    "DECIMAL"
                }
            }
            type_::TINY => {
                if unsigned {
                    "TINYINT UNSIGNED"
                } else {
                    "TINYINT"
                }
            }
            type_::SHORT => {
                if unsigned {
                    "SMALLINT UNSIGNED"
                } else {
                    "SMALLINT"
                }
            }
            type_::LONG => {
                if unsigned {
                    "INT UNSIGNED"
                } else {
                    "INT"
                }
            }
            type_::FLOAT => {
                if unsigned {
                    "FLOAT UNSIGNED"
                } else {
                    "FLOAT"
                }
            }
            type_::DOUBLE => {
                if unsigned {
                    "DOUBLE UNSIGNED"
                } else {
                    "DOUBLE"
                }
            }
            type_::NULL => "NULL",
            type_::TIMESTAMP => "TIMESTAMP",
            type_::LONG_LONG => {
                if unsigned {
                    "BIGINT UNSIGNED"
                } else {
                    "BIGINT"
                }
            }
            type_::INT24 => {
                if unsigned {
                    "MEDIUMINT UNSIGNED"
                } else {
                    "MEDIUMINT"
                }
            }
            type_::DATE | type_::NEW_DATE => "DATE",
            type_::TIME => "TIME",
            type_::DATETIME => "DATETIME",
            type_::YEAR => "YEAR",
            type_::VAR_CHAR | type_::VAR_STRING => {
                if self.is_binary() {
                    "VARBINARY"
                } else {
                    "VARCHAR"
                }
            }
            type_::BIT => "BIT",
            type_::JSON => "JSON",
            type_::ENUM => "ENUM",
            type_::SET => "SET",
            type_::TINY_BLOB => {
                if self.is_binary() {
                    "TINYBLOB"
                } else {
                    "TINYTEXT"
                }
            }
            type_::MEDIUM_BLOB => {
                if self.is_binary() {
                    "MEDIUMBLOB"
                } else {
                    "MEDIUMTEXT"
                }
            }
            type_::LONG_BLOB => {
                if self.is_binary() {
                    "LONGBLOB"
                } else {
                    "LONGTEXT"
                }
            }
            type_::BLOB => {
                if self.is_binary() {
                    "BLOB"
                } else {
                    "TEXT"
                }
            }
            type_::STRING => {
                if self.flags & column_flag::ENUM != 0 {
                    "ENUM"
                } else if self.flags & column_flag::SET != 0 {
                    "SET"
                } else if self.is_binary() {
                    "BINARY"
                } else {
                    "CHAR"
                }
            }
            type_::GEOMETRY => "GEOMETRY",
            _ => "UNKNOWN",
        }
    }
}

/// Convert a decoded [Value] into a rust type
pub trait FromValue: Sized {
    /// Perform the conversion
    fn from_value(v: Value) -> DecodeResult<Self>;
}

/// Construct a type error for the value
pub(crate) fn type_error(v: &Value, expected: ValueKind) -> DecodeError {
    match v {
        Value::Null => DecodeError::Null,
        v => DecodeError::TypeError {
            got: v.kind(),
            expected,
        },
    }
}

/// Implement [FromValue] for integer types with range checking
macro_rules! impl_from_value_int {
    ($($t:ty),+) => {
        $(
            impl FromValue for $t {
                fn from_value(v: Value) -> DecodeResult<Self> {
                    match v {
                        Value::Int(i) => i.try_into().map_err(|_| DecodeError::OutOfRange),
                        Value::UInt(i) => i.try_into().map_err(|_| DecodeError::OutOfRange),
                        Value::Bool(b) => Ok(b.into()),
                        v => Err(type_error(&v, ValueKind::Int)),
                    }
                }
            }
        )+
    };
}

impl_from_value_int!(i8, i16, i32, i64, u8, u16, u32, u64);

impl FromValue for f64 {
    fn from_value(v: Value) -> DecodeResult<Self> {
        match v {
            Value::Double(v) => Ok(v),
            v => Err(type_error(&v, ValueKind::Double)),
        }
    }
}

impl FromValue for f32 {
    fn from_value(v: Value) -> DecodeResult<Self> {
        match v {
            Value::Double(v) => Ok(v as f32),
            v => Err(type_error(&v, ValueKind::Double)),
        }
    }
}

impl FromValue for bool {
    fn from_value(v: Value) -> DecodeResult<Self> {
        match v {
            Value::Bool(v) => Ok(v),
            Value::Int(v) => Ok(v != 0),
            Value::UInt(v) => Ok(v != 0),
            v => Err(type_error(&v, ValueKind::Bool)),
        }
    }
}

impl FromValue for String {
    fn from_value(v: Value) -> DecodeResult<Self> {
        match v {
            Value::Text(v) => Ok(v),
            Value::Bytes(v) => String::from_utf8(v).map_err(|e| e.utf8_error().into()),
            v => Err(type_error(&v, ValueKind::Text)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(v: Value) -> DecodeResult<Self> {
        match v {
            Value::Bytes(v) => Ok(v),
            Value::Text(v) => Ok(v.into_bytes()),
            v => Err(type_error(&v, ValueKind::Bytes)),
        }
    }
}

impl FromValue for DateTime {
    fn from_value(v: Value) -> DecodeResult<Self> {
        match v {
            Value::DateTime(v) => Ok(v),
            v => Err(type_error(&v, ValueKind::DateTime)),
        }
    }
}

impl FromValue for Time {
    fn from_value(v: Value) -> DecodeResult<Self> {
        match v {
            Value::Time(v) => Ok(v),
            v => Err(type_error(&v, ValueKind::Time)),
        }
    }
}

/// Raw JSON columns arrive as text and are parsed here
impl FromValue for serde_json::Value {
    fn from_value(v: Value) -> DecodeResult<Self> {
        match v {
            Value::Json(v) => Ok(v),
            Value::Text(v) => Ok(serde_json::from_str(&v)?),
            v => Err(type_error(&v, ValueKind::Json)),
        }
    }
}

impl FromValue for Value {
    fn from_value(v: Value) -> DecodeResult<Self> {
        Ok(v)
    }
}

/// Decode null as [None], and other values as [Some] (v)
impl<T: FromValue> FromValue for Option<T> {
    fn from_value(v: Value) -> DecodeResult<Self> {
        match v {
            Value::Null => Ok(None),
            v => Ok(Some(T::from_value(v)?)),
        }
    }
}
