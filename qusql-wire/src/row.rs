//! Contains Structs to contains and decode rows
use crate::{
    decode::FromValue,
    package_parser::{DecodeError, DecodeResult},
    value::Value,
};

/// The shape rows of a query are returned in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowMode {
    /// Pairs of column name and value, in column order
    Map,
    /// Values in column order
    #[default]
    Array,
    /// Only the value of the first column
    Scalar,
    /// Nothing, every value is skipped on the wire
    Void,
}

/// A row returned by a Mysql/Mariadb query
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    /// See [RowMode::Map]
    Map(Vec<(String, Value)>),
    /// See [RowMode::Array]
    Array(Vec<Value>),
    /// See [RowMode::Scalar]
    Scalar(Value),
    /// See [RowMode::Void]
    Void,
}

impl Row {
    /// Build a row of the given shape
    pub(crate) fn build(mode: RowMode, names: &[String], values: Vec<Value>) -> Row {
        match mode {
            RowMode::Map => Row::Map(names.iter().cloned().zip(values).collect()),
            RowMode::Array => Row::Array(values),
            RowMode::Scalar => Row::Scalar(values.into_iter().next().unwrap_or(Value::Null)),
            RowMode::Void => Row::Void,
        }
    }

    /// Return the value of column idx
    pub fn get(&self, idx: usize) -> Option<&Value> {
        match self {
            Row::Map(v) => v.get(idx).map(|(_, v)| v),
            Row::Array(v) => v.get(idx),
            Row::Scalar(v) if idx == 0 => Some(v),
            Row::Scalar(_) | Row::Void => None,
        }
    }

    /// Return the value of the column with the given name, only for [Row::Map]
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        match self {
            Row::Map(v) => v.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Number of values in the row
    pub fn len(&self) -> usize {
        match self {
            Row::Map(v) => v.len(),
            Row::Array(v) => v.len(),
            Row::Scalar(_) => 1,
            Row::Void => 0,
        }
    }

    /// True if the row holds no values
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the values of the row in column order
    pub fn into_values(self) -> Vec<Value> {
        match self {
            Row::Map(v) => v.into_iter().map(|(_, v)| v).collect(),
            Row::Array(v) => v,
            Row::Scalar(v) => vec![v],
            Row::Void => Vec::new(),
        }
    }

    /// Decode the row using the [FromRow] trait
    ///
    /// ```no_run
    /// use qusql_wire::{row::Row, package_parser::DecodeResult};
    ///
    /// fn test(row: Row) -> DecodeResult<()> {
    ///     let (v1, v2): (u8, String) = row.decode()?;
    ///     Ok(())
    /// }
    /// ```
    pub fn decode<T: FromRow>(self) -> DecodeResult<T> {
        T::from_row(self.into_values())
    }
}

/// Decode a row as a tuple
pub trait FromRow: Sized {
    /// Decode the values of a row as Self
    fn from_row(values: Vec<Value>) -> DecodeResult<Self>;
}

/// Implement [FromRow] for a tuple
macro_rules! impl_from_row_for_tuple {
    ($( $T:ident ,)+) => {
        impl<$($T,)+> FromRow for ($($T,)+)
        where
            $($T: FromValue,)+
        {
            #[inline]
            fn from_row(values: Vec<Value>) -> DecodeResult<Self> {
                let mut values = values.into_iter();
                Ok((
                    ($($T::from_value(values.next().ok_or(DecodeError::EndOfColumns)?)?,)+)
                ))
            }
        }
    };
}

impl FromRow for () {
    fn from_row(_: Vec<Value>) -> DecodeResult<Self> {
        Ok(())
    }
}

impl FromRow for Vec<Value> {
    fn from_row(values: Vec<Value>) -> DecodeResult<Self> {
        Ok(values)
    }
}

impl_from_row_for_tuple!(T1,);
impl_from_row_for_tuple!(T1, T2,);
impl_from_row_for_tuple!(T1, T2, T3,);
impl_from_row_for_tuple!(T1, T2, T3, T4,);
impl_from_row_for_tuple!(T1, T2, T3, T4, T5,);
impl_from_row_for_tuple!(T1, T2, T3, T4, T5, T6,);
impl_from_row_for_tuple!(T1, T2, T3, T4, T5, T6, T7,);
impl_from_row_for_tuple!(T1, T2, T3, T4, T5, T6, T7, T8,);
impl_from_row_for_tuple!(T1, T2, T3, T4, T5, T6, T7, T8, T9,);
impl_from_row_for_tuple!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10,);
impl_from_row_for_tuple!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11,);
impl_from_row_for_tuple!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12,);
impl_from_row_for_tuple!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12, T13,);
impl_from_row_for_tuple!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12, T13, T14,);
impl_from_row_for_tuple!(
    T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12, T13, T14, T15,
);
impl_from_row_for_tuple!(
    T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12, T13, T14, T15, T16,
);
