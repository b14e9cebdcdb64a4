//! Adapter-neutral values and rows
//!
//! Rows coming out of any [`Pool`](crate::Pool) adapter are decoded into these
//! types, so handlers never touch driver row types.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{DbError, Result};

/// A single column value or statement parameter
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    TextArray(Vec<String>),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::TextArray(_) => "text[]",
            Value::Timestamp(_) => "timestamp",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "'{v}'"),
            Value::TextArray(v) => write!(f, "{v:?}"),
            Value::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

macro_rules! impl_from_for_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

impl_from_for_value! {
    bool => Bool,
    i32 => Int,
    i64 => Int,
    f64 => Float,
    String => Text,
    &str => Text,
    Vec<String> => TextArray,
    DateTime<Utc> => Timestamp,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Conversion out of a [`Value`]
pub trait FromValue: Sized {
    /// Type name used in decode errors
    const EXPECTED: &'static str;

    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for String {
    const EXPECTED: &'static str = "text";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromValue for i64 {
    const EXPECTED: &'static str = "int";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for i32 {
    const EXPECTED: &'static str = "int";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }
}

impl FromValue for f64 {
    const EXPECTED: &'static str = "float";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float(v) => Some(*v),
            // integer columns widen
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl FromValue for bool {
    const EXPECTED: &'static str = "bool";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for Vec<String> {
    const EXPECTED: &'static str = "text[]";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::TextArray(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl FromValue for DateTime<Utc> {
    const EXPECTED: &'static str = "timestamp";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Timestamp(v) => Some(*v),
            _ => None,
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    const EXPECTED: &'static str = T::EXPECTED;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Column lookup by name or position
pub trait ColumnIndex: fmt::Display {
    fn position(&self, row: &Row) -> Option<usize>;
}

impl ColumnIndex for usize {
    fn position(&self, row: &Row) -> Option<usize> {
        (*self < row.values.len()).then_some(*self)
    }
}

impl ColumnIndex for &str {
    fn position(&self, row: &Row) -> Option<usize> {
        row.columns.iter().position(|c| c.as_str() == *self)
    }
}

/// One result row: named columns and their values
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Build a row. Missing trailing values are treated as NULL.
    pub fn new(columns: Arc<[String]>, mut values: Vec<Value>) -> Self {
        values.resize(columns.len(), Value::Null);
        Self { columns, values }
    }

    /// Convenience constructor from `(column, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let (columns, values): (Vec<String>, Vec<Value>) = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .unzip();
        Self::new(columns.into(), values)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value of a column
    pub fn value<I: ColumnIndex>(&self, index: I) -> Option<&Value> {
        index.position(self).map(|i| &self.values[i])
    }

    /// Typed value of a column
    pub fn get<T: FromValue, I: ColumnIndex>(&self, index: I) -> Result<T> {
        let value = index
            .position(self)
            .map(|i| &self.values[i])
            .ok_or_else(|| DbError::decode(index.to_string(), "no such column"))?;
        T::from_value(value).ok_or_else(|| {
            DbError::decode(
                index.to_string(),
                format!("expected {}, found {}", T::EXPECTED, value.type_name()),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paris() -> Row {
        Row::from_pairs([
            ("id", Value::from("1")),
            ("city", Value::from("Paris")),
            ("population", Value::from(2_140_526_i64)),
            ("latitude", Value::from(48.8566)),
            ("description", Value::Null),
            ("images", Value::from(vec!["paris.jpg".to_string()])),
        ])
    }

    #[test]
    fn typed_access_by_name_and_position() {
        let row = paris();
        assert_eq!(row.get::<String, _>("city").unwrap(), "Paris");
        assert_eq!(row.get::<String, _>(0).unwrap(), "1");
        assert_eq!(row.get::<i64, _>("population").unwrap(), 2_140_526);
        assert_eq!(row.get::<Vec<String>, _>("images").unwrap(), vec!["paris.jpg"]);
    }

    #[test]
    fn null_decodes_into_option() {
        let row = paris();
        assert_eq!(row.get::<Option<String>, _>("description").unwrap(), None);
        assert!(row.get::<String, _>("description").is_err());
    }

    #[test]
    fn type_mismatch_names_the_column() {
        let err = paris().get::<i64, _>("city").unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot decode column 'city': expected int, found text"
        );
    }

    #[test]
    fn missing_column_is_a_decode_error() {
        let err = paris().get::<String, _>("country").unwrap_err();
        assert!(matches!(err, DbError::Decode { .. }));
    }
}
