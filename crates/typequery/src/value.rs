//! Bound parameter and column values.
//!
//! [`Value`] is the storage-neutral representation of everything that crosses
//! the storage boundary: predicate operands going in, column values coming out.
//! [`SqlScalar`] converts typed Rust operands into values and [`FromValue`]
//! converts fetched values back into Rust types.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// A single SQL value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Uuid(Uuid),
    Json(serde_json::Value),
    Array(Vec<Value>),
}

impl Value {
    /// Short type name used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Timestamp(_) => "timestamp",
            Value::Date(_) => "date",
            Value::Uuid(_) => "uuid",
            Value::Json(_) => "json",
            Value::Array(_) => "array",
        }
    }

    /// Whether this is SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow the text payload, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

// Floats hash and compare by bit pattern so values can key link maps.
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Text(v) => v.hash(state),
            Value::Timestamp(v) => v.hash(state),
            Value::Date(v) => v.hash(state),
            Value::Uuid(v) => v.hash(state),
            Value::Json(v) => v.to_string().hash(state),
            Value::Array(items) => items.hash(state),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    v.into_value()
                }
            }
        )*
    };
}

value_from!(
    bool,
    i16,
    i32,
    i64,
    f32,
    f64,
    String,
    &str,
    DateTime<Utc>,
    NaiveDateTime,
    NaiveDate,
    Uuid,
    serde_json::Value,
);

/// Rust types usable as predicate operands.
///
/// Implement this for domain enums so they can be compared against
/// enum-typed fields:
///
/// ```ignore
/// impl SqlScalar for Status {
///     fn into_value(self) -> Value {
///         Value::Text(self.as_str().to_string())
///     }
/// }
/// ```
pub trait SqlScalar {
    /// Convert the operand into a bound value.
    fn into_value(self) -> Value;
}

impl SqlScalar for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl SqlScalar for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

impl SqlScalar for i16 {
    fn into_value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl SqlScalar for i32 {
    fn into_value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl SqlScalar for i64 {
    fn into_value(self) -> Value {
        Value::Int(self)
    }
}

impl SqlScalar for f32 {
    fn into_value(self) -> Value {
        Value::Float(f64::from(self))
    }
}

impl SqlScalar for f64 {
    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

impl SqlScalar for String {
    fn into_value(self) -> Value {
        Value::Text(self)
    }
}

impl SqlScalar for &str {
    fn into_value(self) -> Value {
        Value::Text(self.to_string())
    }
}

impl SqlScalar for DateTime<Utc> {
    fn into_value(self) -> Value {
        Value::Timestamp(self)
    }
}

impl SqlScalar for NaiveDateTime {
    fn into_value(self) -> Value {
        Value::Timestamp(self.and_utc())
    }
}

impl SqlScalar for NaiveDate {
    fn into_value(self) -> Value {
        Value::Date(self)
    }
}

impl SqlScalar for Uuid {
    fn into_value(self) -> Value {
        Value::Uuid(self)
    }
}

impl SqlScalar for serde_json::Value {
    fn into_value(self) -> Value {
        Value::Json(self)
    }
}

impl<T: SqlScalar> SqlScalar for Option<T> {
    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::Null,
        }
    }
}

impl<T: SqlScalar> SqlScalar for Vec<T> {
    fn into_value(self) -> Value {
        Value::Array(self.into_iter().map(SqlScalar::into_value).collect())
    }
}

/// Rust types that can be read back from a fetched [`Value`].
pub trait FromValue: Sized {
    /// Convert a fetched value, returning a human-readable message on failure.
    fn from_value(value: &Value) -> Result<Self, String>;
}

fn unexpected(expected: &str, found: &Value) -> String {
    format!("expected {expected}, found {}", found.kind_name())
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, String> {
        Ok(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Bool(v) => Ok(*v),
            other => Err(unexpected("bool", other)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Int(v) => Ok(*v),
            other => Err(unexpected("int", other)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self, String> {
        let v = i64::from_value(value)?;
        i32::try_from(v).map_err(|e| e.to_string())
    }
}

impl FromValue for i16 {
    fn from_value(value: &Value) -> Result<Self, String> {
        let v = i64::from_value(value)?;
        i16::try_from(v).map_err(|e| e.to_string())
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> Result<Self, String> {
        let v = i64::from_value(value)?;
        u64::try_from(v).map_err(|e| e.to_string())
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            other => Err(unexpected("float", other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Text(v) => Ok(v.clone()),
            other => Err(unexpected("text", other)),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Timestamp(v) => Ok(*v),
            other => Err(unexpected("timestamp", other)),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Date(v) => Ok(*v),
            Value::Timestamp(v) => Ok(v.date_naive()),
            other => Err(unexpected("date", other)),
        }
    }
}

impl FromValue for Uuid {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Uuid(v) => Ok(*v),
            Value::Text(s) => Uuid::parse_str(s).map_err(|e| e.to_string()),
            other => Err(unexpected("uuid", other)),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Json(v) => Ok(v.clone()),
            other => Err(unexpected("json", other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Array(items) => items.iter().map(T::from_value).collect(),
            other => Err(unexpected("array", other)),
        }
    }
}
