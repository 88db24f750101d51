//! Database values
//!
//! [`DatabaseValue`] is what flows across the connection boundary in both
//! directions. Conversions back into Rust types are lenient about storage
//! representation since engines differ: SQLite hands booleans back as
//! integers and timestamps as text.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;

use crate::error::{OrmError, OrmResult};
use crate::metadata::FieldType;

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    DateTime(DateTime<Utc>),
}

impl DatabaseValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Convert to a typed Rust value
    pub fn into_typed<T: FromDatabaseValue>(self) -> OrmResult<T> {
        T::from_database_value(self)
    }

    /// Read the value as a primary key
    pub fn as_id(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int32(v) => Some(i64::from(*v)),
            DatabaseValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Whether the value may be stored in a field of the given type
    pub fn is_compatible_with(&self, field_type: &FieldType) -> bool {
        match (self, field_type) {
            (DatabaseValue::Null, _) => true,
            (DatabaseValue::Int32(_) | DatabaseValue::Int64(_), FieldType::Integer) => true,
            (
                DatabaseValue::Int32(_) | DatabaseValue::Int64(_) | DatabaseValue::Float64(_),
                FieldType::Decimal,
            ) => true,
            (DatabaseValue::Bool(_), FieldType::Boolean) => true,
            (DatabaseValue::DateTime(_), FieldType::Timestamp) => true,
            (DatabaseValue::String(_), FieldType::String) => true,
            (DatabaseValue::Int32(_) | DatabaseValue::Int64(_), FieldType::Entity(_)) => true,
            _ => false,
        }
    }

    /// Name of the variant, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            DatabaseValue::Null => "null",
            DatabaseValue::Bool(_) => "bool",
            DatabaseValue::Int32(_) => "int32",
            DatabaseValue::Int64(_) => "int64",
            DatabaseValue::Float64(_) => "float64",
            DatabaseValue::String(_) => "string",
            DatabaseValue::DateTime(_) => "datetime",
        }
    }

    /// Convert to JSON value
    pub fn to_json(&self) -> JsonValue {
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => JsonValue::Bool(*b),
            DatabaseValue::Int32(i) => JsonValue::Number((*i).into()),
            DatabaseValue::Int64(i) => JsonValue::Number((*i).into()),
            DatabaseValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::String(s) => JsonValue::String(s.clone()),
            DatabaseValue::DateTime(dt) => JsonValue::String(dt.to_rfc3339()),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<DateTime<Utc>> for DatabaseValue {
    fn from(value: DateTime<Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// Conversion from a database value into a Rust field type
pub trait FromDatabaseValue: Sized {
    fn from_database_value(value: DatabaseValue) -> OrmResult<Self>;
}

fn mismatch<T>(expected: &str, value: &DatabaseValue) -> OrmResult<T> {
    Err(OrmError::conversion(format!(
        "expected {}, found {} ({:?})",
        expected,
        value.type_name(),
        value
    )))
}

impl FromDatabaseValue for bool {
    fn from_database_value(value: DatabaseValue) -> OrmResult<Self> {
        match value {
            DatabaseValue::Bool(b) => Ok(b),
            DatabaseValue::Int32(i) => Ok(i != 0),
            DatabaseValue::Int64(i) => Ok(i != 0),
            other => mismatch("bool", &other),
        }
    }
}

impl FromDatabaseValue for i64 {
    fn from_database_value(value: DatabaseValue) -> OrmResult<Self> {
        match value {
            DatabaseValue::Int32(i) => Ok(i64::from(i)),
            DatabaseValue::Int64(i) => Ok(i),
            DatabaseValue::Bool(b) => Ok(i64::from(b)),
            other => mismatch("integer", &other),
        }
    }
}

impl FromDatabaseValue for i32 {
    fn from_database_value(value: DatabaseValue) -> OrmResult<Self> {
        let wide = i64::from_database_value(value)?;
        i32::try_from(wide)
            .map_err(|_| OrmError::conversion(format!("{} does not fit into a 32 bit integer", wide)))
    }
}

impl FromDatabaseValue for f64 {
    fn from_database_value(value: DatabaseValue) -> OrmResult<Self> {
        match value {
            DatabaseValue::Float64(f) => Ok(f),
            DatabaseValue::Int32(i) => Ok(f64::from(i)),
            DatabaseValue::Int64(i) => Ok(i as f64),
            DatabaseValue::String(s) => s
                .parse()
                .map_err(|_| OrmError::conversion(format!("'{}' is not a decimal", s))),
            other => mismatch("decimal", &other),
        }
    }
}

impl FromDatabaseValue for String {
    fn from_database_value(value: DatabaseValue) -> OrmResult<Self> {
        match value {
            DatabaseValue::String(s) => Ok(s),
            other => mismatch("string", &other),
        }
    }
}

impl FromDatabaseValue for DateTime<Utc> {
    fn from_database_value(value: DatabaseValue) -> OrmResult<Self> {
        match value {
            DatabaseValue::DateTime(dt) => Ok(dt),
            DatabaseValue::String(s) => parse_timestamp(&s),
            other => mismatch("timestamp", &other),
        }
    }
}

impl FromDatabaseValue for DatabaseValue {
    fn from_database_value(value: DatabaseValue) -> OrmResult<Self> {
        Ok(value)
    }
}

impl<T: FromDatabaseValue> FromDatabaseValue for Option<T> {
    fn from_database_value(value: DatabaseValue) -> OrmResult<Self> {
        match value {
            DatabaseValue::Null => Ok(None),
            other => T::from_database_value(other).map(Some),
        }
    }
}

fn parse_timestamp(text: &str) -> OrmResult<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| OrmError::conversion(format!("'{}' is not a timestamp", text)))
}
