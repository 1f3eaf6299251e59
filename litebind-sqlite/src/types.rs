//! Type conversion between host values and SQLite storage classes.
//!
//! The forward direction ([`to_storage`]) is total over [`Value`]. The reverse direction
//! ([`from_storage`]) maps integers outside `±(2^53 - 1)` to [`Value::BigInt`] only in
//! wide-integer mode; otherwise they come back as an approximate [`Value::Float`].

use std::fmt;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::{Value as StorageValue, ValueRef};
use serde::ser::{Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::error::{SqliteError, SqliteResult};

/// Largest integer a host numeric represents exactly (`2^53 - 1`).
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// Smallest integer a host numeric represents exactly.
pub const MIN_SAFE_INTEGER: i64 = -MAX_SAFE_INTEGER;

/// A host value entering a bind or leaving a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absence of a value.
    Null,
    /// Integral numeric.
    Integer(i64),
    /// Floating-point numeric. Integral values within the safe range bind as INTEGER.
    Float(f64),
    /// Wide integer form, produced for out-of-range integers in wide-integer mode.
    BigInt(i64),
    /// UTF-8 text.
    Text(String),
    /// Byte sequence.
    Blob(Vec<u8>),
    /// Boolean, stored as 0/1.
    Bool(bool),
    /// Temporal value, stored as ISO-8601 text.
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer payload of `Integer`, `BigInt` or `Bool`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) | Self::BigInt(i) => Some(*i),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Numeric payload as a float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) | Self::BigInt(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Text payload.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Blob payload.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::BigInt(_) => "bigint",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
            Self::Bool(_) => "boolean",
            Self::Timestamp(_) => "timestamp",
        }
    }

    /// Convert to JSON. Blobs become arrays of byte values; wide integers become strings.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Integer(i) => JsonValue::Number((*i).into()),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::BigInt(i) => JsonValue::String(i.to_string()),
            Self::Text(s) => JsonValue::String(s.clone()),
            Self::Blob(b) => JsonValue::Array(b.iter().map(|byte| JsonValue::from(*byte)).collect()),
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Timestamp(t) => JsonValue::String(format_timestamp(t)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) | Self::BigInt(i) => write!(f, "{}", i),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(s) => write!(f, "{}", s),
            Self::Blob(b) => write!(f, "<{} bytes>", b.len()),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Timestamp(t) => write!(f, "{}", format_timestamp(t)),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Integer(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::BigInt(i) => serializer.serialize_str(&i.to_string()),
            Self::Text(s) => serializer.serialize_str(s),
            Self::Blob(b) => serializer.serialize_bytes(b),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Timestamp(t) => serializer.serialize_str(&format_timestamp(t)),
        }
    }
}

/// ISO-8601 form used for stored timestamps, e.g. `2024-01-02T03:04:05.000Z`.
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp. Accepts RFC 3339 and the engine's `YYYY-MM-DD HH:MM:SS` form.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Map a host value to its storage class.
pub fn to_storage(value: &Value) -> StorageValue {
    match value {
        Value::Null => StorageValue::Null,
        Value::Integer(i) | Value::BigInt(i) => StorageValue::Integer(*i),
        Value::Float(f) => match integral_float(*f) {
            Some(i) => StorageValue::Integer(i),
            None => StorageValue::Real(*f),
        },
        Value::Text(s) => StorageValue::Text(s.clone()),
        Value::Blob(b) => StorageValue::Blob(b.clone()),
        Value::Bool(b) => StorageValue::Integer(i64::from(*b)),
        Value::Timestamp(t) => StorageValue::Text(format_timestamp(t)),
    }
}

/// Exact integer for a float with no fractional part inside the safe range.
fn integral_float(value: f64) -> Option<i64> {
    let safe = MAX_SAFE_INTEGER as f64;
    if value.fract() == 0.0 && (-safe..=safe).contains(&value) {
        Some(value as i64)
    } else {
        None
    }
}

/// Map a storage value back to a host value.
pub fn from_storage(value: ValueRef<'_>, wide_integers: bool) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => from_storage_integer(i, wide_integers),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

/// Integer reverse mapping. Outside the safe range and without wide mode the value is
/// returned as an approximate float.
pub fn from_storage_integer(value: i64, wide_integers: bool) -> Value {
    if (MIN_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&value) {
        Value::Integer(value)
    } else if wide_integers {
        Value::BigInt(value)
    } else {
        Value::Float(value as f64)
    }
}

macro_rules! impl_from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Integer(i64::from(value))
                }
            }
        )*
    };
}

impl_from_integer!(i8, i16, i32, i64, u8, u16, u32);

impl TryFrom<u64> for Value {
    type Error = SqliteError;

    fn try_from(value: u64) -> SqliteResult<Self> {
        i64::try_from(value).map(Value::Integer).map_err(|_| {
            SqliteError::unsupported_type(format!("{} does not fit a 64-bit signed integer", value))
        })
    }
}

impl TryFrom<usize> for Value {
    type Error = SqliteError;

    fn try_from(value: usize) -> SqliteResult<Self> {
        Value::try_from(value as u64)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(f64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::Text(value.clone())
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Blob(value.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl TryFrom<JsonValue> for Value {
    type Error = SqliteError;

    fn try_from(value: JsonValue) -> SqliteResult<Self> {
        match value {
            JsonValue::Null => Ok(Value::Null),
            JsonValue::Bool(b) => Ok(Value::Bool(b)),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Integer(i))
                } else if let Some(u) = n.as_u64() {
                    Value::try_from(u)
                } else {
                    n.as_f64()
                        .map(Value::Float)
                        .ok_or_else(|| SqliteError::unsupported_type(format!("number {}", n)))
                }
            }
            JsonValue::String(s) => Ok(Value::Text(s)),
            JsonValue::Array(_) => Err(SqliteError::unsupported_type(
                "arrays have no storage class",
            )),
            JsonValue::Object(_) => Err(SqliteError::unsupported_type(
                "objects have no storage class",
            )),
        }
    }
}

/// Extraction of a host type from a [`Value`].
pub trait FromValue: Sized {
    /// Convert the value, failing when the storage class does not fit.
    fn from_value(value: Value) -> SqliteResult<Self>;
}

fn mismatch<T>(expected: &str, value: &Value) -> SqliteResult<T> {
    Err(SqliteError::deserialization(format!(
        "expected {}, found {}",
        expected,
        value.type_name()
    )))
}

impl FromValue for Value {
    fn from_value(value: Value) -> SqliteResult<Self> {
        Ok(value)
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> SqliteResult<Self> {
        match value.as_i64() {
            Some(i) => Ok(i),
            None => mismatch("integer", &value),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> SqliteResult<Self> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide)
            .map_err(|_| SqliteError::deserialization(format!("{} out of range for i32", wide)))
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> SqliteResult<Self> {
        match value.as_f64() {
            Some(f) => Ok(f),
            None => mismatch("numeric", &value),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> SqliteResult<Self> {
        match value {
            Value::Bool(b) => Ok(b),
            Value::Integer(i) => Ok(i != 0),
            other => mismatch("boolean", &other),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> SqliteResult<Self> {
        match value {
            Value::Text(s) => Ok(s),
            other => mismatch("text", &other),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> SqliteResult<Self> {
        match value {
            Value::Blob(b) => Ok(b),
            Value::Text(s) => Ok(s.into_bytes()),
            other => mismatch("blob", &other),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> SqliteResult<Self> {
        match value {
            Value::Timestamp(t) => Ok(t),
            Value::Text(ref s) => parse_timestamp(s).ok_or_else(|| {
                SqliteError::deserialization(format!("'{}' is not an ISO-8601 timestamp", s))
            }),
            other => mismatch("timestamp", &other),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> SqliteResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
