//! Decoded result rows and projection onto host types.

use std::ops::Index;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value as JsonValue;

use crate::error::{SqliteError, SqliteResult};
use crate::types::{FromValue, Value};

/// One result row: column names shared with the producing statement, plus owned values.
///
/// Column names need not be unique. Name lookups follow object semantics, so the last
/// column with a given name wins.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column names in declaration order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Take the values, dropping the names.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().rposition(|column| column == name)
    }

    /// Value of the named column.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.position(name).and_then(|i| self.values.get(i))
    }

    /// Value at a zero-based column index.
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value of the first column.
    pub fn first(&self) -> Option<&Value> {
        self.values.first()
    }

    /// Extract the named column as a host type.
    pub fn get_as<T: FromValue>(&self, name: &str) -> SqliteResult<T> {
        let value = self
            .get(name)
            .ok_or_else(|| SqliteError::deserialization(format!("no column named '{}'", name)))?;
        T::from_value(value.clone())
            .map_err(|e| SqliteError::deserialization(format!("column '{}': {}", name, e)))
    }

    /// Iterate `(name, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Render as a JSON object keyed by column name.
    pub fn to_json(&self) -> JsonValue {
        let map = self
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_json()))
            .collect();
        JsonValue::Object(map)
    }

    /// Deserialize the row's object form into `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> SqliteResult<T> {
        serde_json::from_value(self.to_json())
            .map_err(|e| SqliteError::deserialization(e.to_string()))
    }
}

impl Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        match self.values.get(index) {
            Some(value) => value,
            None => panic!("column index {} out of range for row of {}", index, self.len()),
        }
    }
}

impl Index<&str> for Row {
    type Output = Value;

    fn index(&self, name: &str) -> &Value {
        match self.get(name) {
            Some(value) => value,
            None => panic!("no column named '{}'", name),
        }
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Trait for converting a decoded row into a host type.
pub trait FromRow: Sized {
    /// Convert the row.
    fn from_row(row: Row) -> SqliteResult<Self>;
}

impl FromRow for Row {
    fn from_row(row: Row) -> SqliteResult<Self> {
        Ok(row)
    }
}

impl FromRow for JsonValue {
    fn from_row(row: Row) -> SqliteResult<Self> {
        Ok(row.to_json())
    }
}

impl FromRow for Vec<Value> {
    fn from_row(row: Row) -> SqliteResult<Self> {
        Ok(row.into_values())
    }
}

macro_rules! impl_from_row_tuple {
    ($len:expr => $($name:ident),+) => {
        impl<$($name: FromValue),+> FromRow for ($($name,)+) {
            fn from_row(row: Row) -> SqliteResult<Self> {
                if row.len() != $len {
                    return Err(SqliteError::deserialization(format!(
                        "expected {} column(s), row has {}",
                        $len,
                        row.len()
                    )));
                }
                let mut values = row.into_values().into_iter();
                Ok(($(
                    $name::from_value(values.next().unwrap_or(Value::Null))?,
                )+))
            }
        }
    };
}

impl_from_row_tuple!(1 => A);
impl_from_row_tuple!(2 => A, B);
impl_from_row_tuple!(3 => A, B, C);
impl_from_row_tuple!(4 => A, B, C, D);
impl_from_row_tuple!(5 => A, B, C, D, E);
impl_from_row_tuple!(6 => A, B, C, D, E, F);
