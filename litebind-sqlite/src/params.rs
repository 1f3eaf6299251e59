//! Parameter sets for statement binding.
//!
//! The binding style is decided once, when a [`Params`] is built at the call boundary:
//!
//! ```rust
//! use litebind_sqlite::{Params, Value, named_params, params};
//!
//! let positional = params![1, "two", 3.0];
//! assert_eq!(positional.len(), 3);
//!
//! let named = named_params! { "bar" => "baz", "@id" => 7 };
//! assert!(matches!(named, Params::Named(_)));
//!
//! let none: Params = ().into();
//! assert!(none.is_empty());
//! ```

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::error::{SqliteError, SqliteResult};
use crate::types::Value;

/// Sigils the engine recognizes in front of named parameters.
pub const SIGILS: [char; 3] = [':', '@', '$'];

/// Sigil assumed for keys given without one.
pub const DEFAULT_SIGIL: char = ':';

/// A set of values to bind to a statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    /// Nothing to bind.
    #[default]
    None,
    /// Values bound to slots 1..=n in order.
    Positional(Vec<Value>),
    /// Values bound by parameter name.
    Named(IndexMap<String, Value>),
}

impl Params {
    /// Number of values carried.
    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Positional(values) => values.len(),
            Self::Named(values) => values.len(),
        }
    }

    /// Check if there is nothing to bind.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build a parameter set from a dynamic JSON value.
    ///
    /// `null` binds nothing, an array binds positionally, an object binds by name. Any
    /// other top-level shape, or a nested array/object, is rejected before reaching the engine.
    pub fn from_json(value: JsonValue) -> SqliteResult<Self> {
        match value {
            JsonValue::Null => Ok(Self::None),
            JsonValue::Array(items) => items
                .into_iter()
                .map(Value::try_from)
                .collect::<SqliteResult<Vec<_>>>()
                .map(Self::Positional),
            JsonValue::Object(map) => map
                .into_iter()
                .map(|(key, value)| Value::try_from(value).map(|v| (key, v)))
                .collect::<SqliteResult<IndexMap<_, _>>>()
                .map(Self::Named),
            other => Err(SqliteError::bind(format!(
                "parameters must be an array or an object, got {}",
                other
            ))),
        }
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Self::None
    }
}

impl<T: Into<Value>> From<Vec<T>> for Params {
    fn from(values: Vec<T>) -> Self {
        Self::Positional(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Params {
    fn from(values: [T; N]) -> Self {
        Self::Positional(values.into_iter().map(Into::into).collect())
    }
}

impl<K: Into<String>, V: Into<Value>> From<IndexMap<K, V>> for Params {
    fn from(values: IndexMap<K, V>) -> Self {
        Self::Named(
            values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<&Params> for Params {
    fn from(params: &Params) -> Self {
        params.clone()
    }
}

/// Candidate parameter names for a key: the key itself when it carries a sigil, otherwise
/// the key behind the default sigil.
pub fn parameter_name(key: &str) -> String {
    if key.starts_with(SIGILS) {
        key.to_string()
    } else {
        format!("{}{}", DEFAULT_SIGIL, key)
    }
}

/// Build positional [`Params`].
///
/// ```rust
/// use litebind_sqlite::{params, Params, Value};
///
/// assert_eq!(params![], Params::None);
/// assert_eq!(params!["baz"], Params::Positional(vec![Value::Text("baz".into())]));
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::Params::None
    };
    ($($value:expr),+ $(,)?) => {
        $crate::Params::Positional(vec![$($crate::Value::from($value)),+])
    };
}

/// Build named [`Params`]. Keys may omit the sigil; `:` is assumed.
///
/// ```rust
/// use litebind_sqlite::{named_params, Params};
///
/// let p = named_params! { "bar" => "baz" };
/// assert_eq!(p.len(), 1);
/// ```
#[macro_export]
macro_rules! named_params {
    () => {
        $crate::Params::None
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::IndexMap::new();
        $(
            map.insert(::std::string::String::from($key), $crate::Value::from($value));
        )+
        $crate::Params::Named(map)
    }};
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parameter_name_default_sigil() {
        assert_eq!(parameter_name("bar"), ":bar");
        assert_eq!(parameter_name(":bar"), ":bar");
        assert_eq!(parameter_name("@bar"), "@bar");
        assert_eq!(parameter_name("$bar"), "$bar");
    }

    #[test]
    fn test_positional_from_array() {
        let params: Params = [1, 2, 3].into();
        assert_eq!(
            params,
            Params::Positional(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)])
        );
    }

    #[test]
    fn test_unit_is_empty() {
        let params: Params = ().into();
        assert!(params.is_empty());
    }

    #[test]
    fn test_macros() {
        let positional = params![1, "a", None::<i64>];
        assert_eq!(positional.len(), 3);

        let named = named_params! { "a" => 1, ":b" => true };
        match named {
            Params::Named(map) => {
                assert_eq!(map.get("a"), Some(&Value::Integer(1)));
                assert_eq!(map.get(":b"), Some(&Value::Bool(true)));
            }
            other => panic!("Expected Named, got {:?}", other),
        }
    }

    #[test]
    fn test_from_json_shapes() {
        assert_eq!(Params::from_json(json!(null)).unwrap(), Params::None);
        assert_eq!(Params::from_json(json!([1, "x"])).unwrap().len(), 2);
        assert!(matches!(
            Params::from_json(json!({"bar": "baz"})).unwrap(),
            Params::Named(_)
        ));
        assert!(matches!(
            Params::from_json(json!("scalar")),
            Err(SqliteError::Bind(_))
        ));
        assert!(matches!(
            Params::from_json(json!([{"nested": true}])),
            Err(SqliteError::UnsupportedType(_))
        ));
    }
}
