//! Argument values passed alongside SQL text.
//!
//! `Value` is what callers hand to conditions, statements and raw queries.
//! Two variants never reach a driver directly: `List` is expanded into a
//! parenthesised run of placeholders and `Raw` is spliced into the SQL text
//! by the placeholder preprocessor.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A single argument for a parameterized statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    /// Stored as i64 for maximum range
    Int(i64),
    Float(f64),
    String(String),
    /// Base64 encoded when serialized
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    Json(JsonValue),
    /// Slice-valued argument, expanded to `(?, ?, ...)` before execution.
    List(Vec<Value>),
    /// Literal SQL fragment substituted in place of its placeholder.
    #[serde(skip)]
    Raw(RawSql),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check if this value must be rewritten before it can be bound.
    pub fn is_expandable(&self) -> bool {
        matches!(self, Self::List(_) | Self::Raw(_))
    }

    /// Get the type name of this value for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
            Self::List(_) => "list",
            Self::Raw(_) => "raw",
        }
    }

    /// Map a JSON value onto the matching scalar variant. Arrays and
    /// objects stay `Json`.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::String(s) => Self::String(s),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Self::Float(f)
                } else {
                    Self::Json(JsonValue::Number(n))
                }
            }
            other => Self::Json(other),
        }
    }

    /// Flatten a slice-like value into its elements.
    ///
    /// Lists yield their elements, anything else yields itself.
    pub fn into_list(self) -> Vec<Value> {
        match self {
            Self::List(items) => items,
            other => vec![other],
        }
    }
}

/// Raw SQL fragment with its own positional arguments.
///
/// The text is never quoted or escaped. Placeholders inside it consume the
/// fragment's own `args`, not the surrounding statement's.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawSql {
    pub text: String,
    pub args: Vec<Value>,
}

impl RawSql {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(text: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            text: text.into(),
            args,
        }
    }
}

/// Shorthand for building a [`RawSql`] argument.
pub fn raw(text: impl Into<String>) -> RawSql {
    RawSql::new(text)
}

impl From<RawSql> for Value {
    fn from(v: RawSql) -> Self {
        Value::Raw(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<JsonValue> for Value {
    fn from(v: JsonValue) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(v: [T; N]) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
