//! Ordered column/value lists for INSERT and UPDATE.

use crate::models::Value;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Anything that can describe a row as ordered `(column, value)` pairs.
pub trait ToColumns {
    fn to_columns(&self) -> Vec<(String, Value)>;
}

impl ToColumns for BTreeMap<String, Value> {
    fn to_columns(&self) -> Vec<(String, Value)> {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

/// JSON objects keep their key order; scalars map onto plain values.
impl ToColumns for serde_json::Map<String, JsonValue> {
    fn to_columns(&self) -> Vec<(String, Value)> {
        self.iter()
            .map(|(k, v)| (k.clone(), Value::from_json(v.clone())))
            .collect()
    }
}

impl ToColumns for Vec<(String, Value)> {
    fn to_columns(&self) -> Vec<(String, Value)> {
        self.clone()
    }
}

impl<const N: usize> ToColumns for [(&str, Value); N] {
    fn to_columns(&self) -> Vec<(String, Value)> {
        self.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }
}
