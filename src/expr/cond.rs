//! Column conditions keyed by column name.

use crate::expr::comparison::{Comparison, Operator};
use crate::models::Value;
use std::collections::BTreeMap;

/// One `column <op> value` test.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub op: Operator,
    pub value: Value,
}

impl Condition {
    pub fn new(column: impl Into<String>, comparison: Comparison) -> Self {
        let (op, value) = comparison.into_parts();
        Self {
            column: column.into(),
            op,
            value,
        }
    }
}

/// A map of conditions joined by AND.
///
/// Keys are a column name optionally followed by an operator (`"age >="`,
/// `"name LIKE"`). Entries are kept sorted by key so the same map always
/// compiles to the same SQL text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cond(BTreeMap<String, Condition>);

impl Cond {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition from a `"column [operator]"` key and a plain value.
    ///
    /// Without an operator, NULL compares with `IS`, lists with `IN` and
    /// anything else with `=`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        let trimmed = key.trim();
        let (column, op) = match trimmed.split_once(char::is_whitespace) {
            Some((column, op_text)) => (column.to_string(), Operator::parse(op_text)),
            None => {
                let op = match &value {
                    Value::Null => Operator::Is,
                    Value::List(_) => Operator::In,
                    _ => Operator::Equal,
                };
                (trimmed.to_string(), op)
            }
        };
        let condition = Condition::new(column, Comparison::new(op, value));
        self.0.insert(key, condition);
        self
    }

    /// Add a condition on `column` using an explicit comparison.
    pub fn with_cmp(mut self, column: impl Into<String>, comparison: Comparison) -> Self {
        let column = column.into();
        self.0
            .insert(column.clone(), Condition::new(column, comparison));
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Conditions in key order.
    pub fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.0.values()
    }

    pub fn into_conditions(self) -> Vec<Condition> {
        self.0.into_values().collect()
    }
}
