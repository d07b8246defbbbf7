//! Comparison operators and the value they compare against.

use crate::models::Value;

/// Operator applied between a column and a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Between,
    NotBetween,
    In,
    NotIn,
    Is,
    IsNot,
    Like,
    NotLike,
    RegExp,
    NotRegExp,
    /// Operator text emitted verbatim, e.g. `@>` or `&&`.
    Custom(String),
}

impl Operator {
    /// Parse operator text as written after a column name in a condition key.
    ///
    /// Matching is case-insensitive and whitespace-normalised. Unknown text
    /// becomes [`Operator::Custom`].
    pub fn parse(text: &str) -> Self {
        let normalized = text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_uppercase();
        match normalized.as_str() {
            "=" | "==" => Self::Equal,
            "!=" | "<>" => Self::NotEqual,
            "<" => Self::LessThan,
            "<=" => Self::LessThanOrEqual,
            ">" => Self::GreaterThan,
            ">=" => Self::GreaterThanOrEqual,
            "BETWEEN" => Self::Between,
            "NOT BETWEEN" => Self::NotBetween,
            "IN" => Self::In,
            "NOT IN" => Self::NotIn,
            "IS" => Self::Is,
            "IS NOT" => Self::IsNot,
            "LIKE" => Self::Like,
            "NOT LIKE" => Self::NotLike,
            "REGEXP" | "~" => Self::RegExp,
            "NOT REGEXP" | "!~" => Self::NotRegExp,
            _ => Self::Custom(text.trim().to_string()),
        }
    }

    /// Check if this operator takes a two-element range.
    pub fn is_range(&self) -> bool {
        matches!(self, Self::Between | Self::NotBetween)
    }

    /// Check if this operator takes a list of values.
    pub fn is_membership(&self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }
}

/// An operator paired with its right-hand side.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    op: Operator,
    value: Value,
}

impl Comparison {
    pub fn new(op: Operator, value: impl Into<Value>) -> Self {
        let value = value.into();
        let value = if op.is_membership() {
            Value::List(flatten(value.into_list()))
        } else {
            value
        };
        Self { op, value }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_parts(self) -> (Operator, Value) {
        (self.op, self.value)
    }

    pub fn eq(value: impl Into<Value>) -> Self {
        Self::new(Operator::Equal, value)
    }

    pub fn not_eq(value: impl Into<Value>) -> Self {
        Self::new(Operator::NotEqual, value)
    }

    pub fn lt(value: impl Into<Value>) -> Self {
        Self::new(Operator::LessThan, value)
    }

    pub fn lte(value: impl Into<Value>) -> Self {
        Self::new(Operator::LessThanOrEqual, value)
    }

    pub fn gt(value: impl Into<Value>) -> Self {
        Self::new(Operator::GreaterThan, value)
    }

    pub fn gte(value: impl Into<Value>) -> Self {
        Self::new(Operator::GreaterThanOrEqual, value)
    }

    pub fn between(low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self::new(Operator::Between, Value::List(vec![low.into(), high.into()]))
    }

    pub fn not_between(low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self::new(
            Operator::NotBetween,
            Value::List(vec![low.into(), high.into()]),
        )
    }

    /// Membership test. Nested lists are flattened into one ordered sequence.
    pub fn is_in<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Self::new(
            Operator::In,
            Value::List(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn not_in<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Self::new(
            Operator::NotIn,
            Value::List(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn is(value: impl Into<Value>) -> Self {
        Self::new(Operator::Is, value)
    }

    pub fn is_not(value: impl Into<Value>) -> Self {
        Self::new(Operator::IsNot, value)
    }

    pub fn is_null() -> Self {
        Self::new(Operator::Is, Value::Null)
    }

    pub fn is_not_null() -> Self {
        Self::new(Operator::IsNot, Value::Null)
    }

    pub fn like(pattern: impl Into<Value>) -> Self {
        Self::new(Operator::Like, pattern)
    }

    pub fn not_like(pattern: impl Into<Value>) -> Self {
        Self::new(Operator::NotLike, pattern)
    }

    pub fn regexp(pattern: impl Into<Value>) -> Self {
        Self::new(Operator::RegExp, pattern)
    }

    pub fn not_regexp(pattern: impl Into<Value>) -> Self {
        Self::new(Operator::NotRegExp, pattern)
    }

    /// Comparison with a driver-specific operator emitted verbatim.
    pub fn op(operator: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(Operator::Custom(operator.into()), value)
    }
}

fn flatten(values: Vec<Value>) -> Vec<Value> {
    let mut out = Vec::with_capacity(values.len());
    for v in values {
        match v {
            Value::List(inner) => out.extend(flatten(inner)),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_parse() {
        assert_eq!(Operator::parse(">="), Operator::GreaterThanOrEqual);
        assert_eq!(Operator::parse("<>"), Operator::NotEqual);
        assert_eq!(Operator::parse("not   in"), Operator::NotIn);
        assert_eq!(Operator::parse("Is Not"), Operator::IsNot);
        assert_eq!(Operator::parse("~"), Operator::RegExp);
        assert_eq!(Operator::parse("@>"), Operator::Custom("@>".into()));
    }

    #[test]
    fn test_in_normalizes_nested_lists() {
        let cmp = Comparison::is_in(vec![Value::from(1), Value::from(vec![2, 3]), Value::from(4)]);
        assert_eq!(cmp.operator(), &Operator::In);
        assert_eq!(
            cmp.value(),
            &Value::List(vec![
                Value::Int(1),
                Value::Int(2),
                Value::Int(3),
                Value::Int(4)
            ])
        );
    }

    #[test]
    fn test_in_wraps_scalar() {
        let cmp = Comparison::new(Operator::NotIn, 5);
        assert_eq!(cmp.value(), &Value::List(vec![Value::Int(5)]));
    }

    #[test]
    fn test_between_holds_two_values() {
        let cmp = Comparison::between(1, 10);
        assert!(cmp.operator().is_range());
        assert_eq!(cmp.value(), &Value::List(vec![Value::Int(1), Value::Int(10)]));
    }

    #[test]
    fn test_null_checks() {
        assert_eq!(Comparison::is_null().value(), &Value::Null);
        assert_eq!(Comparison::is_not_null().operator(), &Operator::IsNot);
    }
}
