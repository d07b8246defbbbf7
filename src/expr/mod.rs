//! Logical expression trees used as WHERE clauses.

mod comparison;
mod cond;
mod group;

pub use comparison::{Comparison, Operator};
pub use cond::{Cond, Condition};
pub use group::{Expr, Group, Joiner};

/// Join nodes with AND.
pub fn and<I, E>(exprs: I) -> Group
where
    I: IntoIterator<Item = E>,
    E: Into<Expr>,
{
    Group::new(Joiner::And, exprs)
}

/// Join nodes with OR. Multi-key condition maps stay grouped under AND.
pub fn or<I, E>(exprs: I) -> Group
where
    I: IntoIterator<Item = E>,
    E: Into<Expr>,
{
    Group::new(Joiner::Or, exprs)
}
