//! Structural description of one SQL operation.

use crate::expr::Expr;
use crate::models::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Truncate,
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

impl OrderBy {
    /// Parse `"name"` or `"-name"` (descending).
    pub fn parse(term: &str) -> Self {
        let term = term.trim();
        match term.strip_prefix('-') {
            Some(column) => Self {
                column: column.trim().to_string(),
                descending: true,
            },
            None => Self {
                column: term.to_string(),
                descending: false,
            },
        }
    }
}

/// A statement before it is rendered against a dialect.
///
/// Built fresh for every query. `columns` and `values` are parallel for
/// INSERT and UPDATE; for SELECT `columns` is the projection (empty means
/// `*`).
#[derive(Debug, Clone)]
pub struct Statement {
    pub kind: StatementKind,
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<Value>,
    pub filter: Option<Expr>,
    pub order_by: Vec<OrderBy>,
    pub group_by: Vec<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub returning: Vec<String>,
}

impl Statement {
    fn new(kind: StatementKind, table: impl Into<String>) -> Self {
        Self {
            kind,
            table: table.into(),
            columns: Vec::new(),
            values: Vec::new(),
            filter: None,
            order_by: Vec::new(),
            group_by: Vec::new(),
            limit: None,
            offset: None,
            returning: Vec::new(),
        }
    }

    pub fn select(table: impl Into<String>) -> Self {
        Self::new(StatementKind::Select, table)
    }

    pub fn insert(table: impl Into<String>) -> Self {
        Self::new(StatementKind::Insert, table)
    }

    pub fn update(table: impl Into<String>) -> Self {
        Self::new(StatementKind::Update, table)
    }

    pub fn delete(table: impl Into<String>) -> Self {
        Self::new(StatementKind::Delete, table)
    }

    pub fn truncate(table: impl Into<String>) -> Self {
        Self::new(StatementKind::Truncate, table)
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Add one column/value pair for INSERT or UPDATE.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.push(column.into());
        self.values.push(value.into());
        self
    }

    pub fn filter(mut self, expr: impl Into<Expr>) -> Self {
        self.filter = Some(expr.into());
        self
    }

    /// Add ORDER BY terms; a leading `-` sorts descending.
    pub fn order_by<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.order_by
            .extend(terms.into_iter().map(|t| OrderBy::parse(t.as_ref())));
        self
    }

    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.returning.extend(columns.into_iter().map(Into::into));
        self
    }
}
