//! Per-dialect rendering of statements into SQL text with `?` markers.

use crate::error::{DbError, DbResult};
use crate::expr::{Condition, Expr, Group, Operator};
use crate::models::Value;
use crate::sql::statement::{Statement, StatementKind};
use std::borrow::Cow;
use std::fmt::Debug;

/// Renders a [`Statement`] into SQL text and arguments in marker order.
///
/// Dialects override the small hooks (quoting, operators, paging); the
/// statement layout is shared.
pub trait Template: Send + Sync + Debug {
    /// Character used to quote identifiers.
    fn identifier_quote(&self) -> char;

    fn operator_sql<'a>(&self, op: &'a Operator) -> Cow<'a, str> {
        standard_operator(op)
    }

    fn supports_returning(&self) -> bool {
        false
    }

    fn truncate_sql(&self, table: &str) -> String {
        format!("TRUNCATE TABLE {}", table)
    }

    fn default_values_sql(&self) -> &'static str {
        "DEFAULT VALUES"
    }

    /// LIMIT/OFFSET clause, without leading space. Empty when neither is set.
    fn limit_offset_sql(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (Some(l), Some(o)) => format!("LIMIT {} OFFSET {}", l, o),
            (Some(l), None) => format!("LIMIT {}", l),
            (None, Some(o)) => format!("OFFSET {}", o),
            (None, None) => String::new(),
        }
    }

    /// Quote an identifier. Dotted names are quoted per part; `*` and
    /// anything that is not a plain identifier (function calls, aliases)
    /// is emitted as written.
    fn quote_ident(&self, ident: &str) -> String {
        let ident = ident.trim();
        let plain = ident
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_alphanumeric() || c == '_'));
        if !plain {
            return ident.to_string();
        }
        let q = self.identifier_quote();
        ident
            .split('.')
            .map(|part| format!("{q}{part}{q}"))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn render(&self, stmt: &Statement) -> DbResult<(String, Vec<Value>)> {
        Renderer {
            template: self,
            args: Vec::new(),
        }
        .statement(stmt)
    }
}

struct Renderer<'t, T: ?Sized> {
    template: &'t T,
    args: Vec<Value>,
}

impl<T: Template + ?Sized> Renderer<'_, T> {
    fn statement(mut self, stmt: &Statement) -> DbResult<(String, Vec<Value>)> {
        if stmt.table.trim().is_empty() {
            return Err(DbError::build("statement has no target table"));
        }
        let table = self.template.quote_ident(&stmt.table);

        let mut sql = match stmt.kind {
            StatementKind::Select => {
                let projection = if stmt.columns.is_empty() {
                    "*".to_string()
                } else {
                    self.idents(&stmt.columns)
                };
                format!("SELECT {} FROM {}", projection, table)
            }
            StatementKind::Insert => self.insert(stmt, &table)?,
            StatementKind::Update => {
                if stmt.columns.is_empty() {
                    return Err(DbError::build("UPDATE requires at least one column"));
                }
                check_parallel(stmt)?;
                let assignments = stmt
                    .columns
                    .iter()
                    .map(|c| format!("{} = ?", self.template.quote_ident(c)))
                    .collect::<Vec<_>>()
                    .join(", ");
                self.args.extend(stmt.values.iter().cloned());
                format!("UPDATE {} SET {}", table, assignments)
            }
            StatementKind::Delete => format!("DELETE FROM {}", table),
            StatementKind::Truncate => return Ok((self.template.truncate_sql(&table), vec![])),
        };

        if let Some(filter) = &stmt.filter {
            if let Some((clause, _)) = self.expr(filter)? {
                sql.push_str(" WHERE ");
                sql.push_str(&clause);
            }
        }

        if stmt.kind == StatementKind::Select {
            if !stmt.group_by.is_empty() {
                sql.push_str(" GROUP BY ");
                sql.push_str(&self.idents(&stmt.group_by));
            }
            if !stmt.order_by.is_empty() {
                let terms = stmt
                    .order_by
                    .iter()
                    .map(|o| {
                        let col = self.template.quote_ident(&o.column);
                        if o.descending {
                            format!("{} DESC", col)
                        } else {
                            format!("{} ASC", col)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                sql.push_str(" ORDER BY ");
                sql.push_str(&terms);
            }
            let paging = self.template.limit_offset_sql(stmt.limit, stmt.offset);
            if !paging.is_empty() {
                sql.push(' ');
                sql.push_str(&paging);
            }
        }

        if !stmt.returning.is_empty() && self.template.supports_returning() {
            sql.push_str(" RETURNING ");
            sql.push_str(&self.idents(&stmt.returning));
        }

        Ok((sql, self.args))
    }

    fn insert(&mut self, stmt: &Statement, table: &str) -> DbResult<String> {
        check_parallel(stmt)?;
        if stmt.columns.is_empty() {
            return Ok(format!(
                "INSERT INTO {} {}",
                table,
                self.template.default_values_sql()
            ));
        }
        let markers = vec!["?"; stmt.values.len()].join(", ");
        self.args.extend(stmt.values.iter().cloned());
        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            self.idents(&stmt.columns),
            markers
        ))
    }

    fn idents(&self, names: &[String]) -> String {
        names
            .iter()
            .map(|n| self.template.quote_ident(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Render a node. Returns the text and whether it must be wrapped in
    /// parentheses when joined with siblings, or `None` when it is empty.
    fn expr(&mut self, expr: &Expr) -> DbResult<Option<(String, bool)>> {
        match expr {
            Expr::Condition(c) => self.condition(c).map(|s| Some((s, false))),
            Expr::Group(g) => self.group(g),
            Expr::Raw(raw) => {
                if raw.text.trim().is_empty() {
                    return Ok(None);
                }
                self.args.extend(raw.args.iter().cloned());
                Ok(Some((raw.text.clone(), true)))
            }
        }
    }

    fn group(&mut self, group: &Group) -> DbResult<Option<(String, bool)>> {
        let mut parts = Vec::new();
        for child in group.expressions() {
            if let Some(part) = self.expr(&child)? {
                parts.push(part);
            }
        }
        if parts.len() < 2 {
            return Ok(parts.pop());
        }
        let joiner = format!(" {} ", group.joiner().as_sql());
        let text = parts
            .into_iter()
            .map(|(text, wrap)| if wrap { format!("({})", text) } else { text })
            .collect::<Vec<_>>()
            .join(&joiner);
        Ok(Some((text, true)))
    }

    fn condition(&mut self, c: &Condition) -> DbResult<String> {
        let column = self.template.quote_ident(&c.column);

        if c.op.is_range() {
            let Value::List(bounds) = &c.value else {
                return Err(DbError::build(format!(
                    "{} on {} expects two values, got {}",
                    self.template.operator_sql(&c.op),
                    c.column,
                    c.value.type_name()
                )));
            };
            let [low, high] = bounds.as_slice() else {
                return Err(DbError::build(format!(
                    "{} on {} expects two values, got {}",
                    self.template.operator_sql(&c.op),
                    c.column,
                    bounds.len()
                )));
            };
            self.args.push(low.clone());
            self.args.push(high.clone());
            return Ok(format!(
                "{} {} ? AND ?",
                column,
                self.template.operator_sql(&c.op)
            ));
        }

        let op = match (&c.op, &c.value) {
            (Operator::Equal | Operator::Is, Value::Null) => {
                return Ok(format!("{} IS NULL", column));
            }
            (Operator::NotEqual | Operator::IsNot, Value::Null) => {
                return Ok(format!("{} IS NOT NULL", column));
            }
            (op, _) => self.template.operator_sql(op),
        };
        if op.trim().is_empty() {
            return Err(DbError::build(format!("empty operator on column {}", c.column)));
        }

        self.args.push(c.value.clone());
        Ok(format!("{} {} ?", column, op))
    }
}

fn check_parallel(stmt: &Statement) -> DbResult<()> {
    if stmt.columns.len() != stmt.values.len() {
        return Err(DbError::build(format!(
            "{} columns but {} values for {}",
            stmt.columns.len(),
            stmt.values.len(),
            stmt.table
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlTemplate;

impl Template for MySqlTemplate {
    fn identifier_quote(&self) -> char {
        '`'
    }

    fn default_values_sql(&self) -> &'static str {
        "() VALUES ()"
    }

    fn limit_offset_sql(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        // MySQL has no OFFSET without LIMIT.
        match (limit, offset) {
            (None, Some(o)) => format!("LIMIT {} OFFSET {}", u64::MAX, o),
            (Some(l), Some(o)) => format!("LIMIT {} OFFSET {}", l, o),
            (Some(l), None) => format!("LIMIT {}", l),
            (None, None) => String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresTemplate;

impl Template for PostgresTemplate {
    fn identifier_quote(&self) -> char {
        '"'
    }

    fn operator_sql<'a>(&self, op: &'a Operator) -> Cow<'a, str> {
        match op {
            Operator::RegExp => Cow::Borrowed("~"),
            Operator::NotRegExp => Cow::Borrowed("!~"),
            other => standard_operator(other),
        }
    }

    fn supports_returning(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteTemplate;

impl Template for SqliteTemplate {
    fn identifier_quote(&self) -> char {
        '"'
    }

    fn truncate_sql(&self, table: &str) -> String {
        format!("DELETE FROM {}", table)
    }

    fn limit_offset_sql(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (None, Some(o)) => format!("LIMIT -1 OFFSET {}", o),
            (Some(l), Some(o)) => format!("LIMIT {} OFFSET {}", l, o),
            (Some(l), None) => format!("LIMIT {}", l),
            (None, None) => String::new(),
        }
    }
}

fn standard_operator(op: &Operator) -> Cow<'_, str> {
    Cow::Borrowed(match op {
        Operator::Equal => "=",
        Operator::NotEqual => "!=",
        Operator::LessThan => "<",
        Operator::LessThanOrEqual => "<=",
        Operator::GreaterThan => ">",
        Operator::GreaterThanOrEqual => ">=",
        Operator::Between => "BETWEEN",
        Operator::NotBetween => "NOT BETWEEN",
        Operator::In => "IN",
        Operator::NotIn => "NOT IN",
        Operator::Is => "IS",
        Operator::IsNot => "IS NOT",
        Operator::Like => "LIKE",
        Operator::NotLike => "NOT LIKE",
        Operator::RegExp => "REGEXP",
        Operator::NotRegExp => "NOT REGEXP",
        Operator::Custom(s) => s.as_str(),
    })
}
