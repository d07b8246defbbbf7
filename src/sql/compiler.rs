//! Statement compilation: render, expand placeholders, then apply the
//! dialect's final rewrite.

use crate::error::DbResult;
use crate::models::Value;
use crate::sql::preprocess::{preprocess, replace_with_dollar_sign};
use crate::sql::statement::Statement;
use crate::sql::template::Template;
use std::collections::hash_map::DefaultHasher;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};

/// Cache key derived from compiled SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub fn of(sql: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        sql.hash(&mut hasher);
        Self(hasher.finish())
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Final SQL text and bindable arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    pub sql: String,
    pub args: Vec<Value>,
    fingerprint: Fingerprint,
}

impl Compiled {
    pub fn new(sql: String, args: Vec<Value>) -> Self {
        let fingerprint = Fingerprint::of(&sql);
        Self {
            sql,
            args,
            fingerprint,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }
}

/// Turns statements and raw queries into driver-ready SQL.
///
/// Implementations must be pure: the same input always yields the same
/// text and argument order.
pub trait Compiler: Send + Sync + Debug {
    /// Post-process rendered text and arguments.
    fn finish(&self, sql: &str, args: Vec<Value>) -> DbResult<Compiled>;

    fn compile(&self, template: &dyn Template, stmt: &Statement) -> DbResult<Compiled> {
        let (sql, args) = template.render(stmt)?;
        self.finish(&sql, args)
    }

    fn compile_raw(&self, sql: &str, args: Vec<Value>) -> DbResult<Compiled> {
        self.finish(sql, args)
    }
}

/// Expands placeholders and leaves `?` markers in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCompiler;

impl Compiler for DefaultCompiler {
    fn finish(&self, sql: &str, args: Vec<Value>) -> DbResult<Compiled> {
        let (sql, args) = preprocess(sql, args);
        Ok(Compiled::new(sql, args))
    }
}

/// Expands placeholders, then numbers them `$1, $2, ...`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DollarCompiler;

impl Compiler for DollarCompiler {
    fn finish(&self, sql: &str, args: Vec<Value>) -> DbResult<Compiled> {
        let (sql, args) = preprocess(sql, args);
        Ok(Compiled::new(replace_with_dollar_sign(&sql), args))
    }
}
