//! Per-database bundle of template, compiler and error classifier.

use crate::db::classify::{ErrorClassifier, PatternClassifier};
use crate::error::DbResult;
use crate::models::{DatabaseType, Value};
use crate::sql::{
    Compiled, Compiler, DefaultCompiler, DollarCompiler, MySqlTemplate, PostgresTemplate,
    SqliteTemplate, Statement, Template,
};
use std::sync::Arc;

const MYSQL_PRIMARY_KEYS: &str = "SELECT column_name AS name \
     FROM information_schema.key_column_usage \
     WHERE table_schema = DATABASE() AND table_name = ? AND constraint_name = 'PRIMARY' \
     ORDER BY ordinal_position";

const POSTGRES_PRIMARY_KEYS: &str = "SELECT a.attname::text AS name \
     FROM pg_index i \
     JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey) \
     WHERE i.indrelid = CAST(? AS regclass) AND i.indisprimary \
     ORDER BY array_position(i.indkey, a.attnum)";

const SQLITE_PRIMARY_KEYS: &str = "SELECT name FROM pragma_table_info(?) WHERE pk > 0 ORDER BY pk";

/// Everything dialect-specific a session needs.
#[derive(Debug, Clone)]
pub struct Dialect {
    db_type: DatabaseType,
    template: Arc<dyn Template>,
    compiler: Arc<dyn Compiler>,
    classifier: Arc<dyn ErrorClassifier>,
}

impl Dialect {
    pub fn for_type(db_type: DatabaseType) -> Self {
        match db_type {
            DatabaseType::MySQL => Self::mysql(),
            DatabaseType::PostgreSQL => Self::postgres(),
            DatabaseType::SQLite => Self::sqlite(),
        }
    }

    pub fn mysql() -> Self {
        Self {
            db_type: DatabaseType::MySQL,
            template: Arc::new(MySqlTemplate),
            compiler: Arc::new(DefaultCompiler),
            classifier: Arc::new(PatternClassifier::mysql()),
        }
    }

    pub fn postgres() -> Self {
        Self {
            db_type: DatabaseType::PostgreSQL,
            template: Arc::new(PostgresTemplate),
            compiler: Arc::new(DollarCompiler),
            classifier: Arc::new(PatternClassifier::postgres()),
        }
    }

    pub fn sqlite() -> Self {
        Self {
            db_type: DatabaseType::SQLite,
            template: Arc::new(SqliteTemplate),
            compiler: Arc::new(DefaultCompiler),
            classifier: Arc::new(PatternClassifier::sqlite()),
        }
    }

    /// Replace the compiler, e.g. to rewrite pseudo-columns before expansion.
    pub fn with_compiler(mut self, compiler: Arc<dyn Compiler>) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    pub fn template(&self) -> &dyn Template {
        self.template.as_ref()
    }

    pub fn classifier(&self) -> &dyn ErrorClassifier {
        self.classifier.as_ref()
    }

    pub fn compile(&self, stmt: &Statement) -> DbResult<Compiled> {
        self.compiler.compile(self.template.as_ref(), stmt)
    }

    pub fn compile_raw(&self, sql: &str, args: Vec<Value>) -> DbResult<Compiled> {
        self.compiler.compile_raw(sql, args)
    }

    /// Query listing the primary-key columns of `table` as a `name` column,
    /// in key order.
    pub fn primary_keys_query(&self, table: &str) -> DbResult<Compiled> {
        let sql = match self.db_type {
            DatabaseType::MySQL => MYSQL_PRIMARY_KEYS,
            DatabaseType::PostgreSQL => POSTGRES_PRIMARY_KEYS,
            DatabaseType::SQLite => SQLITE_PRIMARY_KEYS,
        };
        self.compile_raw(sql, vec![Value::from(table)])
    }
}
