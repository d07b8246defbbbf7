//! Driver capability consumed by sessions.
//!
//! A driver executes SQL that has already been compiled for its dialect.
//! Cancellation is handled by the caller dropping the returned future, so
//! implementations must be cancel-safe at await points.

use crate::error::DbResult;
use crate::models::{DatabaseType, ExecResult, Row, Value};
use async_trait::async_trait;

/// Pool-level operations.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    type Tx: DriverTx;
    type Stmt: DriverStatement;

    fn database_type(&self) -> DatabaseType;

    async fn exec(&self, sql: &str, args: &[Value]) -> DbResult<ExecResult>;

    async fn query(&self, sql: &str, args: &[Value]) -> DbResult<Vec<Row>>;

    /// First row of the result, if any.
    async fn query_row(&self, sql: &str, args: &[Value]) -> DbResult<Option<Row>> {
        Ok(self.query(sql, args).await?.into_iter().next())
    }

    async fn prepare(&self, sql: &str) -> DbResult<Self::Stmt>;

    async fn begin(&self) -> DbResult<Self::Tx>;

    /// Release every connection. Later calls fail with a connection error.
    async fn close(&self);
}

/// A live transaction handle.
///
/// After `commit` or `rollback` succeeds every further call fails.
#[async_trait]
pub trait DriverTx: Send + 'static {
    async fn exec(&mut self, sql: &str, args: &[Value]) -> DbResult<ExecResult>;

    async fn query(&mut self, sql: &str, args: &[Value]) -> DbResult<Vec<Row>>;

    async fn query_row(&mut self, sql: &str, args: &[Value]) -> DbResult<Option<Row>> {
        Ok(self.query(sql, args).await?.into_iter().next())
    }

    async fn commit(&mut self) -> DbResult<()>;

    async fn rollback(&mut self) -> DbResult<()>;
}

/// A prepared statement bound to the driver that created it.
#[async_trait]
pub trait DriverStatement: Send + Sync + 'static {
    /// Query text the statement was prepared from.
    fn sql(&self) -> &str;

    async fn exec(&self, args: &[Value]) -> DbResult<ExecResult>;

    async fn query(&self, args: &[Value]) -> DbResult<Vec<Row>>;

    async fn close(&self) -> DbResult<()>;
}
