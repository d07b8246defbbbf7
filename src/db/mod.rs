//! Database execution layer.
//!
//! This module provides:
//! - The driver capability and its sqlx implementation
//! - Parameter binding and row decoding
//! - Error classification per dialect
//! - Connection admission retry
//! - The prepared-statement cache
//! - Sessions, transactions and the retry driver

pub mod admission;
pub mod classify;
pub mod context;
pub mod dialect;
pub mod driver;
pub mod params;
pub mod session;
pub mod sqlx_driver;
pub mod stmt_cache;
pub mod types;

pub use admission::AdmissionGate;
pub use classify::{ErrorClassifier, ErrorKind, PatternClassifier};
pub use context::Context;
pub use dialect::Dialect;
pub use driver::{Driver, DriverStatement, DriverTx};
pub use session::{
    Collection, Database, IdGenerator, PreparedStatement, Session, SessionState,
};
pub use sqlx_driver::{DbPool, SqlxDriver, SqlxStatement, SqlxTx};
pub use stmt_cache::{CacheEntry, StatementCache, StmtGuard};
