//! Data models shared across the crate.
//!
//! This module re-exports argument values, column lists, rows and
//! execution records.

pub mod columns;
pub mod connection;
pub mod status;
pub mod value;

pub use columns::ToColumns;
pub use connection::DatabaseType;
pub use status::{ExecResult, QueryStatus, Row};
pub use value::{RawSql, Value, raw};
