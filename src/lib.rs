//! DB Session Library
//!
//! Statement compilation, prepared-statement caching and transactional
//! execution over SQL databases (SQLite, PostgreSQL, MySQL).
//!
//! Filters are built as immutable expression trees ([`expr`]), rendered per
//! dialect and expanded into driver-ready SQL ([`sql`]), then executed
//! through a [`Session`] that caches prepared statements and retries
//! aborted transactions ([`db`]).

pub mod config;
pub mod db;
pub mod error;
pub mod expr;
pub mod logging;
pub mod models;
pub mod sql;

pub use config::{ConnectionUrl, SessionSettings};
pub use db::{Context, Database, Session};
pub use error::{DbError, DbResult};
pub use models::{Value, raw};
