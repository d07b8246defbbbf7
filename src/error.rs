//! Error types for the session engine.
//!
//! This module defines all error types using `thiserror`. Build errors,
//! driver errors and retry exhaustion are distinct variants so callers can
//! tell a malformed query apart from a failed execution.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// Statement could not be compiled. Never retried.
    #[error("Query build failed: {message}")]
    Build { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "40001" for serialization failure
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Transaction error: {message} (transaction: {transaction_id})")]
    Transaction {
        message: String,
        transaction_id: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Giving up on {operation} after {attempts} attempt(s): {source}")]
    GaveUp {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<DbError>,
    },

    #[error("Session is closed")]
    SessionClosed,

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a query build error.
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>, transaction_id: impl ToString) -> Self {
        Self::Transaction {
            message: message.into(),
            transaction_id: transaction_id.to_string(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms,
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Wrap the last failure of an exhausted retry loop.
    pub fn gave_up(operation: impl Into<String>, attempts: u32, last: DbError) -> Self {
        Self::GaveUp {
            operation: operation.into(),
            attempts,
            source: Box::new(last),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// SQLSTATE or vendor code reported by the driver.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Check if this error came from a cancelled or expired context.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::Timeout { .. })
    }

    /// Check if this error is a query build failure.
    pub fn is_build(&self) -> bool {
        matches!(self, Self::Build { .. })
    }

    /// Check if this error reports an exhausted retry budget.
    pub fn is_gave_up(&self) -> bool {
        matches!(self, Self::GaveUp { .. })
    }

    /// The error wrapped by a `GaveUp`, or `self`.
    pub fn root_cause(&self) -> &DbError {
        match self {
            Self::GaveUp { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Driver errors keep their SQLSTATE so classifiers can see it; transport
/// failures become connection errors and decode failures internal ones.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error as E;
        match err {
            E::Database(db_err) => DbError::database(
                db_err.message(),
                db_err.code().map(|c| c.into_owned()),
                "Check the SQL and the objects it references",
            ),
            E::Configuration(e) => {
                DbError::connection(e.to_string(), "Check the connection URL and credentials")
            }
            E::PoolTimedOut => DbError::timeout("pool acquire", 0),
            E::PoolClosed => DbError::connection("pool is closed", "Open a new database handle"),
            E::Io(_) | E::Tls(_) | E::Protocol(_) => DbError::connection(
                err.to_string(),
                "Check that the server is reachable and speaks the expected protocol",
            ),
            E::RowNotFound => DbError::database("no rows returned", None, ""),
            other => DbError::internal(other.to_string()),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
