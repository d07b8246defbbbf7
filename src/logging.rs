//! Tracing setup and per-execution status logging.

use crate::error::{DbError, DbResult};
use crate::models::QueryStatus;
use std::time::Duration;
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level`. Fails if a subscriber is
/// already installed.
pub fn init_tracing(level: &str, json: bool) -> DbResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let result = if json {
        subscriber.with(fmt::layer().json()).try_init()
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .try_init()
    };
    result.map_err(|e| DbError::internal(format!("Failed to install tracing subscriber: {e}")))
}

/// Log one execution. Failed and slow executions are warnings.
pub fn log_query_status(status: &QueryStatus, slow_threshold: Duration) {
    let elapsed_ms = status.elapsed().as_millis() as u64;

    if let Some(error) = status.error() {
        warn!(
            session_id = status.session_id(),
            transaction_id = ?status.transaction_id(),
            query = %status.query(),
            elapsed_ms,
            error = %error,
            "Query failed"
        );
    } else if status.is_slow(slow_threshold) {
        warn!(
            session_id = status.session_id(),
            transaction_id = ?status.transaction_id(),
            query = %status.query(),
            args = status.args().len(),
            elapsed_ms,
            threshold_ms = slow_threshold.as_millis() as u64,
            "Slow query"
        );
    } else {
        debug!(
            session_id = status.session_id(),
            transaction_id = ?status.transaction_id(),
            query = %status.query(),
            args = status.args().len(),
            rows_affected = ?status.rows_affected(),
            elapsed_ms,
            "Query executed"
        );
    }
}
