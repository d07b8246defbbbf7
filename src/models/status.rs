//! Execution results and the per-execution status record.

use crate::models::Value;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;

/// A result row, keyed by column name.
pub type Row = serde_json::Map<String, JsonValue>;

/// Outcome of a statement that does not return rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Not reported by PostgreSQL; use RETURNING instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<i64>,
}

impl ExecResult {
    pub fn new(rows_affected: u64, last_insert_id: Option<i64>) -> Self {
        Self {
            rows_affected,
            last_insert_id,
        }
    }
}

/// Immutable record describing one execution.
///
/// Built once after the driver call returns and never modified afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct QueryStatus {
    session_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    transaction_id: Option<u64>,
    query: String,
    args: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rows_affected: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_insert_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

impl QueryStatus {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: u64,
        transaction_id: Option<u64>,
        query: impl Into<String>,
        args: Vec<Value>,
        result: Option<ExecResult>,
        error: Option<String>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            transaction_id,
            query: query.into(),
            args,
            rows_affected: result.map(|r| r.rows_affected),
            last_insert_id: result.and_then(|r| r.last_insert_id),
            error,
            started_at,
            finished_at,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn transaction_id(&self) -> Option<u64> {
        self.transaction_id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }

    pub fn last_insert_id(&self) -> Option<i64> {
        self.last_insert_id
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    /// Wall-clock duration; zero if the clock went backwards.
    pub fn elapsed(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Check if this execution is at or over the slow-query threshold.
    pub fn is_slow(&self, threshold: Duration) -> bool {
        !threshold.is_zero() && self.elapsed() >= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn status_with_duration(ms: i64) -> QueryStatus {
        let start = Utc::now();
        QueryStatus::new(
            1,
            Some(7),
            "SELECT 1",
            vec![Value::Int(1)],
            Some(ExecResult::new(3, Some(42))),
            None,
            start,
            start + TimeDelta::milliseconds(ms),
        )
    }

    #[test]
    fn test_status_fields() {
        let status = status_with_duration(5);
        assert_eq!(status.session_id(), 1);
        assert_eq!(status.transaction_id(), Some(7));
        assert_eq!(status.query(), "SELECT 1");
        assert_eq!(status.rows_affected(), Some(3));
        assert_eq!(status.last_insert_id(), Some(42));
        assert!(status.error().is_none());
        assert_eq!(status.elapsed(), Duration::from_millis(5));
    }

    #[test]
    fn test_slow_query_classification() {
        let status = status_with_duration(1500);
        assert!(status.is_slow(Duration::from_secs(1)));
        assert!(!status.is_slow(Duration::from_secs(2)));
        // Zero threshold disables the check
        assert!(!status.is_slow(Duration::ZERO));
    }

    #[test]
    fn test_status_serializes_without_empty_fields() {
        let start = Utc::now();
        let status = QueryStatus::new(2, None, "DELETE FROM t", vec![], None, None, start, start);
        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("transaction_id").is_none());
        assert!(json.get("error").is_none());
        assert_eq!(json["query"], "DELETE FROM t");
    }
}
