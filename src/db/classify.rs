//! Driver error classification.
//!
//! Drivers rarely expose typed signals for transient failures, so each
//! dialect supplies a classifier built from SQLSTATE / vendor codes and
//! message fragments.

use crate::error::DbError;
use std::fmt::Debug;

/// How the engine should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Serialization failure, deadlock or lock timeout. The transaction
    /// body may be retried.
    TransactionAborted,
    /// The server refused a new connection because it is at capacity.
    TooManyClients,
    /// A prepared statement no longer exists on the server.
    StatementInvalid,
    Other,
}

impl ErrorKind {
    /// Check if the error is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransactionAborted | Self::TooManyClients)
    }
}

pub trait ErrorClassifier: Send + Sync + Debug {
    fn classify(&self, err: &DbError) -> ErrorKind;
}

#[derive(Debug, Clone)]
struct Rule {
    kind: ErrorKind,
    codes: Vec<String>,
    /// Lowercase fragments; every fragment must appear in the message.
    fragments: Vec<Vec<String>>,
}

/// Classifier driven by code and message tables.
///
/// Rules are checked in the order they were added; the first match wins.
#[derive(Debug, Clone, Default)]
pub struct PatternClassifier {
    rules: Vec<Rule>,
}

impl PatternClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map SQLSTATE or vendor codes to `kind`.
    pub fn codes(mut self, kind: ErrorKind, codes: &[&str]) -> Self {
        self.rule(kind).codes.extend(codes.iter().map(|c| c.to_string()));
        self
    }

    /// Map a message to `kind` when it contains all of `fragments`
    /// (case-insensitive).
    pub fn message(mut self, kind: ErrorKind, fragments: &[&str]) -> Self {
        self.rule(kind)
            .fragments
            .push(fragments.iter().map(|f| f.to_lowercase()).collect());
        self
    }

    fn rule(&mut self, kind: ErrorKind) -> &mut Rule {
        let idx = match self.rules.iter().position(|r| r.kind == kind) {
            Some(idx) => idx,
            None => {
                self.rules.push(Rule {
                    kind,
                    codes: Vec::new(),
                    fragments: Vec::new(),
                });
                self.rules.len() - 1
            }
        };
        &mut self.rules[idx]
    }

    pub fn postgres() -> Self {
        Self::new()
            .codes(ErrorKind::TransactionAborted, &["40001", "40P01"])
            .message(ErrorKind::TransactionAborted, &["could not serialize access"])
            .message(ErrorKind::TransactionAborted, &["deadlock detected"])
            .codes(ErrorKind::TooManyClients, &["53300"])
            .message(ErrorKind::TooManyClients, &["too many clients"])
            .message(ErrorKind::TooManyClients, &["remaining connection slots are reserved"])
            .codes(ErrorKind::StatementInvalid, &["26000"])
            .message(ErrorKind::StatementInvalid, &["prepared statement", "does not exist"])
    }

    pub fn mysql() -> Self {
        Self::new()
            .codes(ErrorKind::TransactionAborted, &["40001"])
            .message(ErrorKind::TransactionAborted, &["deadlock found"])
            .message(ErrorKind::TransactionAborted, &["lock wait timeout exceeded"])
            .codes(ErrorKind::TooManyClients, &["08004"])
            .message(ErrorKind::TooManyClients, &["too many connections"])
            .message(ErrorKind::StatementInvalid, &["unknown prepared statement handler"])
    }

    pub fn sqlite() -> Self {
        // 5 = SQLITE_BUSY, 6 = SQLITE_LOCKED, plus their extended codes
        Self::new()
            .codes(ErrorKind::TransactionAborted, &["5", "6", "261", "262", "517"])
            .message(ErrorKind::TransactionAborted, &["database is locked"])
            .message(ErrorKind::TransactionAborted, &["database table is locked"])
    }
}

impl ErrorClassifier for PatternClassifier {
    fn classify(&self, err: &DbError) -> ErrorKind {
        let message = match err {
            DbError::Database { message, .. } | DbError::Connection { message, .. } => {
                message.to_lowercase()
            }
            _ => return ErrorKind::Other,
        };
        let code = err.sql_state();

        for rule in &self.rules {
            if code.is_some_and(|c| rule.codes.iter().any(|rc| rc == c)) {
                return rule.kind;
            }
            if rule
                .fragments
                .iter()
                .any(|all| all.iter().all(|f| message.contains(f.as_str())))
            {
                return rule.kind;
            }
        }
        ErrorKind::Other
    }
}
