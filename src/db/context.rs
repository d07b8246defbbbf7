//! Cancellation and deadlines for driver calls.

use crate::error::{DbError, DbResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation token plus an optional deadline, passed to every operation.
///
/// Cloning shares the token. Derived contexts (`with_timeout`, `child`) are
/// cancelled along with their parent but can be cancelled on their own.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Derive a context that can be cancelled independently of this one.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derive a context that expires after `timeout`, or at the parent's
    /// deadline if that comes first.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail fast if the context is already cancelled or expired.
    pub fn check(&self, operation: &str) -> DbResult<()> {
        if self.token.is_cancelled() {
            return Err(DbError::cancelled(operation));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(DbError::timeout(operation, 0));
        }
        Ok(())
    }

    /// Run `fut` until it completes, the context is cancelled or the
    /// deadline passes. The future is dropped on cancellation.
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        self.check(operation)?;
        let started = Instant::now();
        let bounded = async {
            match self.deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(DbError::timeout(
                        operation,
                        started.elapsed().as_millis() as u64,
                    )),
                },
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(DbError::cancelled(operation)),
            result = bounded => result,
        }
    }

    /// Sleep for `duration` unless the context ends first.
    pub async fn sleep(&self, operation: &str, duration: Duration) -> DbResult<()> {
        self.run(operation, async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}
