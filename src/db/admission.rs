//! Connection admission retry.
//!
//! When the server rejects a connection because it is full, callers wait
//! with exponential backoff instead of failing. All waiters share one
//! process-wide lock so a burst of reconnects cannot itself exhaust the
//! server's connection budget.

use crate::db::classify::{ErrorClassifier, ErrorKind};
use crate::db::context::Context;
use crate::error::{DbError, DbResult};
use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const ADMISSION_INITIAL_BACKOFF: Duration = Duration::from_millis(10);
pub const ADMISSION_MAX_BACKOFF: Duration = Duration::from_millis(500);
pub const ADMISSION_BUDGET: Duration = Duration::from_secs(5);

static SHARED_LOCK: LazyLock<Arc<Mutex<()>>> = LazyLock::new(|| Arc::new(Mutex::new(())));

/// Serialises connection attempts and retries admission failures.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    lock: Arc<Mutex<()>>,
    initial_backoff: Duration,
    max_backoff: Duration,
    budget: Duration,
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::shared()
    }
}

impl AdmissionGate {
    /// Gate backed by the process-wide lock.
    pub fn shared() -> Self {
        Self {
            lock: Arc::clone(&SHARED_LOCK),
            initial_backoff: ADMISSION_INITIAL_BACKOFF,
            max_backoff: ADMISSION_MAX_BACKOFF,
            budget: ADMISSION_BUDGET,
        }
    }

    /// Gate with its own lock, not shared with the rest of the process.
    pub fn isolated() -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            ..Self::shared()
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration, budget: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self.budget = budget;
        self
    }

    /// Call `connect` until it succeeds, fails with anything other than an
    /// admission failure, or the wait budget runs out.
    pub async fn wait_for_connection<T, F, Fut>(
        &self,
        ctx: &Context,
        classifier: &dyn ErrorClassifier,
        mut connect: F,
    ) -> DbResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let _guard = ctx
            .run("admission", async { Ok(self.lock.lock().await) })
            .await?;

        let started = Instant::now();
        let mut backoff = self.initial_backoff;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let err = match ctx.run("connect", connect()).await {
                Ok(conn) => {
                    if attempts > 1 {
                        debug!(attempts, "Connection admitted after retry");
                    }
                    return Ok(conn);
                }
                Err(e) => e,
            };

            if err.is_cancellation() || classifier.classify(&err) != ErrorKind::TooManyClients {
                return Err(err);
            }
            if started.elapsed() + backoff > self.budget {
                warn!(
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Giving up waiting for a free connection slot"
                );
                return Err(DbError::gave_up("connection admission", attempts, err));
            }

            warn!(
                attempt = attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "Server has too many clients, retrying"
            );
            ctx.sleep("admission backoff", backoff).await?;
            backoff = (backoff * 2).min(self.max_backoff);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::classify::PatternClassifier;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn too_many() -> DbError {
        DbError::connection("sorry, too many clients already", "")
    }

    fn fast_gate() -> AdmissionGate {
        AdmissionGate::isolated().with_backoff(
            Duration::from_millis(1),
            Duration::from_millis(4),
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn test_retries_admission_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = fast_gate()
            .wait_for_connection(&Context::background(), &PatternClassifier::postgres(), move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(too_many())
                } else {
                    Ok("conn")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "conn");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_other_errors_return_immediately() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let err = fast_gate()
            .wait_for_connection(&Context::background(), &PatternClassifier::postgres(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(DbError::connection("password authentication failed", ""))
            })
            .await
            .unwrap_err();

        assert!(!err.is_gave_up());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let gate = AdmissionGate::isolated().with_backoff(
            Duration::from_millis(5),
            Duration::from_millis(10),
            Duration::from_millis(40),
        );
        let err = gate
            .wait_for_connection(&Context::background(), &PatternClassifier::postgres(), || async {
                Err::<(), _>(too_many())
            })
            .await
            .unwrap_err();

        assert!(err.is_gave_up());
        assert!(err.root_cause().to_string().contains("too many clients"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_waiting() {
        let ctx = Context::background();
        ctx.cancel();
        let err = fast_gate()
            .wait_for_connection(&ctx, &PatternClassifier::postgres(), || async {
                Err::<(), _>(too_many())
            })
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn test_callers_are_serialised() {
        let gate = fast_gate();
        let inside = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let gate = gate.clone();
            let inside = Arc::clone(&inside);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                gate.wait_for_connection(
                    &Context::background(),
                    &PatternClassifier::postgres(),
                    || {
                        let inside = Arc::clone(&inside);
                        let peak = Arc::clone(&peak);
                        async move {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            inside.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        }
                    },
                )
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
