//! Sessions, transactions and the transaction retry driver.
//!
//! A [`Database`] owns the driver and hands out root [`Session`]s. A root
//! session runs statements on the pool and can start any number of
//! transaction sessions, each bound to one driver transaction.
//!
//! # Design Decisions
//!
//! - **Caches belong to the root session**: transaction sessions share the
//!   root's metadata caches but never use its prepared statements, since a
//!   cached statement runs on the pool and would escape the transaction
//! - **Ids from the factory**: session and transaction ids come from the
//!   [`Database`]'s own counter and are only used for log correlation
//! - **Retry only what the classifier calls aborted**: application errors
//!   and cancellations end `run_in_transaction` immediately

use crate::config::{ConnectionUrl, SessionSettings};
use crate::db::admission::AdmissionGate;
use crate::db::classify::ErrorKind;
use crate::db::context::Context;
use crate::db::dialect::Dialect;
use crate::db::driver::{Driver, DriverStatement, DriverTx};
use crate::db::sqlx_driver::SqlxDriver;
use crate::db::stmt_cache::{StatementCache, StmtGuard};
use crate::error::{DbError, DbResult};
use crate::expr::{Comparison, Condition, Expr};
use crate::logging::log_query_status;
use crate::models::{ExecResult, QueryStatus, Row, ToColumns, Value};
use crate::sql::{Compiled, Statement};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Monotonic source of session and transaction ids.
#[derive(Debug, Default)]
pub struct IdGenerator(AtomicU64);

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id, starting at 1.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionState {
    /// Constructed but not yet bound to a transaction.
    Idle,
    Open,
    InTransaction,
    Committed,
    RolledBack,
    /// Commit was interrupted; the server may or may not have applied it.
    CommitUnknown,
    Closed,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Open,
            2 => Self::InTransaction,
            3 => Self::Committed,
            4 => Self::RolledBack,
            5 => Self::CommitUnknown,
            _ => Self::Closed,
        }
    }

    /// Check if no further statements may run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Committed | Self::RolledBack | Self::CommitUnknown | Self::Closed
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Open => "open",
            Self::InTransaction => "in transaction",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
            Self::CommitUnknown => "in an unknown commit state",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collection {
    pub name: String,
    pub primary_keys: Vec<String>,
}

impl Collection {
    /// The primary key column when the key is a single column.
    pub fn primary_key(&self) -> Option<&str> {
        match self.primary_keys.as_slice() {
            [pk] => Some(pk),
            _ => None,
        }
    }
}

struct Shared<D: Driver> {
    driver: D,
    dialect: Dialect,
    settings: SessionSettings,
    gate: AdmissionGate,
    ids: IdGenerator,
}

/// Entry point: owns the driver and creates sessions.
pub struct Database<D: Driver> {
    shared: Arc<Shared<D>>,
}

impl<D: Driver> Clone for Database<D> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<D: Driver> std::fmt::Debug for Database<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("db_type", &self.shared.dialect.db_type())
            .field("settings", &self.shared.settings)
            .finish_non_exhaustive()
    }
}

impl Database<SqlxDriver> {
    /// Parse `url`, open a pool and wrap it.
    pub async fn connect(ctx: &Context, url: &str) -> DbResult<Self> {
        let url = ConnectionUrl::parse(url)?;
        let dialect = Dialect::for_type(url.db_type);
        let gate = AdmissionGate::shared();
        let driver = SqlxDriver::connect(ctx, &url, &gate, dialect.classifier()).await?;
        Ok(Self::with_gate(driver, dialect, url.settings, gate))
    }
}

impl<D: Driver> Database<D> {
    pub fn new(driver: D, dialect: Dialect, settings: SessionSettings) -> Self {
        Self::with_gate(driver, dialect, settings, AdmissionGate::shared())
    }

    pub fn with_gate(
        driver: D,
        dialect: Dialect,
        settings: SessionSettings,
        gate: AdmissionGate,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                driver,
                dialect,
                settings,
                gate,
                ids: IdGenerator::new(),
            }),
        }
    }

    /// Open a root session with its own caches.
    pub fn session(&self) -> Session<D> {
        let id = self.shared.ids.next();
        debug!(session_id = id, "Session opened");
        Session {
            id,
            shared: Arc::clone(&self.shared),
            root: Arc::new(RootState::new(self.shared.settings.prepared_statement_cache)),
            tx: None,
        }
    }

    pub fn driver(&self) -> &D {
        &self.shared.driver
    }

    pub fn dialect(&self) -> &Dialect {
        &self.shared.dialect
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.shared.settings
    }

    /// Close the driver. Sessions created from this database stop working.
    pub async fn close(&self) {
        info!(db_type = %self.shared.dialect.db_type(), "Closing database");
        self.shared.driver.close().await;
    }
}

/// State shared by a root session and the transactions it starts.
struct RootState<S: DriverStatement> {
    statements: StatementCache<S>,
    primary_keys: RwLock<HashMap<String, Vec<String>>>,
    collections: RwLock<HashMap<String, Collection>>,
    cache_enabled: AtomicBool,
    closed: AtomicBool,
}

impl<S: DriverStatement> RootState<S> {
    fn new(cache_enabled: bool) -> Self {
        Self {
            statements: StatementCache::new(),
            primary_keys: RwLock::new(HashMap::new()),
            collections: RwLock::new(HashMap::new()),
            cache_enabled: AtomicBool::new(cache_enabled),
            closed: AtomicBool::new(false),
        }
    }
}

enum TxSlot<T> {
    Unbound,
    Active(T),
    Finished,
}

struct TxState<T> {
    id: u64,
    state: AtomicU8,
    slot: Mutex<TxSlot<T>>,
}

impl<T: DriverTx> TxState<T> {
    fn new(id: u64) -> Self {
        Self {
            id,
            state: AtomicU8::new(SessionState::Idle as u8),
            slot: Mutex::new(TxSlot::Unbound),
        }
    }

    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Attach the driver transaction. Only valid once.
    async fn bind(&self, handle: T) -> DbResult<()> {
        let mut slot = self.slot.lock().await;
        if !matches!(*slot, TxSlot::Unbound) {
            return Err(DbError::transaction(
                "transaction session is already bound",
                self.id,
            ));
        }
        *slot = TxSlot::Active(handle);
        self.set_state(SessionState::InTransaction);
        Ok(())
    }

    fn unusable(&self, operation: &str) -> DbError {
        DbError::transaction(
            format!("cannot {}: transaction is {}", operation, self.state()),
            self.id,
        )
    }
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Exec,
    Query,
}

impl Mode {
    fn operation(self) -> &'static str {
        match self {
            Mode::Exec => "exec",
            Mode::Query => "query",
        }
    }
}

enum Outcome {
    Exec(ExecResult),
    Rows(Vec<Row>),
}

impl Outcome {
    fn into_exec(self) -> ExecResult {
        match self {
            Outcome::Exec(result) => result,
            Outcome::Rows(rows) => ExecResult::new(rows.len() as u64, None),
        }
    }

    fn into_rows(self) -> Vec<Row> {
        match self {
            Outcome::Rows(rows) => rows,
            Outcome::Exec(_) => Vec::new(),
        }
    }
}

async fn on_driver<D: Driver>(driver: &D, compiled: &Compiled, mode: Mode) -> DbResult<Outcome> {
    match mode {
        Mode::Exec => driver.exec(&compiled.sql, &compiled.args).await.map(Outcome::Exec),
        Mode::Query => driver.query(&compiled.sql, &compiled.args).await.map(Outcome::Rows),
    }
}

async fn on_tx<T: DriverTx>(tx: &mut T, compiled: &Compiled, mode: Mode) -> DbResult<Outcome> {
    match mode {
        Mode::Exec => tx.exec(&compiled.sql, &compiled.args).await.map(Outcome::Exec),
        Mode::Query => tx.query(&compiled.sql, &compiled.args).await.map(Outcome::Rows),
    }
}

async fn on_statement<S: DriverStatement>(stmt: &S, args: &[Value], mode: Mode) -> DbResult<Outcome> {
    match mode {
        Mode::Exec => stmt.exec(args).await.map(Outcome::Exec),
        Mode::Query => stmt.query(args).await.map(Outcome::Rows),
    }
}

/// A root session or a transaction session.
///
/// Cloning is cheap and shares all state. A transaction session must not
/// be used from two call sites at once.
pub struct Session<D: Driver> {
    id: u64,
    shared: Arc<Shared<D>>,
    root: Arc<RootState<D::Stmt>>,
    tx: Option<Arc<TxState<D::Tx>>>,
}

impl<D: Driver> Clone for Session<D> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            shared: Arc::clone(&self.shared),
            root: Arc::clone(&self.root),
            tx: self.tx.clone(),
        }
    }
}

impl<D: Driver> std::fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("transaction_id", &self.transaction_id())
            .field("state", &self.state())
            .finish()
    }
}

impl<D: Driver> Session<D> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn transaction_id(&self) -> Option<u64> {
        self.tx.as_ref().map(|tx| tx.id)
    }

    pub fn is_transaction(&self) -> bool {
        self.tx.is_some()
    }

    pub fn state(&self) -> SessionState {
        if self.root.closed.load(Ordering::Acquire) {
            return SessionState::Closed;
        }
        match &self.tx {
            Some(tx) => tx.state(),
            None => SessionState::Open,
        }
    }

    pub fn dialect(&self) -> &Dialect {
        &self.shared.dialect
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.shared.settings
    }

    /// Route non-transactional statements through the prepared-statement
    /// cache. Affects every clone of this session and its transactions.
    pub fn set_prepared_statement_cache(&self, enabled: bool) {
        self.root.cache_enabled.store(enabled, Ordering::Release);
    }

    pub fn prepared_statement_cache_enabled(&self) -> bool {
        self.root.cache_enabled.load(Ordering::Acquire)
    }

    /// Number of statements currently cached.
    pub async fn cached_statements(&self) -> usize {
        self.root.statements.len().await
    }

    /// Driver prepares made through the cache since the session opened.
    pub fn statement_prepares(&self) -> u64 {
        self.root.statements.prepare_count()
    }

    fn ensure_open(&self) -> DbResult<()> {
        if self.root.closed.load(Ordering::Acquire) {
            return Err(DbError::SessionClosed);
        }
        Ok(())
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Run a statement that returns no rows. `?` markers are expanded
    /// against `args` first.
    pub async fn exec(&self, ctx: &Context, sql: &str, args: Vec<Value>) -> DbResult<ExecResult> {
        let compiled = self.shared.dialect.compile_raw(sql, args)?;
        Ok(self.execute(ctx, compiled, Mode::Exec).await?.into_exec())
    }

    pub async fn query(&self, ctx: &Context, sql: &str, args: Vec<Value>) -> DbResult<Vec<Row>> {
        let compiled = self.shared.dialect.compile_raw(sql, args)?;
        Ok(self.execute(ctx, compiled, Mode::Query).await?.into_rows())
    }

    pub async fn query_row(
        &self,
        ctx: &Context,
        sql: &str,
        args: Vec<Value>,
    ) -> DbResult<Option<Row>> {
        Ok(self.query(ctx, sql, args).await?.into_iter().next())
    }

    pub async fn exec_statement(&self, ctx: &Context, stmt: &Statement) -> DbResult<ExecResult> {
        let compiled = self.shared.dialect.compile(stmt)?;
        Ok(self.execute(ctx, compiled, Mode::Exec).await?.into_exec())
    }

    pub async fn query_statement(&self, ctx: &Context, stmt: &Statement) -> DbResult<Vec<Row>> {
        let compiled = self.shared.dialect.compile(stmt)?;
        Ok(self.execute(ctx, compiled, Mode::Query).await?.into_rows())
    }

    async fn execute(&self, ctx: &Context, compiled: Compiled, mode: Mode) -> DbResult<Outcome> {
        self.ensure_open()?;
        let started = Utc::now();
        let result = match &self.tx {
            Some(tx) => self.execute_in_tx(ctx, tx, &compiled, mode).await,
            None if self.prepared_statement_cache_enabled() => {
                self.execute_cached(ctx, &compiled, mode).await
            }
            None => {
                ctx.run(mode.operation(), on_driver(&self.shared.driver, &compiled, mode))
                    .await
            }
        };
        self.record(&compiled, started, &result);
        result
    }

    async fn execute_in_tx(
        &self,
        ctx: &Context,
        tx: &TxState<D::Tx>,
        compiled: &Compiled,
        mode: Mode,
    ) -> DbResult<Outcome> {
        let mut slot = tx.slot.lock().await;
        match &mut *slot {
            TxSlot::Active(handle) => {
                ctx.run(mode.operation(), on_tx(handle, compiled, mode))
                    .await
            }
            _ => Err(tx.unusable(mode.operation())),
        }
    }

    async fn execute_cached(
        &self,
        ctx: &Context,
        compiled: &Compiled,
        mode: Mode,
    ) -> DbResult<Outcome> {
        let driver = &self.shared.driver;
        let cached = ctx
            .run(
                "prepare",
                self.root.statements.get_or_prepare(
                    compiled.fingerprint(),
                    &compiled.sql,
                    || driver.prepare(&compiled.sql),
                ),
            )
            .await?;
        let Some(guard) = cached else {
            return ctx
                .run(mode.operation(), on_driver(driver, compiled, mode))
                .await;
        };

        let result = match self.on_guard(ctx, &guard, &compiled.args, mode).await {
            Err(e) if self.shared.dialect.classifier().classify(&e) == ErrorKind::StatementInvalid => {
                warn!(
                    session_id = self.id,
                    fingerprint = %compiled.fingerprint(),
                    error = %e,
                    "Prepared statement invalidated, re-preparing"
                );
                guard.invalidate().await;
                self.on_guard(ctx, &guard, &compiled.args, mode).await
            }
            other => other,
        };
        guard.release().await;
        result
    }

    async fn on_guard(
        &self,
        ctx: &Context,
        guard: &StmtGuard<D::Stmt>,
        args: &[Value],
        mode: Mode,
    ) -> DbResult<Outcome> {
        let driver = &self.shared.driver;
        let handle = ctx
            .run(
                "prepare",
                guard.handle(|sql| async move { driver.prepare(&sql).await }),
            )
            .await?;
        ctx.run(mode.operation(), on_statement(handle.as_ref(), args, mode))
            .await
    }

    /// Best-effort status log; never fails the caller.
    fn record(&self, compiled: &Compiled, started: DateTime<Utc>, result: &DbResult<Outcome>) {
        let (exec, error) = match result {
            Ok(Outcome::Exec(r)) => (Some(*r), None),
            Ok(Outcome::Rows(_)) => (None, None),
            Err(e) => (None, Some(e.to_string())),
        };
        let status = QueryStatus::new(
            self.id,
            self.transaction_id(),
            compiled.sql.as_str(),
            compiled.args.clone(),
            exec,
            error,
            started,
            Utc::now(),
        );
        log_query_status(&status, self.shared.settings.slow_query_threshold);
    }

    // =========================================================================
    // Prepared statements
    // =========================================================================

    /// Prepare `sql` through the session's statement cache. `?` markers are
    /// left for the arguments given at execution time.
    pub async fn prepare(&self, ctx: &Context, sql: &str) -> DbResult<PreparedStatement<D>> {
        self.ensure_open()?;
        if let Some(tx) = &self.tx {
            return Err(DbError::transaction(
                "prepared statements run outside the transaction; prepare on the root session",
                tx.id,
            ));
        }
        let compiled = self.shared.dialect.compile_raw(sql, Vec::new())?;
        let driver = &self.shared.driver;
        let cached = ctx
            .run(
                "prepare",
                self.root.statements.get_or_prepare(
                    compiled.fingerprint(),
                    &compiled.sql,
                    || driver.prepare(&compiled.sql),
                ),
            )
            .await?;
        let held = match cached {
            Some(guard) => Held::Cached(guard),
            None => Held::Owned(ctx.run("prepare", driver.prepare(&compiled.sql)).await?),
        };
        Ok(PreparedStatement {
            session: self.clone(),
            compiled,
            held: Some(held),
        })
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Start a transaction session. Beginning goes through connection
    /// admission, so a full server is waited out rather than reported.
    pub async fn new_transaction(&self, ctx: &Context) -> DbResult<Session<D>> {
        self.ensure_open()?;
        if let Some(tx) = &self.tx {
            return Err(DbError::transaction(
                "nested transactions are not supported",
                tx.id,
            ));
        }

        let tx = Arc::new(TxState::new(self.shared.ids.next()));
        let driver = &self.shared.driver;
        let handle = self
            .shared
            .gate
            .wait_for_connection(ctx, self.shared.dialect.classifier(), || driver.begin())
            .await?;
        tx.bind(handle).await?;

        info!(
            session_id = self.id,
            transaction_id = tx.id,
            "Transaction started"
        );
        Ok(Session {
            id: self.id,
            shared: Arc::clone(&self.shared),
            root: Arc::clone(&self.root),
            tx: Some(tx),
        })
    }

    fn require_tx(&self, operation: &str) -> DbResult<&Arc<TxState<D::Tx>>> {
        self.tx.as_ref().ok_or_else(|| {
            DbError::invalid_input(format!("cannot {}: session has no transaction", operation))
        })
    }

    /// Commit. The session is finished afterwards whether or not the commit
    /// succeeded. A commit cut short by cancellation or timeout leaves the
    /// state [`SessionState::CommitUnknown`], since the server may have
    /// applied it.
    pub async fn commit(&self, ctx: &Context) -> DbResult<()> {
        let tx = self.require_tx("commit")?;
        let mut slot = tx.slot.lock().await;
        let TxSlot::Active(handle) = &mut *slot else {
            return Err(tx.unusable("commit"));
        };

        let result = ctx.run("commit", handle.commit()).await;
        // Dropping an unfinished driver transaction rolls it back.
        *slot = TxSlot::Finished;
        match &result {
            Ok(()) => {
                tx.set_state(SessionState::Committed);
                info!(session_id = self.id, transaction_id = tx.id, "Transaction committed");
            }
            Err(e) if e.is_cancellation() => {
                tx.set_state(SessionState::CommitUnknown);
                warn!(
                    session_id = self.id,
                    transaction_id = tx.id,
                    error = %e,
                    "Transaction commit interrupted, outcome unknown"
                );
            }
            Err(e) => {
                tx.set_state(SessionState::RolledBack);
                warn!(
                    session_id = self.id,
                    transaction_id = tx.id,
                    error = %e,
                    "Transaction commit failed"
                );
            }
        }
        result
    }

    pub async fn rollback(&self, ctx: &Context) -> DbResult<()> {
        let tx = self.require_tx("rollback")?;
        let mut slot = tx.slot.lock().await;
        let TxSlot::Active(handle) = &mut *slot else {
            return Err(tx.unusable("rollback"));
        };

        let result = ctx.run("rollback", handle.rollback()).await;
        *slot = TxSlot::Finished;
        tx.set_state(SessionState::RolledBack);
        info!(session_id = self.id, transaction_id = tx.id, "Transaction rolled back");
        result
    }

    /// Run `body` in a fresh transaction, committing on success.
    ///
    /// If `body` fails with an error the dialect classifies as an aborted
    /// transaction, the transaction is rolled back and `body` runs again
    /// after a backoff, up to `max_transaction_retries` attempts in total.
    /// Any other error rolls back and is returned as is. A failed commit is
    /// not retried.
    pub async fn run_in_transaction<T, F, Fut>(&self, ctx: &Context, mut body: F) -> DbResult<T>
    where
        F: FnMut(Session<D>) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let settings = &self.shared.settings;
        let max_attempts = settings.transaction_attempts();
        let mut backoff = settings.retry_initial_backoff;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            ctx.check("transaction")?;
            let tx = self.new_transaction(ctx).await?;

            let err = match body(tx.clone()).await {
                Ok(value) => {
                    // The body may have finished the transaction itself.
                    if tx.state() == SessionState::InTransaction {
                        tx.commit(ctx).await?;
                    }
                    if attempt > 1 {
                        info!(session_id = self.id, attempt, "Transaction succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if tx.state() == SessionState::InTransaction {
                // Roll back even if the caller's context is already done.
                if let Err(rb) = tx.rollback(&Context::background()).await {
                    warn!(
                        session_id = self.id,
                        transaction_id = ?tx.transaction_id(),
                        error = %rb,
                        "Rollback after failed transaction body failed"
                    );
                }
            }

            if err.is_cancellation()
                || ctx.is_done()
                || self.shared.dialect.classifier().classify(&err) != ErrorKind::TransactionAborted
            {
                return Err(err);
            }
            if attempt >= max_attempts {
                warn!(
                    session_id = self.id,
                    attempts = attempt,
                    error = %err,
                    "Giving up on transaction"
                );
                return Err(DbError::gave_up("transaction", attempt, err));
            }

            warn!(
                session_id = self.id,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "Transaction aborted, retrying"
            );
            ctx.sleep("transaction backoff", backoff).await?;
            backoff = (backoff * 2).min(settings.retry_max_backoff);
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Clear primary-key, collection and prepared-statement caches.
    ///
    /// Must not be called while a transaction of this session is running.
    pub async fn reset(&self) {
        self.root.primary_keys.write().await.clear();
        self.root.collections.write().await.clear();
        self.root.statements.clear().await;
        info!(session_id = self.id, "Session caches cleared");
    }

    /// Close the session. A transaction session rolls back if still open;
    /// a root session drops its caches and rejects further calls.
    pub async fn close(&self) -> DbResult<()> {
        if let Some(tx) = &self.tx {
            if tx.state() == SessionState::InTransaction {
                return self.rollback(&Context::background()).await;
            }
            return Ok(());
        }
        if self.root.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.root.primary_keys.write().await.clear();
        self.root.collections.write().await.clear();
        self.root.statements.clear().await;
        info!(session_id = self.id, "Session closed");
        Ok(())
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Primary-key columns of `table` in key order. Cached per session.
    pub async fn primary_keys(&self, ctx: &Context, table: &str) -> DbResult<Vec<String>> {
        let cached = self.root.primary_keys.read().await.get(table).cloned();
        if let Some(keys) = cached {
            return Ok(keys);
        }

        let compiled = self.shared.dialect.primary_keys_query(table)?;
        let rows = self.execute(ctx, compiled, Mode::Query).await?.into_rows();
        let keys: Vec<String> = rows
            .iter()
            .filter_map(|row| row.get("name").and_then(|v| v.as_str()).map(String::from))
            .collect();

        debug!(session_id = self.id, table = %table, keys = ?keys, "Primary keys loaded");
        self.root
            .primary_keys
            .write()
            .await
            .insert(table.to_string(), keys.clone());
        Ok(keys)
    }

    /// Metadata for `name`. Cached per session.
    pub async fn collection(&self, ctx: &Context, name: &str) -> DbResult<Collection> {
        let cached = self.root.collections.read().await.get(name).cloned();
        if let Some(collection) = cached {
            return Ok(collection);
        }

        let collection = Collection {
            name: name.to_string(),
            primary_keys: self.primary_keys(ctx, name).await?,
        };
        self.root
            .collections
            .write()
            .await
            .insert(name.to_string(), collection.clone());
        Ok(collection)
    }

    // =========================================================================
    // Table helpers
    // =========================================================================

    pub async fn find(
        &self,
        ctx: &Context,
        table: &str,
        filter: impl Into<Expr>,
    ) -> DbResult<Vec<Row>> {
        let stmt = Statement::select(table).filter(filter);
        self.query_statement(ctx, &stmt).await
    }

    /// Fetch one row by its single-column primary key.
    pub async fn get(
        &self,
        ctx: &Context,
        table: &str,
        id: impl Into<Value>,
    ) -> DbResult<Option<Row>> {
        let collection = self.collection(ctx, table).await?;
        let pk = collection.primary_key().ok_or_else(|| {
            DbError::invalid_input(format!(
                "table '{}' has no single-column primary key",
                table
            ))
        })?;
        let stmt = Statement::select(table)
            .filter(Condition::new(pk, Comparison::eq(id)))
            .limit(1);
        Ok(self.query_statement(ctx, &stmt).await?.into_iter().next())
    }

    pub async fn count(&self, ctx: &Context, table: &str, filter: impl Into<Expr>) -> DbResult<u64> {
        let stmt = Statement::select(table)
            .columns(["COUNT(*) AS count"])
            .filter(filter);
        let rows = self.query_statement(ctx, &stmt).await?;
        rows.first()
            .and_then(|row| row.get("count"))
            .and_then(|v| v.as_u64())
            .ok_or_else(|| DbError::internal(format!("COUNT on '{}' returned no number", table)))
    }

    /// Insert one row. The inserted id comes from the driver, or from
    /// RETURNING on dialects that report no insert id.
    pub async fn insert(
        &self,
        ctx: &Context,
        table: &str,
        values: &impl ToColumns,
    ) -> DbResult<ExecResult> {
        let mut stmt = Statement::insert(table);
        for (column, value) in values.to_columns() {
            stmt = stmt.set(column, value);
        }

        if !self.shared.dialect.template().supports_returning() {
            return self.exec_statement(ctx, &stmt).await;
        }

        let collection = self.collection(ctx, table).await?;
        let Some(pk) = collection.primary_key() else {
            return self.exec_statement(ctx, &stmt).await;
        };
        let rows = self
            .query_statement(ctx, &stmt.returning([pk]))
            .await?;
        let id = rows.first().and_then(|row| row.get(pk)).and_then(|v| v.as_i64());
        Ok(ExecResult::new(rows.len() as u64, id))
    }

    pub async fn update(
        &self,
        ctx: &Context,
        table: &str,
        values: &impl ToColumns,
        filter: impl Into<Expr>,
    ) -> DbResult<ExecResult> {
        let mut stmt = Statement::update(table);
        for (column, value) in values.to_columns() {
            stmt = stmt.set(column, value);
        }
        self.exec_statement(ctx, &stmt.filter(filter)).await
    }

    pub async fn delete(
        &self,
        ctx: &Context,
        table: &str,
        filter: impl Into<Expr>,
    ) -> DbResult<ExecResult> {
        let stmt = Statement::delete(table).filter(filter);
        self.exec_statement(ctx, &stmt).await
    }

    pub async fn truncate(&self, ctx: &Context, table: &str) -> DbResult<ExecResult> {
        self.exec_statement(ctx, &Statement::truncate(table)).await
    }
}

/// A statement held open in the session's cache.
///
/// Call [`PreparedStatement::close`] when done.
pub struct PreparedStatement<D: Driver> {
    session: Session<D>,
    compiled: Compiled,
    held: Option<Held<D::Stmt>>,
}

enum Held<S: DriverStatement> {
    Cached(StmtGuard<S>),
    /// Prepared outside the cache because its fingerprint collided.
    Owned(S),
}

impl<D: Driver> std::fmt::Debug for PreparedStatement<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("session_id", &self.session.id)
            .field("sql", &self.compiled.sql)
            .field("cached", &matches!(self.held, Some(Held::Cached(_))))
            .field("closed", &self.held.is_none())
            .finish()
    }
}

impl<D: Driver> PreparedStatement<D> {
    pub fn sql(&self) -> &str {
        &self.compiled.sql
    }

    pub async fn exec(&self, ctx: &Context, args: Vec<Value>) -> DbResult<ExecResult> {
        Ok(self.run(ctx, args, Mode::Exec).await?.into_exec())
    }

    pub async fn query(&self, ctx: &Context, args: Vec<Value>) -> DbResult<Vec<Row>> {
        Ok(self.run(ctx, args, Mode::Query).await?.into_rows())
    }

    async fn run(&self, ctx: &Context, args: Vec<Value>, mode: Mode) -> DbResult<Outcome> {
        self.session.ensure_open()?;
        let held = self
            .held
            .as_ref()
            .ok_or_else(|| DbError::invalid_input("prepared statement is closed"))?;
        let started = Utc::now();
        let result = match held {
            Held::Cached(guard) => self.session.on_guard(ctx, guard, &args, mode).await,
            Held::Owned(stmt) => {
                ctx.run(mode.operation(), on_statement(stmt, &args, mode))
                    .await
            }
        };
        let status = Compiled::new(self.compiled.sql.clone(), args);
        self.session.record(&status, started, &result);
        result
    }

    /// Release the statement back to the cache.
    pub async fn close(mut self) {
        match self.held.take() {
            Some(Held::Cached(guard)) => guard.release().await,
            Some(Held::Owned(stmt)) => {
                if let Err(e) = stmt.close().await {
                    warn!(session_id = self.session.id, error = %e, "Failed to close statement");
                }
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generator_starts_at_one() {
        let ids = IdGenerator::new();
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
    }

    #[test]
    fn test_state_round_trip() {
        for state in [
            SessionState::Idle,
            SessionState::Open,
            SessionState::InTransaction,
            SessionState::Committed,
            SessionState::RolledBack,
            SessionState::CommitUnknown,
            SessionState::Closed,
        ] {
            assert_eq!(SessionState::from_u8(state as u8), state);
        }
        assert!(SessionState::Committed.is_terminal());
        assert!(SessionState::CommitUnknown.is_terminal());
        assert!(!SessionState::InTransaction.is_terminal());
        assert_eq!(SessionState::RolledBack.to_string(), "rolled back");
    }

    #[test]
    fn test_collection_primary_key() {
        let single = Collection {
            name: "users".into(),
            primary_keys: vec!["id".into()],
        };
        assert_eq!(single.primary_key(), Some("id"));

        let composite = Collection {
            name: "memberships".into(),
            primary_keys: vec!["user_id".into(), "group_id".into()],
        };
        assert_eq!(composite.primary_key(), None);
    }
}
