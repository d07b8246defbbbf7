//! Reference-counted prepared-statement cache.
//!
//! # Design Decisions
//!
//! - **`OnceCell` per fingerprint**: concurrent callers asking for the same
//!   query wait on a single prepare instead of racing several into the cache
//! - **Reference count per entry**: the cache holds one reference and every
//!   [`StmtGuard`] another. An evicted entry is closed by whoever drops the
//!   last reference, so a statement is never closed under a running query
//! - **Lock scoped to the map**: the `RwLock` covers lookups and inserts
//!   only; it is never held across a prepare, exec or close
//! - **Reopen**: an entry whose handle was invalidated re-prepares on next use

use crate::db::driver::DriverStatement;
use crate::error::{DbError, DbResult};
use crate::sql::Fingerprint;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, warn};

/// One cached statement.
pub struct CacheEntry<S> {
    fingerprint: Fingerprint,
    sql: String,
    /// `None` after invalidation until the next use re-prepares.
    handle: Mutex<Option<Arc<S>>>,
    refs: AtomicUsize,
    evicted: AtomicBool,
}

impl<S: DriverStatement> CacheEntry<S> {
    fn new(fingerprint: Fingerprint, sql: String, handle: S) -> Self {
        Self {
            fingerprint,
            sql,
            handle: Mutex::new(Some(Arc::new(handle))),
            // The cache's own reference.
            refs: AtomicUsize::new(1),
            evicted: AtomicBool::new(false),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Query text, kept for diagnostics.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn is_open(&self) -> bool {
        !self.evicted.load(Ordering::Acquire)
    }

    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    fn acquire(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one reference. Returns true if this was the last one.
    /// Saturates at 0 to prevent underflow from extra release calls.
    fn release(&self) -> bool {
        let result = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(1))
            });
        match result {
            Ok(0) => {
                warn!(
                    fingerprint = %self.fingerprint,
                    "Statement reference underflow detected - extra release call"
                );
                false
            }
            Ok(prev) => prev == 1,
            Err(_) => false,
        }
    }

    /// Close the driver handle if the entry is evicted and unreferenced.
    async fn close_if_unused(&self) {
        if self.evicted.load(Ordering::Acquire) && self.ref_count() == 0 {
            self.close_handle().await;
        }
    }

    async fn close_handle(&self) {
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            debug!(fingerprint = %self.fingerprint, "Closing prepared statement");
            if let Err(e) = handle.close().await {
                warn!(fingerprint = %self.fingerprint, error = %e, "Failed to close prepared statement");
            }
        }
    }

    /// Mark the entry evicted and drop the cache's reference.
    async fn evict(&self) {
        if self.evicted.swap(true, Ordering::AcqRel) {
            return;
        }
        self.release();
        self.close_if_unused().await;
    }
}

impl<S> std::fmt::Debug for CacheEntry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("fingerprint", &self.fingerprint)
            .field("sql", &self.sql)
            .field("refs", &self.refs.load(Ordering::Relaxed))
            .field("evicted", &self.evicted.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

type Slot<S> = Arc<OnceCell<Arc<CacheEntry<S>>>>;

/// Prepared statements keyed by the fingerprint of their SQL text.
pub struct StatementCache<S> {
    entries: RwLock<HashMap<Fingerprint, Slot<S>>>,
    prepares: AtomicU64,
}

impl<S: DriverStatement> Default for StatementCache<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: DriverStatement> StatementCache<S> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            prepares: AtomicU64::new(0),
        }
    }

    /// Look up an open statement without preparing.
    pub async fn get(&self, fingerprint: Fingerprint) -> Option<StmtGuard<S>> {
        let entries = self.entries.read().await;
        let entry = entries.get(&fingerprint)?.get()?;
        if !entry.is_open() {
            return None;
        }
        entry.acquire();
        Some(StmtGuard::new(Arc::clone(entry)))
    }

    /// Insert an already prepared statement. A previous entry for the same
    /// fingerprint is evicted.
    pub async fn put(&self, fingerprint: Fingerprint, handle: S) {
        let entry = Arc::new(CacheEntry::new(
            fingerprint,
            handle.sql().to_string(),
            handle,
        ));
        let slot = Arc::new(OnceCell::new_with(Some(entry)));
        let replaced = {
            let mut entries = self.entries.write().await;
            entries.insert(fingerprint, slot)
        };
        if let Some(old) = replaced.and_then(|cell| cell.get().cloned()) {
            old.evict().await;
        }
    }

    /// Return the cached statement for `fingerprint`, preparing it with
    /// `prepare` on first use. Concurrent callers share one prepare.
    ///
    /// Returns `None` when the entry under `fingerprint` was prepared from
    /// text other than `sql`; the caller must then run uncached.
    pub async fn get_or_prepare<F, Fut>(
        &self,
        fingerprint: Fingerprint,
        sql: &str,
        mut prepare: F,
    ) -> DbResult<Option<StmtGuard<S>>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DbResult<S>>,
    {
        loop {
            let slot = {
                let entries = self.entries.read().await;
                if let Some(slot) = entries.get(&fingerprint) {
                    Arc::clone(slot)
                } else {
                    drop(entries);
                    let mut entries = self.entries.write().await;
                    // Slots left empty by a cancelled prepare have no other
                    // holder; drop them while the write lock is held anyway.
                    entries.retain(|_, s| s.initialized() || Arc::strong_count(s) > 1);
                    // Double-check after acquiring write lock
                    Arc::clone(
                        entries
                            .entry(fingerprint)
                            .or_insert_with(|| Arc::new(OnceCell::new())),
                    )
                }
            };

            let init = slot
                .get_or_try_init(|| async {
                    let handle = prepare().await?;
                    self.prepares.fetch_add(1, Ordering::Relaxed);
                    debug!(fingerprint = %fingerprint, "Prepared statement cached");
                    Ok::<_, DbError>(Arc::new(CacheEntry::new(
                        fingerprint,
                        handle.sql().to_string(),
                        handle,
                    )))
                })
                .await;
            let entry = match init {
                Ok(entry) => entry,
                Err(e) => {
                    self.discard_empty(fingerprint, &slot).await;
                    return Err(e);
                }
            };

            // Take the reference under the map lock so a concurrent clear
            // cannot close the entry in between.
            let entries = self.entries.read().await;
            if entries.get(&fingerprint).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
                if entry.sql() != sql {
                    warn!(
                        fingerprint = %fingerprint,
                        "Fingerprint collision between different statements, bypassing cache"
                    );
                    return Ok(None);
                }
                entry.acquire();
                return Ok(Some(StmtGuard::new(Arc::clone(entry))));
            }
            // Purged while we were waiting; start over with a fresh slot.
        }
    }

    /// Remove `slot` if it is still the uninitialised slot for `fingerprint`.
    async fn discard_empty(&self, fingerprint: Fingerprint, slot: &Slot<S>) {
        let mut entries = self.entries.write().await;
        if entries
            .get(&fingerprint)
            .is_some_and(|s| Arc::ptr_eq(s, slot) && !s.initialized())
        {
            entries.remove(&fingerprint);
        }
    }

    /// Evict one statement. Returns true if it was cached.
    pub async fn purge(&self, fingerprint: Fingerprint) -> bool {
        let removed = {
            let mut entries = self.entries.write().await;
            entries.remove(&fingerprint)
        };
        match removed.and_then(|cell| cell.get().cloned()) {
            Some(entry) => {
                entry.evict().await;
                true
            }
            None => false,
        }
    }

    /// Evict every statement. The cache is empty to other callers before
    /// any handle is closed; statements still in use close on release.
    pub async fn clear(&self) {
        // Drain under lock, close outside lock
        let drained: Vec<_> = {
            let mut entries = self.entries.write().await;
            entries.drain().collect()
        };

        for (_, cell) in drained {
            if let Some(entry) = cell.get() {
                entry.evict().await;
            }
        }
    }

    /// Number of prepared entries (initialised slots only).
    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.values().filter(|cell| cell.get().is_some()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Total number of successful prepares made through this cache.
    pub fn prepare_count(&self) -> u64 {
        self.prepares.load(Ordering::Relaxed)
    }
}

impl<S> std::fmt::Debug for StatementCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementCache")
            .field("prepares", &self.prepares.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// A borrowed cached statement.
///
/// Holds one reference on the entry. Call [`StmtGuard::release`] when done;
/// dropping the guard instead spawns a task to release it.
pub struct StmtGuard<S: DriverStatement> {
    entry: Arc<CacheEntry<S>>,
    released: bool,
}

impl<S: DriverStatement> StmtGuard<S> {
    fn new(entry: Arc<CacheEntry<S>>) -> Self {
        Self {
            entry,
            released: false,
        }
    }

    pub fn entry(&self) -> &CacheEntry<S> {
        &self.entry
    }

    /// Live driver handle, re-preparing with `reopen` if it was invalidated.
    pub async fn handle<F, Fut>(&self, reopen: F) -> DbResult<Arc<S>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = DbResult<S>>,
    {
        let mut handle = self.entry.handle.lock().await;
        if let Some(h) = handle.as_ref() {
            return Ok(Arc::clone(h));
        }
        if !self.entry.is_open() {
            return Err(DbError::internal(format!(
                "prepared statement {} was closed",
                self.entry.fingerprint
            )));
        }
        debug!(fingerprint = %self.entry.fingerprint, "Re-preparing invalidated statement");
        let fresh = Arc::new(reopen(self.entry.sql.clone()).await?);
        *handle = Some(Arc::clone(&fresh));
        Ok(fresh)
    }

    /// Drop the driver handle so the next use re-prepares.
    pub async fn invalidate(&self) {
        self.entry.close_handle().await;
    }

    /// Explicitly release the statement (preferred over relying on Drop).
    pub async fn release(mut self) {
        self.released = true;
        if self.entry.release() {
            self.entry.close_if_unused().await;
        }
    }
}

impl<S: DriverStatement> std::fmt::Debug for StmtGuard<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StmtGuard")
            .field("entry", &self.entry)
            .field("released", &self.released)
            .finish()
    }
}

impl<S: DriverStatement> Drop for StmtGuard<S> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        warn!(
            fingerprint = %self.entry.fingerprint,
            "Statement released via Drop - consider using explicit release()"
        );
        let entry = Arc::clone(&self.entry);
        if !entry.release() {
            return;
        }
        // Last reference on an evicted entry; closing needs the runtime.
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            rt.spawn(async move {
                entry.close_if_unused().await;
            });
        }
    }
}
