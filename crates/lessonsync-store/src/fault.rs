//! Fault-injecting store wrapper.
//!
//! Wraps any [`DocumentStore`] and makes selected operations fail or stall
//! on demand, so the tolerate-and-self-heal paths (missed heartbeats,
//! stalled push channels, failed reads while polling) can be driven
//! deterministically.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use lessonsync_core::error::AppError;
use lessonsync_core::result::AppResult;
use lessonsync_core::traits::store::{
    Document, DocumentChange, DocumentStore, DocumentWatch, WatchFilter,
};

/// Which faults are currently switched on.
#[derive(Debug, Default)]
struct Faults {
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_watch: AtomicBool,
    stall_watch: AtomicBool,
}

/// Store wrapper with switchable faults and call counters.
#[derive(Debug, Clone)]
pub struct FaultInjectingStore {
    inner: Arc<dyn DocumentStore>,
    faults: Arc<Faults>,
    reads: Arc<AtomicU64>,
    writes: Arc<AtomicU64>,
    /// Never sends; watches handed out while stalled hang on this.
    silent: broadcast::Sender<DocumentChange>,
}

impl FaultInjectingStore {
    /// Wrap a store with every fault switched off.
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        let (silent, _) = broadcast::channel(1);
        Self {
            inner,
            faults: Arc::new(Faults::default()),
            reads: Arc::new(AtomicU64::new(0)),
            writes: Arc::new(AtomicU64::new(0)),
            silent,
        }
    }

    /// Make `get` and `list` fail.
    pub fn fail_reads(&self, on: bool) {
        self.faults.fail_reads.store(on, Ordering::SeqCst);
    }

    /// Make every write fail.
    pub fn fail_writes(&self, on: bool) {
        self.faults.fail_writes.store(on, Ordering::SeqCst);
    }

    /// Make `watch` return an error.
    pub fn fail_watch(&self, on: bool) {
        self.faults.fail_watch.store(on, Ordering::SeqCst);
    }

    /// Make `watch` succeed but never deliver anything.
    pub fn stall_watch(&self, on: bool) {
        self.faults.stall_watch.store(on, Ordering::SeqCst);
    }

    /// Number of read calls seen (including failed ones).
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of write calls seen (including failed ones).
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn before_read(&self) -> AppResult<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.faults.fail_reads.load(Ordering::SeqCst) {
            return Err(AppError::store("injected read failure"));
        }
        Ok(())
    }

    fn before_write(&self) -> AppResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.faults.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::store("injected write failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FaultInjectingStore {
    async fn get(&self, key: &str) -> AppResult<Option<Document>> {
        self.before_read()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, data: Value) -> AppResult<u64> {
        self.before_write()?;
        self.inner.set(key, data).await
    }

    async fn merge(&self, key: &str, patch: Map<String, Value>) -> AppResult<u64> {
        self.before_write()?;
        self.inner.merge(key, patch).await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        data: Value,
        expected_revision: Option<u64>,
    ) -> AppResult<bool> {
        self.before_write()?;
        self.inner.compare_and_set(key, data, expected_revision).await
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.before_write()?;
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> AppResult<Vec<Document>> {
        self.before_read()?;
        self.inner.list(prefix).await
    }

    async fn watch(&self, filter: WatchFilter) -> AppResult<DocumentWatch> {
        if self.faults.fail_watch.load(Ordering::SeqCst) {
            return Err(AppError::store("injected watch failure"));
        }
        if self.faults.stall_watch.load(Ordering::SeqCst) {
            return Ok(DocumentWatch::new(self.silent.subscribe(), filter));
        }
        self.inner.watch(filter).await
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(!self.faults.fail_reads.load(Ordering::SeqCst) && self.inner.health_check().await?)
    }
}
