//! In-memory backing store.
//!
//! Behaves like a durable store for the lifetime of the value (clones share
//! state), counts every operation, and can be told to fail or to be slow.
//! Useful for tests and for running the engine without a data directory.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use larder_core::{LarderResult, StorageError, Value};

use super::{transaction_failed, BackingStore, Collection};

/// Operation kinds, for counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Connect,
    Get,
    Put,
    Delete,
}

/// Number of operations issued against the store, failed ones included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreOpCounts {
    pub connects: u64,
    pub gets: u64,
    pub puts: u64,
    pub deletes: u64,
}

impl StoreOpCounts {
    /// Record-level operations, excluding connects.
    pub fn data_ops(&self) -> u64 {
        self.gets + self.puts + self.deletes
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    records: HashMap<String, Value>,
    schema_version: Option<u32>,
    counts: StoreOpCounts,
    failing: HashSet<StoreOp>,
    latency: Option<Duration>,
}

/// In-memory store; clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackingStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryBackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every record operation by `latency` before it takes effect.
    pub fn with_latency(self, latency: Duration) -> Self {
        if let Ok(mut state) = self.state.write() {
            state.latency = Some(latency);
        }
        self
    }

    /// Make every subsequent `op` fail with a transaction error.
    pub fn fail(&self, op: StoreOp) {
        if let Ok(mut state) = self.state.write() {
            state.failing.insert(op);
        }
    }

    /// Stop failing `op`.
    pub fn recover(&self, op: StoreOp) {
        if let Ok(mut state) = self.state.write() {
            state.failing.remove(&op);
        }
    }

    /// Seed a record without counting an operation.
    pub fn insert_record(&self, key: impl Into<String>, value: Value) {
        if let Ok(mut state) = self.state.write() {
            state.records.insert(key.into(), value);
        }
    }

    /// Peek at a record without counting an operation.
    pub fn record(&self, key: &str) -> Option<Value> {
        self.state
            .read()
            .ok()
            .and_then(|state| state.records.get(key).cloned())
    }

    pub fn record_count(&self) -> usize {
        self.state.read().map(|s| s.records.len()).unwrap_or(0)
    }

    pub fn op_counts(&self) -> StoreOpCounts {
        self.state
            .read()
            .map(|s| s.counts.clone())
            .unwrap_or_default()
    }

    /// Layout version stamped by the last connect.
    pub fn schema_version(&self) -> Option<u32> {
        self.state.read().ok().and_then(|s| s.schema_version)
    }

    /// Count `op`, check for injected failure, and return the latency to apply.
    fn begin(&self, op: StoreOp) -> Result<Option<Duration>, StorageError> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        match op {
            StoreOp::Connect => state.counts.connects += 1,
            StoreOp::Get => state.counts.gets += 1,
            StoreOp::Put => state.counts.puts += 1,
            StoreOp::Delete => state.counts.deletes += 1,
        }
        if state.failing.contains(&op) {
            return Err(transaction_failed(format!("injected {op:?} failure")));
        }
        Ok(state.latency)
    }

    async fn delay(latency: Option<Duration>) {
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl BackingStore for InMemoryBackingStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self, schema_version: u32) -> LarderResult<Arc<dyn Collection>> {
        self.begin(StoreOp::Connect).map_err(|e| StorageError::ConnectFailed {
            store: self.name().to_string(),
            reason: e.to_string(),
        })?;
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        if state.schema_version != Some(schema_version) {
            // Upgrade hook: recreate the collection under the new layout.
            if state.schema_version.is_some() {
                state.records.clear();
            }
            state.schema_version = Some(schema_version);
        }
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl Collection for InMemoryBackingStore {
    async fn get(&self, key: &str) -> LarderResult<Option<Value>> {
        let latency = self.begin(StoreOp::Get)?;
        Self::delay(latency).await;
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(state.records.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &Value) -> LarderResult<()> {
        let latency = self.begin(StoreOp::Put)?;
        Self::delay(latency).await;
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        state.records.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> LarderResult<()> {
        let latency = self.begin(StoreOp::Delete)?;
        Self::delay(latency).await;
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        state.records.remove(key);
        Ok(())
    }
}
