//! Durable backing stores.
//!
//! A [`BackingStore`] knows how to connect to one durable collection; the
//! [`Collection`] it hands back performs the actual reads and writes. The
//! engine never talks to a store directly: it goes through a
//! [`StoreConnection`], which connects lazily, reuses the connection, and
//! reports an explicit [`StoreHandle::Unavailable`] when no durable store
//! exists in this environment.

pub mod lmdb;
pub mod memory;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use larder_core::{LarderError, LarderResult, StorageError, Value};
use tokio::sync::OnceCell;
use tracing::{info, warn};

pub use lmdb::{LmdbBackingStore, LmdbStoreError};
pub use memory::{InMemoryBackingStore, StoreOp, StoreOpCounts};

/// One durable collection of records keyed by top-level key.
#[async_trait]
pub trait Collection: Send + Sync {
    /// Fetch a record.
    async fn get(&self, key: &str) -> LarderResult<Option<Value>>;

    /// Store a record. Resolves only once the write has committed.
    async fn put(&self, key: &str, value: &Value) -> LarderResult<()>;

    /// Remove a record. Resolves only once the delete has committed.
    async fn delete(&self, key: &str) -> LarderResult<()>;
}

/// Connector for a durable store.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Store name for logs and errors.
    fn name(&self) -> &str;

    /// Establish the connection.
    ///
    /// Creates the collection on first use. When the stored layout version
    /// differs from `schema_version` the collection is recreated.
    async fn connect(&self, schema_version: u32) -> LarderResult<Arc<dyn Collection>>;
}

/// Result of opening the durable store.
#[derive(Clone)]
pub enum StoreHandle {
    Available(Arc<dyn Collection>),
    /// No durable store exists; callers operate cache-only.
    Unavailable,
}

impl StoreHandle {
    pub fn is_available(&self) -> bool {
        matches!(self, StoreHandle::Available(_))
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreHandle::Available(_) => f.write_str("StoreHandle::Available"),
            StoreHandle::Unavailable => f.write_str("StoreHandle::Unavailable"),
        }
    }
}

/// Lazily opened connection to an optional backing store.
pub struct StoreConnection {
    store: Option<Arc<dyn BackingStore>>,
    schema_version: u32,
    collection: OnceCell<Arc<dyn Collection>>,
    announced: AtomicBool,
}

impl StoreConnection {
    pub fn new(store: Option<Arc<dyn BackingStore>>, schema_version: u32) -> Self {
        Self {
            store,
            schema_version,
            collection: OnceCell::new(),
            announced: AtomicBool::new(false),
        }
    }

    /// A connection for an environment without any durable store.
    pub fn unavailable() -> Self {
        Self::new(None, 0)
    }

    /// True when this environment has a durable store at all.
    ///
    /// Says nothing about whether connecting will succeed.
    pub fn is_available(&self) -> bool {
        self.store.is_some()
    }

    /// True once a connection has been established.
    pub fn is_connected(&self) -> bool {
        self.collection.initialized()
    }

    /// Open the store, connecting on first use.
    ///
    /// Returns the open handle and whether this is the first call to see the
    /// store connected (the engine announces readiness once). A
    /// failed connect is reported to the caller and retried by the next
    /// call; nothing retries within one call.
    pub async fn open(&self) -> LarderResult<(StoreHandle, bool)> {
        let Some(store) = &self.store else {
            return Ok((StoreHandle::Unavailable, false));
        };
        if let Some(collection) = self.collection.get() {
            return Ok((StoreHandle::Available(Arc::clone(collection)), false));
        }

        let schema_version = self.schema_version;
        let collection = self
            .collection
            .get_or_try_init(|| async move {
                let collection = store.connect(schema_version).await.map_err(|e| {
                    warn!(store = store.name(), error = %e, "Backing store connect failed");
                    e
                })?;
                info!(store = store.name(), schema_version, "Backing store connected");
                Ok::<_, LarderError>(collection)
            })
            .await?;
        let first = !self.announced.swap(true, Ordering::SeqCst);
        Ok((StoreHandle::Available(Arc::clone(collection)), first))
    }
}

impl std::fmt::Debug for StoreConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConnection")
            .field("store", &self.store.as_ref().map(|s| s.name().to_string()))
            .field("schema_version", &self.schema_version)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Map any displayable backend error into a transaction failure.
pub(crate) fn transaction_failed(reason: impl std::fmt::Display) -> StorageError {
    StorageError::TransactionFailed {
        reason: reason.to_string(),
    }
}
