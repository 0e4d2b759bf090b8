//! Storage engine.
//!
//! Owns the cache, the durable-key registry, the notification bus and the
//! connection to the backing store, and composes them into read-through
//! reads and write-through writes addressed by possibly dotted keys.
//!
//! # Consistency
//!
//! - Writes to volatile keys stay in the cache and never reach the
//!   backing store.
//! - Durable keys are written to the backing store; once the write commits
//!   the cached entry (and every cached dotted key under it) is dropped, so
//!   the next read goes back to the store.
//! - A read the cache cannot answer goes to the backing store whenever one
//!   is configured, whether or not the key is durable.
//! - Evicting a durable entry also drops its key from the durable registry,
//!   so later writes to it stay in the cache.
//! - Without a backing store every key behaves as volatile.
//!
//! `update`, `add`, `remove` and dotted `write`/`clear` are a read followed by
//! a write with a store round trip in between. Two of them racing on the same
//! key can interleave so that one overwrites the other's result. There is no
//! per-key serialization.

use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use larder_core::{is_present, path};
use larder_core::{
    LarderConfig, LarderResult, Notification, StorageError, StoreEvent, StoreKey,
    SubscriptionId, ValidationError, Value,
};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::backing::{BackingStore, Collection, StoreConnection, StoreHandle};
use crate::bus::NotificationBus;
use crate::cache::{Cache, CacheStats};
use crate::registry::PersistenceRegistry;

/// Outcome of consulting the cache for a read.
enum Lookup {
    /// The cache answers the read, possibly with "absent".
    Hit(Option<Value>),
    /// The backing store must be asked.
    Miss,
}

pub struct StorageEngine {
    config: LarderConfig,
    cache: Mutex<Cache>,
    registry: RwLock<PersistenceRegistry>,
    connection: StoreConnection,
    bus: NotificationBus,
}

impl StorageEngine {
    /// Create an engine over an optional backing store.
    ///
    /// `None` means this environment has no durable store at all; every key
    /// then behaves as volatile and no operation fails for lack of a store.
    pub fn new(config: LarderConfig, store: Option<Arc<dyn BackingStore>>) -> LarderResult<Self> {
        config.validate()?;
        Ok(Self {
            cache: Mutex::new(Cache::new(config.cache_capacity)),
            registry: RwLock::new(PersistenceRegistry::new()),
            connection: StoreConnection::new(store, config.schema_version),
            bus: NotificationBus::new(config.event_capacity),
            config,
        })
    }

    /// Create a cache-only engine.
    pub fn volatile(config: LarderConfig) -> LarderResult<Self> {
        Self::new(config, None)
    }

    pub fn config(&self) -> &LarderConfig {
        &self.config
    }

    /// True when a backing store is configured.
    pub fn is_store_available(&self) -> bool {
        self.connection.is_available()
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Register top-level keys whose writes go to the backing store.
    ///
    /// Call before traffic starts; values already cached under these keys
    /// are not written back.
    pub fn mark_durable<I, S>(&self, keys: I) -> LarderResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = self.write_registry()?;
        registry.mark_durable(keys);
        debug!(durable_keys = registry.len(), "Marked keys durable");
        Ok(())
    }

    /// True when `key` (or its top-level key, if dotted) is durable.
    pub fn is_durable(&self, key: &str) -> LarderResult<bool> {
        Ok(self.read_registry()?.is_durable(key))
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Call `callback` for every Put and Delete on `key`.
    ///
    /// Writes are announced under their top-level key, so subscribing to a
    /// dotted key only sees events published for that exact key.
    pub fn subscribe<F>(&self, key: &str, callback: F) -> LarderResult<SubscriptionId>
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let key = StoreKey::parse(key)?;
        Ok(self.bus.subscribe(key.as_str(), callback)?)
    }

    /// Remove a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> LarderResult<bool> {
        Ok(self.bus.unsubscribe(id)?)
    }

    /// Receive every future event, including Init and Read.
    pub fn events(&self) -> broadcast::Receiver<StoreEvent> {
        self.bus.events()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Read a possibly dotted key.
    ///
    /// Answered from the cache when possible; otherwise the top-level record
    /// is fetched from the backing store, resolved along the path, cached
    /// and announced with a Read event. Absent is `Ok(None)`.
    pub async fn read(&self, key: &str) -> LarderResult<Option<Value>> {
        let key = StoreKey::parse(key)?;
        if let Lookup::Hit(value) = self.lookup_cached(&key)? {
            debug!(key = %key, found = value.is_some(), "Cache hit");
            return Ok(value);
        }

        let StoreHandle::Available(collection) = self.open_store().await? else {
            return Ok(None);
        };
        debug!(key = %key, "Cache miss, reading through");
        let record = collection.get(key.top_level()).await.map_err(|e| {
            warn!(key = %key, error = %e, "Backing store read failed");
            e
        })?;

        let value = match record {
            Some(record) if key.is_dotted() => path::resolve(&record, &key.segments()).cloned(),
            other => other,
        };
        if let Some(found) = value.as_ref().filter(|v| is_present(Some(*v))) {
            self.cache_store(key.as_str(), found.clone())?;
        }

        self.bus.publish(StoreEvent::Read {
            key: key.as_str().to_string(),
            value: value.clone(),
        });
        Ok(value)
    }

    /// Write a possibly dotted key.
    ///
    /// A dotted key reads the current top-level record, sets the nested
    /// value and writes the whole record back under the top-level key.
    pub async fn write(&self, key: &str, value: Value) -> LarderResult<()> {
        let key = StoreKey::parse(key)?;
        let record = if key.is_dotted() {
            let current = self.read(key.top_level()).await?;
            path::assign(current, &key.segments(), value)?
        } else {
            value
        };
        self.write_record(key.top_level(), record).await
    }

    /// Delete a key.
    ///
    /// For a dotted key the nested property is detached and the top-level
    /// record written back; a path that does not exist is a no-op.
    pub async fn clear(&self, key: &str) -> LarderResult<()> {
        let key = StoreKey::parse(key)?;
        if key.is_dotted() {
            let Some(mut record) = self.read(key.top_level()).await? else {
                return Ok(());
            };
            if path::detach(&mut record, &key.segments()).is_none() {
                debug!(key = %key, "Nothing to clear");
                return Ok(());
            }
            return self.write_record(key.top_level(), record).await;
        }

        let top_level = key.top_level();
        match self.durable_collection(top_level).await? {
            Some(collection) => {
                collection.delete(top_level).await.map_err(|e| {
                    warn!(key = top_level, error = %e, "Backing store delete failed");
                    e
                })?;
                self.replace_cached(top_level, None)?;
                debug!(key = top_level, "Durable delete committed");
            }
            None => {
                self.replace_cached(top_level, None)?;
                debug!(key = top_level, "Cleared volatile key");
            }
        }

        self.bus.publish(StoreEvent::Delete {
            key: top_level.to_string(),
        });
        Ok(())
    }

    /// Read the current value, transform it and write the result back.
    ///
    /// Not atomic: a concurrent writer to the same key may be overwritten.
    pub async fn update<F>(&self, key: &str, transform: F) -> LarderResult<()>
    where
        F: FnOnce(Option<Value>) -> Value,
    {
        let current = self.read(key).await?;
        self.write(key, transform(current)).await
    }

    /// Append `item` to the sequence under `key`, starting a new one if the
    /// key is absent.
    pub async fn add(&self, key: &str, item: Value) -> LarderResult<()> {
        let mut items = match self.read(key).await? {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items,
            Some(other) => return Err(not_a_sequence(key, &other).into()),
        };
        items.push(item);
        self.write(key, Value::Array(items)).await
    }

    /// Drop every element of the sequence under `key` that matches
    /// `predicate`. An absent key is left absent.
    pub async fn remove<P>(&self, key: &str, predicate: P) -> LarderResult<()>
    where
        P: Fn(&Value) -> bool,
    {
        let mut items = match self.read(key).await? {
            None | Some(Value::Null) => return Ok(()),
            Some(Value::Array(items)) => items,
            Some(other) => return Err(not_a_sequence(key, &other).into()),
        };
        items.retain(|item| !predicate(item));
        self.write(key, Value::Array(items)).await
    }

    // =========================================================================
    // Cache management
    // =========================================================================

    pub fn cache_stats(&self) -> LarderResult<CacheStats> {
        Ok(self.lock_cache()?.stats())
    }

    /// Cached keys, oldest first.
    pub fn cached_keys(&self) -> LarderResult<Vec<String>> {
        Ok(self.lock_cache()?.keys().to_vec())
    }

    /// Drop one cached entry. The backing store is not touched.
    pub fn invalidate(&self, key: &str) -> LarderResult<()> {
        self.lock_cache()?.invalidate(key);
        Ok(())
    }

    /// Drop every cached entry, volatile values included.
    pub fn invalidate_all(&self) -> LarderResult<()> {
        self.lock_cache()?.clear();
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn lock_cache(&self) -> Result<MutexGuard<'_, Cache>, StorageError> {
        self.cache.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn read_registry(&self) -> Result<RwLockReadGuard<'_, PersistenceRegistry>, StorageError> {
        self.registry.read().map_err(|_| StorageError::LockPoisoned)
    }

    fn write_registry(&self) -> Result<RwLockWriteGuard<'_, PersistenceRegistry>, StorageError> {
        self.registry.write().map_err(|_| StorageError::LockPoisoned)
    }

    /// Decide whether the cache can answer a read.
    ///
    /// A cached `Null` does not count while a store is configured. A dotted
    /// key can also be answered from its cached top-level record. Anything
    /// else is a miss when a store exists and absent when it does not.
    fn lookup_cached(&self, key: &StoreKey) -> LarderResult<Lookup> {
        let store_available = self.connection.is_available();
        let mut cache = self.lock_cache()?;

        if let Some(value) = cache.get(key.as_str()) {
            if !store_available || is_present(Some(value)) {
                return Ok(Lookup::Hit(Some(value.clone())));
            }
        }
        if key.is_dotted() {
            if let Some(record) = cache.peek(key.top_level()).filter(|r| is_present(Some(*r))) {
                return Ok(Lookup::Hit(
                    path::resolve(record, &key.segments()).cloned(),
                ));
            }
        }

        if store_available {
            Ok(Lookup::Miss)
        } else {
            Ok(Lookup::Hit(None))
        }
    }

    /// Insert into the cache, evicting a durable entry if over capacity.
    ///
    /// The evicted key's top-level key is dropped from the durable registry.
    fn cache_store(&self, key: &str, value: Value) -> LarderResult<()> {
        let store_available = self.connection.is_available();
        let mut registry = self.write_registry()?;
        let mut cache = self.lock_cache()?;
        if let Some(evicted) = cache.put(key, value, store_available, |k| registry.is_durable(k)) {
            let unmarked = registry.unmark(&evicted);
            debug!(key, evicted = %evicted, unmarked, "Evicted durable cache entry");
        }
        Ok(())
    }

    /// Drop a top-level record and its cached dotted keys, then cache
    /// `record` in its place if given.
    fn replace_cached(&self, top_level: &str, record: Option<Value>) -> LarderResult<()> {
        let dropped = self.lock_cache()?.invalidate_tree(top_level);
        if dropped > 0 {
            debug!(key = top_level, dropped, "Invalidated cached record");
        }
        match record {
            Some(record) => self.cache_store(top_level, record),
            None => Ok(()),
        }
    }

    async fn write_record(&self, top_level: &str, record: Value) -> LarderResult<()> {
        match self.durable_collection(top_level).await? {
            Some(collection) => {
                collection.put(top_level, &record).await.map_err(|e| {
                    warn!(key = top_level, error = %e, "Backing store write failed");
                    e
                })?;
                self.replace_cached(top_level, None)?;
                debug!(key = top_level, "Durable write committed");
            }
            None => {
                self.replace_cached(top_level, Some(record.clone()))?;
                debug!(key = top_level, "Cached volatile write");
            }
        }

        self.bus.publish(StoreEvent::Put {
            key: top_level.to_string(),
            value: record,
        });
        Ok(())
    }

    /// The open collection if `top_level` should be written durably.
    async fn durable_collection(&self, top_level: &str) -> LarderResult<Option<Arc<dyn Collection>>> {
        if !self.connection.is_available() || !self.is_durable(top_level)? {
            return Ok(None);
        }
        match self.open_store().await? {
            StoreHandle::Available(collection) => Ok(Some(collection)),
            StoreHandle::Unavailable => Ok(None),
        }
    }

    /// Open the backing store, announcing Init on the first connect.
    async fn open_store(&self) -> LarderResult<StoreHandle> {
        let (handle, first) = self.connection.open().await?;
        if first {
            self.bus.publish(StoreEvent::Init);
        }
        Ok(handle)
    }
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("config", &self.config)
            .field("connection", &self.connection)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

fn not_a_sequence(key: &str, found: &Value) -> ValidationError {
    ValidationError::NotASequence {
        key: key.to_string(),
        found: path::kind_name(found).to_string(),
    }
}
