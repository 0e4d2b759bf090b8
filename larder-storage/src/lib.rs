//! larder storage - cache, backing stores and the storage engine
//!
//! Puts a bounded in-memory cache in front of a slow, possibly absent durable
//! store. Keys registered as durable are written through to the store;
//! everything else lives only in the cache.

pub mod backing;
pub mod bus;
pub mod cache;
pub mod engine;
pub mod registry;
pub mod telemetry;

pub use backing::{
    BackingStore, Collection, InMemoryBackingStore, LmdbBackingStore, LmdbStoreError,
    StoreConnection, StoreHandle, StoreOp, StoreOpCounts,
};
pub use bus::{Callback, NotificationBus};
pub use cache::{Cache, CacheStats};
pub use engine::StorageEngine;
pub use registry::PersistenceRegistry;
pub use telemetry::{init_tracing, TelemetryConfig, TelemetryError};
