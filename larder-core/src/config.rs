//! Engine configuration.
//!
//! Loaded from environment variables with defaults suitable for development.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default number of cache entries before durable entries start to be evicted.
pub const DEFAULT_CACHE_CAPACITY: usize = 5;

/// Current on-disk layout version. Bump only on breaking layout changes.
pub const DEFAULT_SCHEMA_VERSION: u32 = 1;

/// Default name of the single durable collection.
pub const DEFAULT_COLLECTION: &str = "larder";

/// Configuration for a storage engine and its backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LarderConfig {
    /// Cache entry count above which eviction runs.
    pub cache_capacity: usize,
    /// Layout version of the durable collection.
    pub schema_version: u32,
    /// Name of the durable collection.
    pub collection: String,
    /// Directory for the LMDB environment. `None` means no durable store.
    pub data_dir: Option<PathBuf>,
    /// Maximum size of the LMDB map in megabytes.
    pub map_size_mb: usize,
    /// Buffer size of the broadcast event feed.
    pub event_capacity: usize,
}

impl Default for LarderConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            schema_version: DEFAULT_SCHEMA_VERSION,
            collection: DEFAULT_COLLECTION.to_string(),
            data_dir: None,
            map_size_mb: 64,
            event_capacity: 256,
        }
    }
}

impl LarderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config from environment variables.
    ///
    /// Environment variables:
    /// - `LARDER_CACHE_CAPACITY`: cache capacity (default: 5)
    /// - `LARDER_SCHEMA_VERSION`: layout version (default: 1)
    /// - `LARDER_COLLECTION`: collection name (default: "larder")
    /// - `LARDER_DATA_DIR`: LMDB directory (default: unset, cache-only)
    /// - `LARDER_MAP_SIZE_MB`: LMDB map size (default: 64)
    /// - `LARDER_EVENT_CAPACITY`: event feed buffer (default: 256)
    ///
    /// Unparseable numbers fall back to their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cache_capacity = std::env::var("LARDER_CACHE_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.cache_capacity);

        let schema_version = std::env::var("LARDER_SCHEMA_VERSION")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.schema_version);

        let collection = std::env::var("LARDER_COLLECTION")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.collection);

        let data_dir = std::env::var("LARDER_DATA_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let map_size_mb = std::env::var("LARDER_MAP_SIZE_MB")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.map_size_mb);

        let event_capacity = std::env::var("LARDER_EVENT_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.event_capacity);

        Self {
            cache_capacity,
            schema_version,
            collection,
            data_dir,
            map_size_mb,
            event_capacity,
        }
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn with_map_size_mb(mut self, mb: usize) -> Self {
        self.map_size_mb = mb;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_capacity == 0 {
            return Err(invalid("cache_capacity", "0", "must be at least 1"));
        }
        if self.schema_version == 0 {
            return Err(invalid("schema_version", "0", "must be at least 1"));
        }
        if self.collection.trim().is_empty() {
            return Err(invalid("collection", &self.collection, "must not be empty"));
        }
        if self.map_size_mb == 0 {
            return Err(invalid("map_size_mb", "0", "must be at least 1"));
        }
        if self.event_capacity == 0 {
            return Err(invalid("event_capacity", "0", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
