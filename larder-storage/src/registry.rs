//! Registry of durable keys.
//!
//! A key not in the registry is volatile: it lives only in the cache, even
//! when a backing store is available. Durability is decided by the top-level
//! key, so `"user.profile"` is durable exactly when `"user"` is.
//!
//! The engine unmarks a key when its cache entry is evicted.

use std::collections::HashSet;

use larder_core::PATH_SEPARATOR;

#[derive(Debug, Clone, Default)]
pub struct PersistenceRegistry {
    keys: HashSet<String>,
}

impl PersistenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark keys as durable. Marking a key twice is a no-op.
    pub fn mark_durable<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys.extend(keys.into_iter().map(Into::into));
    }

    /// True when the key's top-level record is durable.
    pub fn is_durable(&self, key: &str) -> bool {
        self.keys.contains(top_level(key))
    }

    /// Drop the key's top-level record from the registry.
    ///
    /// Returns false if it was not durable.
    pub fn unmark(&mut self, key: &str) -> bool {
        self.keys.remove(top_level(key))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

fn top_level(key: &str) -> &str {
    key.split(PATH_SEPARATOR).next().unwrap_or(key)
}
