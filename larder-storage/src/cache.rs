//! Bounded in-memory cache with durable-only eviction.
//!
//! The cache is a value mapping plus an ordered key-tracking list. Every key
//! in the mapping appears exactly once in the list and vice versa; all
//! mutation goes through methods that touch both together.
//!
//! Eviction only ever removes *durable* entries, because those can always be
//! re-read from the backing store. Volatile entries have nowhere else to live
//! and are never evicted, so a cache full of volatile keys simply grows.

use std::collections::HashMap;

use larder_core::{StoreKey, Value};

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded key/value cache.
#[derive(Debug, Clone)]
pub struct Cache {
    capacity: usize,
    values: HashMap<String, Value>,
    /// Keys in registration order, oldest first.
    order: Vec<String>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl Cache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            values: HashMap::new(),
            order: Vec::new(),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Look up a key. Counts a hit or a miss, nothing else changes.
    pub fn get(&mut self, key: &str) -> Option<&Value> {
        match self.values.get(key) {
            Some(value) => {
                self.hits += 1;
                Some(value)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Look up a key without touching statistics.
    pub fn peek(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Insert or overwrite an entry.
    ///
    /// A new key is appended to the tracking list; an overwrite keeps its
    /// position. When the cache then holds more than `capacity` entries and
    /// `store_available` is set, the most recently registered durable key
    /// (as judged by `is_durable`) is evicted and returned. If no durable key
    /// is cached nothing is evicted.
    pub fn put<F>(
        &mut self,
        key: &str,
        value: Value,
        store_available: bool,
        is_durable: F,
    ) -> Option<String>
    where
        F: Fn(&str) -> bool,
    {
        if self.values.insert(key.to_string(), value).is_none() {
            self.order.push(key.to_string());
        }

        if !store_available || self.order.len() <= self.capacity {
            return None;
        }
        self.evict_one(is_durable)
    }

    /// Remove one key from both the mapping and the tracking list.
    pub fn invalidate(&mut self, key: &str) -> Option<Value> {
        let removed = self.values.remove(key);
        if removed.is_some() {
            self.order.retain(|k| k != key);
        }
        removed
    }

    /// Remove a top-level key and every cached dotted key nested under it.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate_tree(&mut self, top_level: &str) -> usize {
        let before = self.order.len();
        self.order
            .retain(|k| k != top_level && !StoreKey::is_nested_under(k, top_level));
        self.values.retain(|k, _| k != top_level && !StoreKey::is_nested_under(k, top_level));
        before - self.order.len()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.values.clear();
        self.order.clear();
    }

    /// Cached keys, oldest first.
    pub fn keys(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entry_count: self.order.len() as u64,
            evictions: self.evictions,
        }
    }

    /// True when the mapping and the tracking list hold the same keys, each
    /// exactly once.
    pub fn check_invariants(&self) -> bool {
        if self.order.len() != self.values.len() {
            return false;
        }
        let mut seen = std::collections::HashSet::with_capacity(self.order.len());
        self.order
            .iter()
            .all(|k| self.values.contains_key(k) && seen.insert(k.as_str()))
    }

    fn evict_one<F>(&mut self, is_durable: F) -> Option<String>
    where
        F: Fn(&str) -> bool,
    {
        let position = self.order.iter().rposition(|k| is_durable(k))?;
        let victim = self.order.remove(position);
        self.values.remove(&victim);
        self.evictions += 1;
        Some(victim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn durable_if_prefixed(key: &str) -> bool {
        key.starts_with('d')
    }

    #[test]
    fn test_put_get_invalidate() {
        let mut cache = Cache::new(5);
        cache.put("a", json!(1), true, durable_if_prefixed);
        assert_eq!(cache.get("a"), Some(&json!(1)));
        assert_eq!(cache.invalidate("a"), Some(json!(1)));
        assert_eq!(cache.get("a"), None);
        assert!(cache.check_invariants());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 0);
    }

    #[test]
    fn test_overwrite_keeps_position() {
        let mut cache = Cache::new(5);
        cache.put("a", json!(1), true, durable_if_prefixed);
        cache.put("b", json!(2), true, durable_if_prefixed);
        cache.put("a", json!(3), true, durable_if_prefixed);
        assert_eq!(cache.keys(), &["a".to_string(), "b".to_string()]);
        assert_eq!(cache.peek("a"), Some(&json!(3)));
    }

    #[test]
    fn test_invalidate_unknown_key_is_noop() {
        let mut cache = Cache::new(5);
        cache.put("a", json!(1), true, durable_if_prefixed);
        cache.put("b", json!(2), true, durable_if_prefixed);
        assert_eq!(cache.invalidate("zzz"), None);
        assert_eq!(cache.len(), 2);
        assert!(cache.check_invariants());
    }

    #[test]
    fn test_evicts_most_recent_durable_key() {
        let mut cache = Cache::new(3);
        cache.put("d1", json!(1), true, durable_if_prefixed);
        cache.put("d2", json!(2), true, durable_if_prefixed);
        cache.put("v1", json!(3), true, durable_if_prefixed);
        let evicted = cache.put("v2", json!(4), true, durable_if_prefixed);
        assert_eq!(evicted.as_deref(), Some("d2"));
        assert_eq!(cache.keys(), &["d1", "v1", "v2"].map(String::from));
        assert!(cache.check_invariants());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_new_durable_key_can_evict_itself() {
        let mut cache = Cache::new(2);
        cache.put("v1", json!(1), true, durable_if_prefixed);
        cache.put("v2", json!(2), true, durable_if_prefixed);
        let evicted = cache.put("d1", json!(3), true, durable_if_prefixed);
        assert_eq!(evicted.as_deref(), Some("d1"));
        assert!(!cache.contains("d1"));
    }

    #[test]
    fn test_no_durable_key_means_no_eviction() {
        let mut cache = Cache::new(2);
        for key in ["v1", "v2", "v3", "v4"] {
            assert_eq!(cache.put(key, json!(0), true, durable_if_prefixed), None);
        }
        assert_eq!(cache.len(), 4);
        assert!(cache.check_invariants());
    }

    #[test]
    fn test_no_eviction_without_store() {
        let mut cache = Cache::new(1);
        cache.put("d1", json!(1), false, durable_if_prefixed);
        assert_eq!(cache.put("d2", json!(2), false, durable_if_prefixed), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_invalidate_tree() {
        let mut cache = Cache::new(10);
        for key in ["user", "user.name", "user.profile.city", "username", "other"] {
            cache.put(key, json!(null), true, durable_if_prefixed);
        }
        assert_eq!(cache.invalidate_tree("user"), 3);
        assert_eq!(cache.keys(), &["username", "other"].map(String::from));
        assert!(cache.check_invariants());
    }

    #[test]
    fn test_clear() {
        let mut cache = Cache::new(10);
        cache.put("a", json!(1), true, durable_if_prefixed);
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.check_invariants());
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);
        assert!((CacheStats::default().hit_rate() - 0.0).abs() < 0.001);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Put(String),
        Invalidate(String),
        InvalidateTree(String),
    }

    fn key_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            "[dv][0-4]",
            "[dv][0-4]\\.[a-c]",
        ]
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => key_strategy().prop_map(Op::Put),
            1 => key_strategy().prop_map(Op::Invalidate),
            1 => "[dv][0-4]".prop_map(Op::InvalidateTree),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// Property: mapping and tracking list never drift apart, durable
        /// entries never exceed capacity, and volatile entries are never
        /// evicted.
        #[test]
        fn prop_cache_invariants_hold(
            capacity in 1usize..6,
            ops in prop::collection::vec(op_strategy(), 0..60),
        ) {
            let mut cache = Cache::new(capacity);
            let mut volatile_expected = std::collections::BTreeSet::new();

            for op in ops {
                match op {
                    Op::Put(key) => {
                        let evicted = cache.put(&key, json!(1), true, durable_if_prefixed);
                        if let Some(victim) = evicted {
                            prop_assert!(durable_if_prefixed(&victim));
                        }
                        if !durable_if_prefixed(&key) {
                            volatile_expected.insert(key);
                        }
                    }
                    Op::Invalidate(key) => {
                        cache.invalidate(&key);
                        volatile_expected.remove(&key);
                    }
                    Op::InvalidateTree(top) => {
                        cache.invalidate_tree(&top);
                        volatile_expected.retain(|k| k != &top && !StoreKey::is_nested_under(k, &top));
                    }
                }

                prop_assert!(cache.check_invariants());
                let durable = cache.keys().iter().filter(|k| durable_if_prefixed(k)).count();
                prop_assert!(durable <= capacity);
                for key in &volatile_expected {
                    prop_assert!(cache.contains(key), "volatile key {} was evicted", key);
                }
            }
        }
    }
}
