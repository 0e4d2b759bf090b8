//! larder test utilities
//!
//! Shared test infrastructure for the larder workspace:
//! - Proptest generators for values and keys
//! - Engine fixtures over each kind of backing store
//! - A recorder for subscriber notifications
//! - Assertions for larder error variants

pub use larder_core::{
    Action, LarderConfig, LarderError, LarderResult, Notification, StorageError, StoreEvent,
    StoreKey, ValidationError, Value,
};
pub use larder_storage::{InMemoryBackingStore, LmdbBackingStore, StorageEngine, StoreOp};

use std::sync::{Arc, Mutex};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating random values and keys.

    use super::*;
    use proptest::prelude::*;
    use serde_json::{Map, Number};

    /// Generate a scalar value (null, boolean, integer, float or string).
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| Value::Number(n.into())),
            (-1.0e6f64..1.0e6f64).prop_map(|f| Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null)),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
        ]
    }

    /// Generate a value nested up to four levels deep.
    pub fn arb_value() -> impl Strategy<Value = Value> {
        arb_scalar().prop_recursive(4, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map(arb_segment(), inner, 0..4)
                    .prop_map(|entries| Value::Object(entries.into_iter().collect::<Map<_, _>>())),
            ]
        })
    }

    /// Generate a sequence of scalars.
    pub fn arb_sequence() -> impl Strategy<Value = Value> {
        prop::collection::vec(arb_scalar(), 0..8).prop_map(Value::Array)
    }

    /// Generate one key segment (no separator, never empty, never numeric).
    pub fn arb_segment() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,7}"
    }

    /// Generate a top-level key.
    pub fn arb_simple_key() -> impl Strategy<Value = String> {
        arb_segment()
    }

    /// Generate a dotted key with one to three nested segments.
    pub fn arb_dotted_key() -> impl Strategy<Value = String> {
        (arb_segment(), prop::collection::vec(arb_segment(), 1..4))
            .prop_map(|(top, rest)| format!("{top}.{}", rest.join(".")))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built engines for common testing scenarios.

    use super::*;
    use tempfile::TempDir;

    /// Config with a small cache so eviction is easy to trigger.
    pub fn small_cache_config(capacity: usize) -> LarderConfig {
        LarderConfig::default().with_cache_capacity(capacity)
    }

    /// Engine without any backing store.
    pub fn volatile_engine() -> StorageEngine {
        StorageEngine::volatile(LarderConfig::default()).expect("default config is valid")
    }

    /// Engine over an in-memory store, with `durable` keys registered.
    ///
    /// The returned store shares state with the engine's copy, so tests can
    /// inspect records and operation counts.
    pub fn memory_engine(durable: &[&str]) -> (StorageEngine, InMemoryBackingStore) {
        memory_engine_with(LarderConfig::default(), InMemoryBackingStore::new(), durable)
    }

    /// Engine over a caller-provided in-memory store and config.
    pub fn memory_engine_with(
        config: LarderConfig,
        store: InMemoryBackingStore,
        durable: &[&str],
    ) -> (StorageEngine, InMemoryBackingStore) {
        let engine = StorageEngine::new(config, Some(Arc::new(store.clone())))
            .expect("test config is valid");
        engine
            .mark_durable(durable.iter().copied())
            .expect("registry lock is healthy");
        (engine, store)
    }

    /// Engine over an LMDB environment in `dir`.
    pub fn lmdb_engine(dir: &TempDir, schema_version: u32, durable: &[&str]) -> StorageEngine {
        let config = LarderConfig::default()
            .with_data_dir(dir.path())
            .with_schema_version(schema_version)
            .with_map_size_mb(10);
        let store = LmdbBackingStore::from_config(&config).expect("data dir is set");
        let engine =
            StorageEngine::new(config, Some(Arc::new(store))).expect("test config is valid");
        engine
            .mark_durable(durable.iter().copied())
            .expect("registry lock is healthy");
        engine
    }

    /// Fresh temporary directory for an LMDB environment.
    pub fn temp_dir() -> TempDir {
        TempDir::new().expect("TempDir creation should succeed")
    }
}

// ============================================================================
// EVENT RECORDING
// ============================================================================

/// Records every notification delivered to one key subscription.
#[derive(Clone)]
pub struct EventRecorder {
    seen: Arc<Mutex<Vec<Notification>>>,
}

impl EventRecorder {
    /// Subscribe to `key` on `engine`.
    pub fn attach(engine: &StorageEngine, key: &str) -> LarderResult<Self> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        engine.subscribe(key, move |n| {
            if let Ok(mut seen) = sink.lock() {
                seen.push(n.clone());
            }
        })?;
        Ok(Self { seen })
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<Action> {
        self.notifications().iter().map(|n| n.action).collect()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drain every event already queued on a feed receiver.
pub fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<StoreEvent>) -> Vec<StoreEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for larder-specific error variants.

    use super::*;

    /// Assert that a result failed with a transaction error.
    #[track_caller]
    pub fn assert_transaction_failed<T: std::fmt::Debug>(result: &LarderResult<T>) {
        match result {
            Err(LarderError::Storage(StorageError::TransactionFailed { .. })) => {}
            other => panic!("Expected TransactionFailed, got: {:?}", other),
        }
    }

    /// Assert that a result failed because a value was not a sequence.
    #[track_caller]
    pub fn assert_not_a_sequence<T: std::fmt::Debug>(result: &LarderResult<T>, key: &str) {
        match result {
            Err(LarderError::Validation(ValidationError::NotASequence { key: k, .. })) => {
                assert_eq!(k, key, "Wrong key in NotASequence error");
            }
            other => panic!("Expected NotASequence for {key}, got: {:?}", other),
        }
    }

    /// Assert that a result failed on key syntax.
    #[track_caller]
    pub fn assert_key_error<T: std::fmt::Debug>(result: &LarderResult<T>) {
        match result {
            Err(LarderError::Key(_)) => {}
            other => panic!("Expected Key error, got: {:?}", other),
        }
    }
}
