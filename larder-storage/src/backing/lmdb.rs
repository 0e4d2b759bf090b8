//! LMDB-backed durable store.
//!
//! Uses the heed crate (Rust bindings for LMDB). One environment directory
//! holds two named databases:
//!
//! - the records collection, keyed by top-level key
//! - a `meta` database holding the layout version
//!
//! Each record is stored as `[written_at: 8 bytes LE millis][json value]`.
//! LMDB write transactions are durable once `commit` returns, which is when
//! `put` and `delete` resolve.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use larder_core::{LarderConfig, LarderError, LarderResult, StorageError, Value};
use tracing::{debug, info};

use super::{BackingStore, Collection};

const META_DB: &str = "__larder_meta";
const SCHEMA_VERSION_KEY: &str = "schema_version";
const TIMESTAMP_LEN: usize = 8;

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbStoreError to LarderError.
impl From<LmdbStoreError> for LarderError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::EnvOpen(_) | LmdbStoreError::DbOpen(_) | LmdbStoreError::Io(_) => {
                LarderError::Storage(StorageError::ConnectFailed {
                    store: "lmdb".to_string(),
                    reason: e.to_string(),
                })
            }
            _ => LarderError::Storage(StorageError::TransactionFailed {
                reason: e.to_string(),
            }),
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

/// Connector for an LMDB environment directory.
///
/// # Example
///
/// ```ignore
/// let store = LmdbBackingStore::new("/var/lib/larder", "larder", 64);
/// let engine = StorageEngine::new(config, Some(Arc::new(store)))?;
/// ```
pub struct LmdbBackingStore {
    path: PathBuf,
    collection: String,
    map_size_mb: usize,
    opened: Mutex<Option<Arc<LmdbCollection>>>,
}

impl LmdbBackingStore {
    /// Create a connector. Nothing touches the disk until `connect`.
    pub fn new(path: impl Into<PathBuf>, collection: impl Into<String>, map_size_mb: usize) -> Self {
        Self {
            path: path.into(),
            collection: collection.into(),
            map_size_mb,
            opened: Mutex::new(None),
        }
    }

    /// Build a connector from config, or `None` when no data directory is set.
    pub fn from_config(config: &LarderConfig) -> Option<Self> {
        config
            .data_dir
            .as_ref()
            .map(|dir| Self::new(dir, config.collection.clone(), config.map_size_mb))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_env(&self) -> Result<Arc<LmdbCollection>, LmdbStoreError> {
        let mut opened = self
            .opened
            .lock()
            .map_err(|_| LmdbStoreError::EnvOpen("connector lock poisoned".to_string()))?;
        if let Some(collection) = opened.as_ref() {
            return Ok(Arc::clone(collection));
        }

        // Ensure directory exists
        std::fs::create_dir_all(&self.path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(self.map_size_mb * 1024 * 1024)
                .max_dbs(2)
                .open(&self.path)
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let records: Database<Str, Bytes> = env
            .create_database(&mut wtxn, Some(&self.collection))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let meta: Database<Str, Bytes> = env
            .create_database(&mut wtxn, Some(META_DB))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        info!(path = %self.path.display(), collection = %self.collection, "Opened LMDB environment");

        let collection = Arc::new(LmdbCollection { env, records, meta });
        *opened = Some(Arc::clone(&collection));
        Ok(collection)
    }
}

#[async_trait]
impl BackingStore for LmdbBackingStore {
    fn name(&self) -> &str {
        "lmdb"
    }

    async fn connect(&self, schema_version: u32) -> LarderResult<Arc<dyn Collection>> {
        let collection = self.open_env()?;
        collection.ensure_schema(schema_version)?;
        Ok(collection)
    }
}

/// The records collection of an open LMDB environment.
pub struct LmdbCollection {
    env: Env,
    records: Database<Str, Bytes>,
    meta: Database<Str, Bytes>,
}

impl LmdbCollection {
    /// Stamp `version` on the collection, recreating it when the stored
    /// version differs. A fresh environment just gets stamped.
    fn ensure_schema(&self, version: u32) -> Result<(), LmdbStoreError> {
        let stored = self.schema_version()?;
        if stored == Some(version) {
            return Ok(());
        }

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        if let Some(previous) = stored {
            info!(from = previous, to = version, "Upgrading LMDB collection layout");
            self.records.clear(&mut wtxn).map_err(txn_err)?;
        }
        self.meta
            .put(&mut wtxn, SCHEMA_VERSION_KEY, &version.to_le_bytes())
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)
    }

    /// Layout version stored in the environment, if any.
    pub fn schema_version(&self) -> Result<Option<u32>, LmdbStoreError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        match self.meta.get(&rtxn, SCHEMA_VERSION_KEY).map_err(txn_err)? {
            Some(bytes) => {
                let raw: [u8; 4] = bytes.try_into().map_err(|_| {
                    LmdbStoreError::Deserialization("Invalid schema version".into())
                })?;
                Ok(Some(u32::from_le_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    /// When a record was last written.
    pub fn written_at(&self, key: &str) -> Result<Option<DateTime<Utc>>, LmdbStoreError> {
        Ok(self.read_entry(key)?.map(|(_, written_at)| written_at))
    }

    /// Number of stored records.
    pub fn len(&self) -> Result<u64, LmdbStoreError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        self.records.len(&rtxn).map_err(txn_err)
    }

    pub fn is_empty(&self) -> Result<bool, LmdbStoreError> {
        Ok(self.len()? == 0)
    }

    fn read_entry(&self, key: &str) -> Result<Option<(Value, DateTime<Utc>)>, LmdbStoreError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let Some(bytes) = self.records.get(&rtxn, key).map_err(txn_err)? else {
            return Ok(None);
        };
        decode_entry(bytes).map(Some)
    }
}

fn encode_entry(value: &Value, written_at: DateTime<Utc>) -> Result<Vec<u8>, LmdbStoreError> {
    let value_bytes =
        serde_json::to_vec(value).map_err(|e| LmdbStoreError::Serialization(e.to_string()))?;
    let mut full_bytes = Vec::with_capacity(TIMESTAMP_LEN + value_bytes.len());
    full_bytes.extend_from_slice(&written_at.timestamp_millis().to_le_bytes());
    full_bytes.extend_from_slice(&value_bytes);
    Ok(full_bytes)
}

fn decode_entry(bytes: &[u8]) -> Result<(Value, DateTime<Utc>), LmdbStoreError> {
    if bytes.len() < TIMESTAMP_LEN {
        return Err(LmdbStoreError::Deserialization("Entry too short".into()));
    }
    let timestamp_bytes: [u8; TIMESTAMP_LEN] = bytes[..TIMESTAMP_LEN]
        .try_into()
        .map_err(|_| LmdbStoreError::Deserialization("Invalid timestamp".into()))?;
    let written_at = DateTime::<Utc>::from_timestamp_millis(i64::from_le_bytes(timestamp_bytes))
        .ok_or_else(|| LmdbStoreError::Deserialization("Timestamp out of range".into()))?;
    let value = serde_json::from_slice(&bytes[TIMESTAMP_LEN..])
        .map_err(|e| LmdbStoreError::Deserialization(e.to_string()))?;
    Ok((value, written_at))
}

#[async_trait]
impl Collection for LmdbCollection {
    async fn get(&self, key: &str) -> LarderResult<Option<Value>> {
        let entry = self.read_entry(key)?;
        debug!(key, found = entry.is_some(), "LMDB get");
        Ok(entry.map(|(value, _)| value))
    }

    async fn put(&self, key: &str, value: &Value) -> LarderResult<()> {
        let bytes = encode_entry(value, Utc::now())?;
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.records.put(&mut wtxn, key, &bytes).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        debug!(key, size = bytes.len(), "LMDB put committed");
        Ok(())
    }

    async fn delete(&self, key: &str) -> LarderResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let deleted = self.records.delete(&mut wtxn, key).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        debug!(key, deleted, "LMDB delete committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbBackingStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbBackingStore::new(temp_dir.path(), "larder", 10);
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (store, _temp_dir) = create_test_store();
        let collection = store.connect(1).await.expect("connect should succeed");

        let record = json!({"profile": {"name": "Ann"}, "tags": [1, 2]});
        collection.put("user", &record).await.expect("put should succeed");
        let fetched = collection.get("user").await.expect("get should succeed");
        assert_eq!(fetched, Some(record));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let (store, _temp_dir) = create_test_store();
        let collection = store.connect(1).await.expect("connect should succeed");
        assert_eq!(collection.get("missing").await.expect("get should succeed"), None);
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, _temp_dir) = create_test_store();
        let collection = store.connect(1).await.expect("connect should succeed");
        collection.put("user", &json!(1)).await.expect("put should succeed");
        collection.delete("user").await.expect("delete should succeed");
        assert_eq!(collection.get("user").await.expect("get should succeed"), None);
        // Deleting again is not an error
        collection.delete("user").await.expect("second delete should succeed");
    }

    #[tokio::test]
    async fn test_overwrite() {
        let (store, _temp_dir) = create_test_store();
        let collection = store.connect(1).await.expect("connect should succeed");
        collection.put("k", &json!("old")).await.expect("put should succeed");
        collection.put("k", &json!("new")).await.expect("put should succeed");
        assert_eq!(
            collection.get("k").await.expect("get should succeed"),
            Some(json!("new"))
        );
    }

    #[tokio::test]
    async fn test_connect_reuses_environment() {
        let (store, _temp_dir) = create_test_store();
        let first = store.connect(1).await.expect("connect should succeed");
        first.put("k", &json!(1)).await.expect("put should succeed");
        let second = store.connect(1).await.expect("reconnect should succeed");
        assert_eq!(second.get("k").await.expect("get should succeed"), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_schema_upgrade_recreates_collection() {
        let (store, _temp_dir) = create_test_store();
        let collection = store.connect(1).await.expect("connect should succeed");
        collection.put("k", &json!(1)).await.expect("put should succeed");

        let opened = store.open_env().expect("env should be open");
        assert_eq!(opened.schema_version().expect("version readable"), Some(1));

        let collection = store.connect(2).await.expect("upgrade should succeed");
        assert_eq!(collection.get("k").await.expect("get should succeed"), None);
        assert_eq!(opened.schema_version().expect("version readable"), Some(2));
        assert!(opened.is_empty().expect("len readable"));
    }

    #[tokio::test]
    async fn test_written_at_is_recorded() {
        let (store, _temp_dir) = create_test_store();
        let collection = store.connect(1).await.expect("connect should succeed");
        let before = Utc::now();
        collection.put("k", &json!(1)).await.expect("put should succeed");

        let opened = store.open_env().expect("env should be open");
        let written_at = opened
            .written_at("k")
            .expect("entry readable")
            .expect("entry exists");
        assert!((written_at - before).num_seconds().abs() < 1);
        assert_eq!(opened.len().expect("len readable"), 1);
    }

    #[test]
    fn test_entry_envelope() {
        let now = Utc::now();
        let bytes = encode_entry(&json!({"a": [1, 2]}), now).expect("encode");
        let (value, written_at) = decode_entry(&bytes).expect("decode");
        assert_eq!(value, json!({"a": [1, 2]}));
        assert_eq!(written_at.timestamp_millis(), now.timestamp_millis());
        assert!(decode_entry(&bytes[..4]).is_err());
    }

    #[test]
    fn test_from_config_requires_data_dir() {
        assert!(LmdbBackingStore::from_config(&LarderConfig::default()).is_none());
        let config = LarderConfig::default().with_data_dir("/tmp/larder-test");
        let store = LmdbBackingStore::from_config(&config).expect("data dir set");
        assert_eq!(store.path(), Path::new("/tmp/larder-test"));
    }

    #[test]
    fn test_error_conversion() {
        let err: LarderError = LmdbStoreError::Transaction("boom".into()).into();
        assert!(matches!(
            err,
            LarderError::Storage(StorageError::TransactionFailed { .. })
        ));
        let err: LarderError = LmdbStoreError::EnvOpen("nope".into()).into();
        assert!(matches!(
            err,
            LarderError::Storage(StorageError::ConnectFailed { .. })
        ));
    }
}
