//! larder core - values, keys, paths and events
//!
//! Pure data types and pure functions shared by the storage engine. Nothing
//! in this crate performs I/O or awaits.

pub mod config;
pub mod error;
pub mod event;
pub mod key;
pub mod path;

pub use config::{LarderConfig, DEFAULT_CACHE_CAPACITY, DEFAULT_COLLECTION, DEFAULT_SCHEMA_VERSION};
pub use error::{
    ConfigError, KeyError, LarderError, LarderResult, PathError, StorageError, ValidationError,
};
pub use event::{Action, EventKind, Notification, StoreEvent, SubscriptionId};
pub use key::{StoreKey, PATH_SEPARATOR};

/// A stored record: scalar, ordered sequence or nested mapping.
pub use serde_json::Value;

/// True when a value counts as present for read-through purposes.
///
/// `Null` is stored like any other value but a cached `Null` does not
/// satisfy a read while a durable store is available.
pub fn is_present(value: Option<&Value>) -> bool {
    !matches!(value, None | Some(Value::Null))
}
