//! Store events and subscriber notifications.
//!
//! Events announce that an operation succeeded. They are fire-and-forget and
//! carry no durability guarantees of their own.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Kind of event published by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// The backing store connected and is ready.
    Init,
    /// A value was read through from the backing store.
    Read,
    /// A value was written.
    Put,
    /// A value was deleted.
    Delete,
}

/// An event as published on the engine's event feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreEvent {
    Init,
    Read { key: String, value: Option<Value> },
    Put { key: String, value: Value },
    Delete { key: String },
}

impl StoreEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StoreEvent::Init => EventKind::Init,
            StoreEvent::Read { .. } => EventKind::Read,
            StoreEvent::Put { .. } => EventKind::Put,
            StoreEvent::Delete { .. } => EventKind::Delete,
        }
    }

    /// The key the event concerns; `Init` has none.
    pub fn key(&self) -> Option<&str> {
        match self {
            StoreEvent::Init => None,
            StoreEvent::Read { key, .. } | StoreEvent::Put { key, .. } | StoreEvent::Delete { key } => {
                Some(key)
            }
        }
    }

    /// Event type string for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            StoreEvent::Init => "init",
            StoreEvent::Read { .. } => "read",
            StoreEvent::Put { .. } => "put",
            StoreEvent::Delete { .. } => "delete",
        }
    }

    /// Convert into the notification a key subscriber receives.
    ///
    /// Only `Put` and `Delete` reach key subscribers.
    pub fn to_notification(&self) -> Option<Notification> {
        match self {
            StoreEvent::Put { key, value } => Some(Notification {
                key: key.clone(),
                value: Some(value.clone()),
                action: Action::Update,
            }),
            StoreEvent::Delete { key } => Some(Notification {
                key: key.clone(),
                value: None,
                action: Action::Delete,
            }),
            StoreEvent::Init | StoreEvent::Read { .. } => None,
        }
    }
}

/// Classified action delivered to a key subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Originated from a Put.
    Update,
    /// Originated from a Delete.
    Delete,
}

/// What a key subscriber's callback receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub key: String,
    pub value: Option<Value>,
    pub action: Action,
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Generate a new time-ordered subscription id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
