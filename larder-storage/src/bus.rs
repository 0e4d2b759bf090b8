//! Notification bus.
//!
//! Two delivery paths share one `publish` call:
//!
//! - Key subscribers register a callback for one key and receive `Put` and
//!   `Delete` events for it as a [`Notification`]. Callbacks run
//!   synchronously inside `publish`, so a subscriber registered after an
//!   event never sees it.
//! - Every event, including `Init` and `Read`, also goes out on a tokio
//!   broadcast channel for consumers that want the whole feed.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use larder_core::{Notification, StorageError, StoreEvent, SubscriptionId};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Callback invoked for each notification on a subscribed key.
pub type Callback = Arc<dyn Fn(&Notification) + Send + Sync>;

struct Subscriber {
    key: String,
    callback: Callback,
}

pub struct NotificationBus {
    subscribers: RwLock<HashMap<SubscriptionId, Subscriber>>,
    tx: broadcast::Sender<StoreEvent>,
}

impl NotificationBus {
    /// Create a bus whose broadcast feed buffers up to `capacity` events per
    /// lagging receiver.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            subscribers: RwLock::new(HashMap::new()),
            tx,
        }
    }

    /// Register `callback` for Put and Delete events on `key`.
    pub fn subscribe<F>(&self, key: impl Into<String>, callback: F) -> Result<SubscriptionId, StorageError>
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        let key = key.into();
        debug!(subscription = %id, key = %key, "Subscribed");
        self.subscribers
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(
                id,
                Subscriber {
                    key,
                    callback: Arc::new(callback),
                },
            );
        Ok(id)
    }

    /// Remove a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<bool, StorageError> {
        let removed = self
            .subscribers
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .remove(&id)
            .is_some();
        debug!(subscription = %id, removed, "Unsubscribed");
        Ok(removed)
    }

    pub fn subscriber_count(&self) -> Result<usize, StorageError> {
        Ok(self
            .subscribers
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .len())
    }

    /// Receive every future event.
    pub fn events(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    /// Deliver an event to matching key subscribers and the broadcast feed.
    ///
    /// Callbacks are collected first and invoked without holding the
    /// registry lock, so they may subscribe or unsubscribe themselves. A
    /// poisoned registry skips key subscribers but still feeds the channel.
    pub fn publish(&self, event: StoreEvent) {
        if let Some(notification) = event.to_notification() {
            let callbacks: Vec<Callback> = match self.subscribers.read() {
                Ok(subscribers) => subscribers
                    .values()
                    .filter(|s| s.key == notification.key)
                    .map(|s| Arc::clone(&s.callback))
                    .collect(),
                Err(_) => {
                    warn!(
                        event_type = event.event_type(),
                        key = %notification.key,
                        "Subscriber registry lock poisoned, skipping key subscribers"
                    );
                    Vec::new()
                }
            };
            for callback in callbacks {
                callback(&notification);
            }
        }

        let event_type = event.event_type();
        match self.tx.send(event) {
            Ok(receivers) => {
                debug!(event_type, receivers, "Published event");
            }
            Err(_) => {
                // No feed receivers - this is fine
                debug!(event_type, "No receivers for event");
            }
        }
    }
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBus")
            .field("subscribers", &self.subscriber_count().ok())
            .field("feed_receivers", &self.tx.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::Action;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<Notification>>>, impl Fn(&Notification) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |n: &Notification| sink.lock().unwrap().push(n.clone()))
    }

    #[test]
    fn test_delivers_only_matching_key() {
        let bus = NotificationBus::new(8);
        let (seen, callback) = recorder();
        bus.subscribe("user", callback).unwrap();

        bus.publish(StoreEvent::Put {
            key: "other".to_string(),
            value: json!(1),
        });
        bus.publish(StoreEvent::Put {
            key: "user".to_string(),
            value: json!({"name": "Ann"}),
        });
        bus.publish(StoreEvent::Delete {
            key: "user".to_string(),
        });

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].action, Action::Update);
        assert_eq!(seen[0].value, Some(json!({"name": "Ann"})));
        assert_eq!(seen[1].action, Action::Delete);
    }

    #[test]
    fn test_read_and_init_skip_key_subscribers() {
        let bus = NotificationBus::new(8);
        let (seen, callback) = recorder();
        bus.subscribe("user", callback).unwrap();
        bus.publish(StoreEvent::Init);
        bus.publish(StoreEvent::Read {
            key: "user".to_string(),
            value: Some(json!(1)),
        });
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_late_subscriber_misses_earlier_event() {
        let bus = NotificationBus::new(8);
        bus.publish(StoreEvent::Delete {
            key: "user".to_string(),
        });
        let (seen, callback) = recorder();
        bus.subscribe("user", callback).unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = NotificationBus::new(8);
        let (seen, callback) = recorder();
        let id = bus.subscribe("user", callback).unwrap();
        assert_eq!(bus.subscriber_count().unwrap(), 1);
        assert!(bus.unsubscribe(id).unwrap());
        assert!(!bus.unsubscribe(id).unwrap());
        bus.publish(StoreEvent::Delete {
            key: "user".to_string(),
        });
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(bus.subscriber_count().unwrap(), 0);
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let bus = Arc::new(NotificationBus::new(8));
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(Mutex::new(0));

        let bus_in_cb = Arc::clone(&bus);
        let slot_in_cb = Arc::clone(&slot);
        let calls_in_cb = Arc::clone(&calls);
        let id = bus
            .subscribe("user", move |_| {
                *calls_in_cb.lock().unwrap() += 1;
                if let Some(id) = *slot_in_cb.lock().unwrap() {
                    bus_in_cb.unsubscribe(id).unwrap();
                }
            })
            .unwrap();
        *slot.lock().unwrap() = Some(id);

        for _ in 0..2 {
            bus.publish(StoreEvent::Delete {
                key: "user".to_string(),
            });
        }
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_feed_receives_all_kinds() {
        let bus = NotificationBus::new(8);
        let mut rx = bus.events();
        bus.publish(StoreEvent::Init);
        bus.publish(StoreEvent::Read {
            key: "a".to_string(),
            value: None,
        });
        assert_eq!(rx.recv().await.unwrap(), StoreEvent::Init);
        assert_eq!(
            rx.recv().await.unwrap(),
            StoreEvent::Read {
                key: "a".to_string(),
                value: None,
            }
        );
    }

    #[tokio::test]
    async fn test_poisoned_registry_still_feeds_channel() {
        let bus = NotificationBus::new(8);
        let mut rx = bus.events();
        std::thread::scope(|s| {
            let _ = s
                .spawn(|| {
                    let _guard = bus.subscribers.write().unwrap();
                    panic!("subscriber registry poisoned");
                })
                .join();
        });

        bus.publish(StoreEvent::Delete {
            key: "user".to_string(),
        });
        assert_eq!(
            rx.recv().await.unwrap(),
            StoreEvent::Delete {
                key: "user".to_string(),
            }
        );
        assert_eq!(
            bus.subscribe("user", |_| {}).unwrap_err(),
            StorageError::LockPoisoned
        );
        assert_eq!(bus.subscriber_count(), Err(StorageError::LockPoisoned));
    }
}
