use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::{KeyValueStore, StorageEvent};
use crate::error::Result;

const EVENT_CAPACITY: usize = 64;

struct Shared {
    items: Mutex<HashMap<String, String>>,
    events: broadcast::Sender<(u64, StorageEvent)>,
    next_context: AtomicU64,
}

/// In-memory store. Each handle from [`MemoryStore::new_context`] behaves like
/// a separate tab on the same origin.
pub struct MemoryStore {
    shared: Arc<Shared>,
    context: u64,
    events: broadcast::Sender<StorageEvent>,
    _relay: DropGuard,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            items: Mutex::new(HashMap::new()),
            events,
            next_context: AtomicU64::new(0),
        });
        Self::attach(shared)
    }

    /// Another context sharing the same items.
    pub fn new_context(&self) -> Self {
        Self::attach(Arc::clone(&self.shared))
    }

    fn attach(shared: Arc<Shared>) -> Self {
        let context = shared.next_context.fetch_add(1, Ordering::Relaxed);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        // Relay foreign events into this context's own channel.
        let mut upstream = shared.events.subscribe();
        let relay = events.clone();
        let stop = CancellationToken::new();
        let stopped = stop.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                loop {
                    let received = tokio::select! {
                        _ = stopped.cancelled() => break,
                        received = upstream.recv() => received,
                    };
                    match received {
                        Ok((origin, event)) if origin != context => {
                            let _ = relay.send(event);
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "memory store relay lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }

        Self {
            shared,
            context,
            events,
            _relay: stop.drop_guard(),
        }
    }

    fn publish(&self, key: &str, new_value: Option<&str>) {
        let event = StorageEvent {
            key: key.to_string(),
            new_value: new_value.map(str::to_string),
        };
        let _ = self.shared.events.send((self.context, event));
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let items = self.shared.items.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        {
            let mut items = self.shared.items.lock().unwrap_or_else(PoisonError::into_inner);
            items.insert(key.to_string(), value.to_string());
        }
        self.publish(key, Some(value));
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let removed = {
            let mut items = self.shared.items.lock().unwrap_or_else(PoisonError::into_inner);
            items.remove(key).is_some()
        };
        if removed {
            self.publish(key, None);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_get_set_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get_item("k").unwrap(), None);
        store.set_item("k", "v").unwrap();
        assert_eq!(store.get_item("k").unwrap(), Some("v".to_string()));
        store.remove_item("k").unwrap();
        assert_eq!(store.get_item("k").unwrap(), None);
    }

    #[tokio::test]
    async fn test_contexts_share_items() {
        let tab_a = MemoryStore::new();
        let tab_b = tab_a.new_context();
        tab_a.set_item("k", "from a").unwrap();
        assert_eq!(tab_b.get_item("k").unwrap(), Some("from a".to_string()));
    }

    #[tokio::test]
    async fn test_events_reach_other_contexts_only() {
        let tab_a = MemoryStore::new();
        let tab_b = tab_a.new_context();
        let mut events_a = tab_a.subscribe();
        let mut events_b = tab_b.subscribe();

        tab_a.set_item("k", "v").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), events_b.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            StorageEvent {
                key: "k".to_string(),
                new_value: Some("v".to_string())
            }
        );

        let own = tokio::time::timeout(Duration::from_millis(50), events_a.recv()).await;
        assert!(own.is_err(), "a context must not observe its own writes");
    }
}
