use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::KeyValueStore;

enum WriteOp {
    Set(String),
    Remove,
    Flush(oneshot::Sender<()>),
}

/// A typed value mirrored to one key of a [`KeyValueStore`].
///
/// Reads fall back to a caller-supplied default when the key is missing or
/// holds malformed JSON. Writes are fire-and-forget: they are queued to a
/// background task, applied in order, and may silently fail (the failure is
/// logged). Use [`Persisted::flush`] to wait for queued writes.
///
/// Must be created inside a tokio runtime.
pub struct Persisted<T> {
    key: Arc<str>,
    store: Arc<dyn KeyValueStore>,
    writes: mpsc::UnboundedSender<WriteOp>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Persisted<T> {
    fn clone(&self) -> Self {
        Self {
            key: Arc::clone(&self.key),
            store: Arc::clone(&self.store),
            writes: self.writes.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Persisted<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn new(store: Arc<dyn KeyValueStore>, key: &str) -> Self {
        let key: Arc<str> = Arc::from(key);
        let (writes, queue) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(Arc::clone(&store), Arc::clone(&key), queue));

        Self {
            key,
            store,
            writes,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current stored value, or `default` if absent or unreadable.
    pub fn read(&self, default: T) -> T {
        let raw = match self.store.get_item(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return default,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "storage read failed");
                return default;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "stored value is malformed, using default");
                default
            }
        }
    }

    /// Queue `value` for storage. Never blocks and never fails.
    pub fn write(&self, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(key = %self.key, error = %e, "failed to serialize value");
                return;
            }
        };
        if self.writes.send(WriteOp::Set(raw)).is_err() {
            tracing::error!(key = %self.key, "storage writer is gone, write dropped");
        }
    }

    /// Queue removal of the key.
    pub fn remove(&self) {
        if self.writes.send(WriteOp::Remove).is_err() {
            tracing::error!(key = %self.key, "storage writer is gone, remove dropped");
        }
    }

    /// Wait until every previously queued write has been applied (or has failed).
    pub async fn flush(&self) {
        let (done, applied) = oneshot::channel();
        if self.writes.send(WriteOp::Flush(done)).is_ok() {
            let _ = applied.await;
        }
    }

    /// Call `on_change` whenever another context stores a new value under this key.
    ///
    /// Removals and malformed values are logged and skipped.
    pub fn subscribe<F>(&self, on_change: F) -> Subscription
    where
        F: Fn(T) + Send + 'static,
    {
        let mut events = self.store.subscribe();
        let key = Arc::clone(&self.key);

        let task = tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(key = %key, skipped, "storage events lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if event.key != *key {
                    continue;
                }
                let Some(raw) = event.new_value else {
                    tracing::debug!(key = %key, "key removed in another context");
                    continue;
                };
                match serde_json::from_str(&raw) {
                    Ok(value) => on_change(value),
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "ignoring malformed storage update");
                    }
                }
            }
        });

        Subscription { task }
    }
}

async fn run_writer(
    store: Arc<dyn KeyValueStore>,
    key: Arc<str>,
    mut queue: mpsc::UnboundedReceiver<WriteOp>,
) {
    while let Some(op) = queue.recv().await {
        let result = match op {
            WriteOp::Set(raw) => store.set_item(&key, &raw),
            WriteOp::Remove => store.remove_item(&key),
            WriteOp::Flush(done) => {
                let _ = done.send(());
                continue;
            }
        };
        if let Err(e) = result {
            tracing::error!(key = %key, error = %e, "failed to persist value");
        }
    }
}

/// Live storage subscription. Dropping it stops delivery.
#[must_use = "dropping a Subscription cancels it"]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Remove every key in `keys`, logging failures.
pub fn clear_keys(store: &dyn KeyValueStore, keys: &[&str]) {
    for key in keys {
        if let Err(e) = store.remove_item(key) {
            tracing::error!(key = %key, error = %e, "failed to remove key");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{NoteminderError, Result};
    use crate::storage::{MemoryStore, StorageEvent};
    use std::sync::Mutex;
    use std::time::Duration;

    struct FailingStore {
        events: broadcast::Sender<StorageEvent>,
    }

    impl FailingStore {
        fn new() -> Self {
            Self {
                events: broadcast::channel(4).0,
            }
        }
    }

    impl KeyValueStore for FailingStore {
        fn get_item(&self, _key: &str) -> Result<Option<String>> {
            Err(NoteminderError::Storage("unavailable".into()))
        }

        fn set_item(&self, _key: &str, _value: &str) -> Result<()> {
            Err(NoteminderError::QuotaExceeded { needed: 10, max: 1 })
        }

        fn remove_item(&self, _key: &str) -> Result<()> {
            Err(NoteminderError::Storage("unavailable".into()))
        }

        fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
            self.events.subscribe()
        }
    }

    #[tokio::test]
    async fn test_read_missing_returns_default() {
        let value: Persisted<Vec<u32>> = Persisted::new(Arc::new(MemoryStore::new()), "k");
        assert_eq!(value.read(vec![7]), vec![7]);
    }

    #[tokio::test]
    async fn test_read_malformed_returns_default() {
        let store = Arc::new(MemoryStore::new());
        store.set_item("k", "{broken").unwrap();
        let value: Persisted<Vec<u32>> = Persisted::new(store, "k");
        assert_eq!(value.read(Vec::new()), Vec::<u32>::new());
    }

    #[tokio::test]
    async fn test_write_then_flush_is_readable() {
        let store = Arc::new(MemoryStore::new());
        let value: Persisted<Vec<u32>> = Persisted::new(store.clone(), "k");

        value.write(&vec![1, 2]);
        value.write(&vec![1, 2, 3]);
        value.flush().await;

        assert_eq!(store.get_item("k").unwrap(), Some("[1,2,3]".to_string()));
        assert_eq!(value.read(Vec::new()), vec![1, 2, 3]);

        value.remove();
        value.flush().await;
        assert_eq!(store.get_item("k").unwrap(), None);
    }

    #[tokio::test]
    async fn test_storage_failures_are_swallowed() {
        let value: Persisted<Vec<u32>> = Persisted::new(Arc::new(FailingStore::new()), "k");
        value.write(&vec![1]);
        value.flush().await;
        assert_eq!(value.read(vec![9]), vec![9]);
    }

    #[tokio::test]
    async fn test_subscribe_sees_other_context() {
        let tab_a = Arc::new(MemoryStore::new());
        let tab_b = Arc::new(tab_a.new_context());
        let writer: Persisted<Vec<u32>> = Persisted::new(tab_a, "k");
        let reader: Persisted<Vec<u32>> = Persisted::new(tab_b, "k");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = reader.subscribe(move |value| sink.lock().unwrap().push(value));

        writer.write(&vec![4, 2]);
        writer.flush().await;

        tokio::time::timeout(Duration::from_secs(1), async {
            while seen.lock().unwrap().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(seen.lock().unwrap().as_slice(), &[vec![4, 2]]);
    }

    #[tokio::test]
    async fn test_cancelled_subscription_stops_delivery() {
        let tab_a = Arc::new(MemoryStore::new());
        let tab_b = Arc::new(tab_a.new_context());
        let writer: Persisted<u32> = Persisted::new(tab_a, "k");
        let reader: Persisted<u32> = Persisted::new(tab_b, "k");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = reader.subscribe(move |value| sink.lock().unwrap().push(value));
        sub.cancel();

        writer.write(&1);
        writer.flush().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_keys() {
        let store = MemoryStore::new();
        store.set_item("a", "1").unwrap();
        store.set_item("b", "2").unwrap();
        store.set_item("c", "3").unwrap();

        clear_keys(&store, &["a", "b", "missing"]);

        assert_eq!(store.get_item("a").unwrap(), None);
        assert_eq!(store.get_item("b").unwrap(), None);
        assert_eq!(store.get_item("c").unwrap(), Some("3".to_string()));
    }
}
