//! Host key-value storage and the typed adapter layered on top of it.
//!
//! A [`KeyValueStore`] is the synchronous, string-valued store a host offers
//! (one per origin, shared by every open context). [`Persisted`] binds a typed
//! value to one key and tolerates missing or corrupt entries.

mod file;
mod lock;
mod memory;
mod persisted;

pub use file::{FileStore, DEFAULT_QUOTA_BYTES};
pub use memory::MemoryStore;
pub use persisted::{clear_keys, Persisted, Subscription};

use tokio::sync::broadcast;

use crate::error::Result;

/// A change made to a key by another context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    /// `None` when the key was removed.
    pub new_value: Option<String>,
}

/// Synchronous string key-value storage shared between contexts.
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    fn remove_item(&self, key: &str) -> Result<()>;

    /// Changes made by other contexts. A context never sees its own writes.
    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;
}
