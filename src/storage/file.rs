use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::lock::FileLock;
use super::{KeyValueStore, StorageEvent};
use crate::error::{NoteminderError, Result};

const STORAGE_FILE: &str = "storage.json";
const LOCK_FILE: &str = "storage.lock";
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);
const EVENT_CAPACITY: usize = 64;

/// Browsers typically allow about 5 MiB per origin.
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

struct Inner {
    path: PathBuf,
    lock_path: PathBuf,
    quota: usize,
    /// Last contents this process read or wrote; the watcher diffs against it.
    known: Mutex<HashMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
}

/// Key-value store persisted as a single JSON object file.
///
/// Several processes may open the same directory; each one is a separate
/// context and learns about the others' writes through [`FileStore::watch`].
pub struct FileStore {
    inner: Arc<Inner>,
    watcher: Mutex<Option<DropGuard>>,
}

impl FileStore {
    /// Open (or lazily create) the store inside `dir` with the default quota.
    pub fn open(dir: &Path) -> Result<Self> {
        Self::open_with_quota(dir, DEFAULT_QUOTA_BYTES)
    }

    pub fn open_with_quota(dir: &Path, quota: usize) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(STORAGE_FILE);
        // A corrupt file surfaces as read errors instead of failing the open.
        let known = read_map(&path).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "storage file unreadable");
            HashMap::new()
        });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                lock_path: dir.join(LOCK_FILE),
                path,
                quota,
                known: Mutex::new(known),
                events,
            }),
            watcher: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Poll the file every `interval` and publish changes made by other processes.
    /// Calling it again replaces the previous watcher.
    pub fn watch(&self, interval: Duration) {
        let token = CancellationToken::new();
        let stopped = token.clone();
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stopped.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(e) = inner.poll_changes() {
                    tracing::warn!(path = %inner.path.display(), error = %e, "storage poll failed");
                }
            }
        });

        let mut watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        *watcher = Some(token.drop_guard());
    }
}

impl Inner {
    fn poll_changes(&self) -> Result<()> {
        let mut known = self.known.lock().unwrap_or_else(PoisonError::into_inner);
        let current = read_map(&self.path)?;

        for (key, value) in &current {
            if known.get(key) != Some(value) {
                let _ = self.events.send(StorageEvent {
                    key: key.clone(),
                    new_value: Some(value.clone()),
                });
            }
        }
        for key in known.keys() {
            if !current.contains_key(key) {
                let _ = self.events.send(StorageEvent {
                    key: key.clone(),
                    new_value: None,
                });
            }
        }

        *known = current;
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut HashMap<String, String>)) -> Result<()> {
        let mut known = self.known.lock().unwrap_or_else(PoisonError::into_inner);
        // Read-modify-write must not interleave with other processes.
        let _guard = FileLock::acquire(&self.lock_path, LOCK_TIMEOUT)?;
        let mut map = read_map(&self.path)?;
        apply(&mut map);

        let needed: usize = map.iter().map(|(k, v)| k.len() + v.len()).sum();
        if needed > self.quota {
            return Err(NoteminderError::QuotaExceeded {
                needed,
                max: self.quota,
            });
        }

        write_map(&self.path, &map)?;
        *known = map;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let mut map = read_map(&self.inner.path)?;
        Ok(map.remove(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.inner.update(|map| {
            map.insert(key.to_string(), value.to_string());
        })
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.inner.update(|map| {
            map.remove(key);
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.inner.events.subscribe()
    }
}

fn read_map(path: &Path) -> Result<HashMap<String, String>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };
    if raw.trim().is_empty() {
        return Ok(HashMap::new());
    }
    serde_json::from_str(&raw)
        .map_err(|e| NoteminderError::Storage(format!("{}: {}", path.display(), e)))
}

fn write_map(path: &Path, map: &HashMap<String, String>) -> Result<()> {
    let tmp = path.with_extension(format!(
        "json.tmp.{}.{}",
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::write(&tmp, serde_json::to_vec_pretty(map)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
