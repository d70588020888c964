use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::fetch::{FetchRequest, FetchResponse, Fetcher};
use crate::error::{NoteminderError, Result};

const INDEX_FILE: &str = "index.json";

/// On-disk form of a cached response; the body is base64.
#[derive(Serialize, Deserialize)]
struct StoredResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl From<&FetchResponse> for StoredResponse {
    fn from(response: &FetchResponse) -> Self {
        Self {
            status: response.status,
            headers: response.headers.clone(),
            body: STANDARD.encode(&response.body),
        }
    }
}

impl TryFrom<StoredResponse> for FetchResponse {
    type Error = base64::DecodeError;

    fn try_from(stored: StoredResponse) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            status: stored.status,
            headers: stored.headers,
            body: STANDARD.decode(stored.body)?.into(),
        })
    }
}

/// One named cache: request URL → stored response.
#[derive(Clone, Default)]
pub struct Cache {
    entries: Arc<RwLock<HashMap<String, FetchResponse>>>,
    /// Backing file for caches that outlive the process.
    file: Option<Arc<PathBuf>>,
}

impl Cache {
    fn on_disk(file: PathBuf) -> Self {
        let entries = match fs::read_to_string(&file) {
            Ok(raw) => decode_entries(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %file.display(), error = %e, "dropping unreadable cache file");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Self {
            entries: Arc::new(RwLock::new(entries)),
            file: Some(Arc::new(file)),
        }
    }

    fn save(&self, entries: &HashMap<String, FetchResponse>) {
        let Some(file) = &self.file else {
            return;
        };
        let stored: HashMap<&str, StoredResponse> = entries
            .iter()
            .map(|(url, response)| (url.as_str(), StoredResponse::from(response)))
            .collect();
        if let Err(e) = write_json(file, &stored) {
            tracing::error!(path = %file.display(), error = %e, "failed to save cache");
        }
    }

    pub fn put(&self, url: &str, response: FetchResponse) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(url.to_string(), response);
        self.save(&entries);
    }

    pub fn match_url(&self, url: &str) -> Option<FetchResponse> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
    }

    pub fn delete(&self, url: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let removed = entries.remove(url).is_some();
        if removed {
            self.save(&entries);
        }
        removed
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch every URL and store them all, or store nothing.
    ///
    /// A network failure or a non-2xx status for any URL fails the whole batch.
    pub async fn add_all(&self, fetcher: &dyn Fetcher, urls: &[String]) -> Result<()> {
        let mut fetched = Vec::with_capacity(urls.len());
        for url in urls {
            let response = fetcher.fetch(&FetchRequest::get(url.as_str())).await?;
            if !response.is_success() {
                return Err(NoteminderError::Fetch {
                    url: url.clone(),
                    message: format!("unexpected status {}", response.status),
                });
            }
            fetched.push((url.clone(), response));
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.extend(fetched);
        self.save(&entries);
        Ok(())
    }
}

/// All named caches of one origin, in creation order.
///
/// Storage made with [`CacheStorage::persistent`] keeps every cache in a
/// directory and reloads it on the next start.
#[derive(Clone, Default)]
pub struct CacheStorage {
    caches: Arc<RwLock<Vec<(String, Cache)>>>,
    dir: Option<Arc<PathBuf>>,
}

impl CacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage kept under `dir`, loading the caches a previous run left there.
    pub fn persistent(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let names: Vec<String> = match fs::read_to_string(dir.join(INDEX_FILE)) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(dir = %dir.display(), error = %e, "cache index unreadable, starting empty");
                Vec::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let caches = names
            .into_iter()
            .map(|name| {
                let cache = Cache::on_disk(dir.join(cache_file_name(&name)));
                (name, cache)
            })
            .collect();
        tracing::debug!(dir = %dir.display(), "cache storage loaded");

        Ok(Self {
            caches: Arc::new(RwLock::new(caches)),
            dir: Some(Arc::new(dir.to_path_buf())),
        })
    }

    fn save_index(&self, caches: &[(String, Cache)]) {
        let Some(dir) = &self.dir else {
            return;
        };
        let names: Vec<&str> = caches.iter().map(|(n, _)| n.as_str()).collect();
        if let Err(e) = write_json(&dir.join(INDEX_FILE), &names) {
            tracing::error!(dir = %dir.display(), error = %e, "failed to save cache index");
        }
    }

    /// The cache called `name`, created empty if it does not exist.
    pub fn open(&self, name: &str) -> Cache {
        let mut caches = self.caches.write().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, cache)) = caches.iter().find(|(n, _)| n == name) {
            return cache.clone();
        }
        let cache = match &self.dir {
            Some(dir) => {
                let file = dir.join(cache_file_name(name));
                let _ = fs::remove_file(&file);
                Cache::on_disk(file)
            }
            None => Cache::default(),
        };
        caches.push((name.to_string(), cache.clone()));
        self.save_index(&caches);
        cache
    }

    pub fn has(&self, name: &str) -> bool {
        self.caches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|(n, _)| n == name)
    }

    pub fn delete(&self, name: &str) -> bool {
        let mut caches = self.caches.write().unwrap_or_else(PoisonError::into_inner);
        let before = caches.len();
        caches.retain(|(n, _)| n != name);
        let removed = caches.len() != before;
        if removed {
            if let Some(dir) = &self.dir {
                let _ = fs::remove_file(dir.join(cache_file_name(name)));
            }
            self.save_index(&caches);
        }
        removed
    }

    pub fn keys(&self) -> Vec<String> {
        self.caches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// First stored response for `request` across every cache.
    pub fn match_request(&self, request: &FetchRequest) -> Option<FetchResponse> {
        let url = request.cache_key()?;
        self.caches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find_map(|(_, cache)| cache.match_url(url))
    }
}

fn cache_file_name(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect();
    format!("cache-{}.json", safe)
}

fn decode_entries(raw: &str) -> std::result::Result<HashMap<String, FetchResponse>, String> {
    let stored: HashMap<String, StoredResponse> =
        serde_json::from_str(raw).map_err(|e| e.to_string())?;
    stored
        .into_iter()
        .map(|(url, response)| {
            FetchResponse::try_from(response)
                .map(|response| (url, response))
                .map_err(|e| e.to_string())
        })
        .collect()
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::testing::StubFetcher;

    #[test]
    fn test_open_reuses_existing_cache() {
        let storage = CacheStorage::new();
        storage.open("v1").put("/", FetchResponse::new(200, "text/html", "home"));
        assert_eq!(storage.open("v1").len(), 1);
        assert_eq!(storage.keys(), vec!["v1".to_string()]);
    }

    #[test]
    fn test_delete_and_has() {
        let storage = CacheStorage::new();
        storage.open("v1");
        storage.open("v2");
        assert!(storage.delete("v1"));
        assert!(!storage.delete("v1"));
        assert!(!storage.has("v1"));
        assert!(storage.has("v2"));
    }

    #[test]
    fn test_match_request_searches_in_creation_order() {
        let storage = CacheStorage::new();
        storage.open("old").put("/a", FetchResponse::new(200, "text/plain", "old"));
        storage.open("new").put("/a", FetchResponse::new(200, "text/plain", "new"));
        storage.open("new").put("/b", FetchResponse::new(200, "text/plain", "b"));

        let hit = storage.match_request(&FetchRequest::get("/a")).unwrap();
        assert_eq!(hit.body, "old".as_bytes());
        assert!(storage.match_request(&FetchRequest::get("/b")).is_some());
        assert!(storage.match_request(&FetchRequest::get("/c")).is_none());
    }

    #[test]
    fn test_persistent_storage_survives_restart() {
        let tmp = tempfile::TempDir::new().unwrap();
        {
            let storage = CacheStorage::persistent(tmp.path()).unwrap();
            storage.open("old").put("/gone", FetchResponse::new(200, "text/plain", "x"));
            storage
                .open("v1")
                .put("/index.html", FetchResponse::new(200, "text/html", vec![0u8, 159, 146, 150]));
            assert!(storage.delete("old"));
        }

        let reloaded = CacheStorage::persistent(tmp.path()).unwrap();
        assert_eq!(reloaded.keys(), vec!["v1".to_string()]);
        let hit = reloaded.match_request(&FetchRequest::get("/index.html")).unwrap();
        assert_eq!(hit.status, 200);
        assert_eq!(hit.header("content-type"), Some("text/html"));
        assert_eq!(hit.body.as_ref(), &[0u8, 159, 146, 150]);
        assert!(reloaded.match_request(&FetchRequest::get("/gone")).is_none());
    }

    #[test]
    fn test_corrupt_cache_file_loads_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::write(tmp.path().join(INDEX_FILE), r#"["v1"]"#).unwrap();
        fs::write(tmp.path().join(cache_file_name("v1")), "{broken").unwrap();

        let storage = CacheStorage::persistent(tmp.path()).unwrap();
        assert!(storage.has("v1"));
        assert!(storage.open("v1").is_empty());
    }

    #[tokio::test]
    async fn test_add_all_stores_everything() {
        let fetcher = StubFetcher::with_pages(&["/", "/app.js"]);
        let cache = Cache::default();
        cache
            .add_all(&fetcher, &["/".to_string(), "/app.js".to_string()])
            .await
            .unwrap();
        assert_eq!(cache.keys(), vec!["/".to_string(), "/app.js".to_string()]);
    }

    #[tokio::test]
    async fn test_add_all_is_all_or_nothing() {
        let fetcher = StubFetcher::with_pages(&["/"]);
        let cache = Cache::default();
        let result = cache
            .add_all(&fetcher, &["/".to_string(), "/missing.png".to_string()])
            .await;
        assert!(result.is_err());
        assert!(cache.is_empty());
    }
}
