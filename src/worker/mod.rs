//! Offline cache worker.
//!
//! A background worker that sits between the application and the network:
//! it precaches the app shell on install, drops stale caches on activate,
//! answers fetches network-first with a cache fallback, and displays
//! background messages as notifications.

mod cache;
mod clients;
mod fetch;
pub mod http;
mod push;
mod registration;
#[cfg(test)]
pub(crate) mod testing;

pub use cache::{Cache, CacheStorage};
pub use clients::{ClickOutcome, ClientRegistry, ClientWindow};
pub use fetch::{FetchRequest, FetchResponse, Fetcher, HttpFetcher, OFFLINE_BODY, OFFLINE_STATUS};
pub use push::{PushPayload, DEFAULT_PUSH_BODY, DEFAULT_PUSH_TAG};
pub use registration::{Registration, UpdateEvent, UpdateSource, UPDATE_INTERVAL, WORKER_PATH};

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{NoteminderError, Result};
use crate::notify::{Notification, Notifier};

pub const DEFAULT_CACHE_NAME: &str = "notes-app-v1";

/// Core assets cached at install time.
pub const DEFAULT_PRECACHE: [&str; 5] = [
    "/",
    "/index.html",
    "/manifest.json",
    "/icon-192.png",
    "/icon-512.png",
];

/// Identity of one worker version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub cache_name: String,
    pub precache: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            precache: DEFAULT_PRECACHE.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Origin-wide resources every worker version shares.
#[derive(Clone)]
pub struct WorkerContext {
    pub caches: CacheStorage,
    pub clients: ClientRegistry,
    pub fetcher: Arc<dyn Fetcher>,
    pub notifier: Arc<dyn Notifier>,
}

impl WorkerContext {
    pub fn new(fetcher: Arc<dyn Fetcher>, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_caches(CacheStorage::new(), fetcher, notifier)
    }

    pub fn with_caches(
        caches: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            caches,
            clients: ClientRegistry::new(),
            fetcher,
            notifier,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

pub struct OfflineWorker {
    config: WorkerConfig,
    ctx: WorkerContext,
    state: RwLock<WorkerState>,
}

impl OfflineWorker {
    pub fn new(config: WorkerConfig, ctx: WorkerContext) -> Self {
        Self {
            config,
            ctx,
            state: RwLock::new(WorkerState::Parsed),
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.config.cache_name
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Precache the manifest into this version's cache.
    pub async fn install(&self) -> Result<()> {
        self.set_state(WorkerState::Installing);
        let existed = self.ctx.caches.has(&self.config.cache_name);
        let cache = self.ctx.caches.open(&self.config.cache_name);

        match cache.add_all(self.ctx.fetcher.as_ref(), &self.config.precache).await {
            Ok(()) => {
                tracing::info!(cache = %self.config.cache_name, assets = self.config.precache.len(), "worker installed");
                self.set_state(WorkerState::Installed);
                Ok(())
            }
            Err(e) => {
                tracing::error!(cache = %self.config.cache_name, error = %e, "failed to precache assets");
                if !existed {
                    self.ctx.caches.delete(&self.config.cache_name);
                }
                self.set_state(WorkerState::Redundant);
                Err(NoteminderError::Install(e.to_string()))
            }
        }
    }

    /// Delete caches from other versions and take control of open windows.
    /// Returns the names of the deleted caches.
    pub fn activate(&self) -> Vec<String> {
        self.set_state(WorkerState::Activating);

        let stale: Vec<String> = self
            .ctx
            .caches
            .keys()
            .into_iter()
            .filter(|name| *name != self.config.cache_name)
            .collect();
        for name in &stale {
            tracing::info!(cache = %name, "deleting old cache");
            self.ctx.caches.delete(name);
        }

        let claimed = self.ctx.clients.claim();
        tracing::info!(cache = %self.config.cache_name, claimed, "worker activated");
        self.set_state(WorkerState::Activated);
        stale
    }

    /// Network first; fall back to the cache, then to an offline response.
    pub async fn handle_fetch(&self, request: FetchRequest) -> FetchResponse {
        match self.ctx.fetcher.fetch(&request).await {
            Ok(response) => {
                let caching = self.state() != WorkerState::Redundant;
                if let Some(url) = request.cache_key().filter(|_| caching) {
                    let cache = self.ctx.caches.open(&self.config.cache_name);
                    let url = url.to_string();
                    let copy = response.clone();
                    tokio::spawn(async move { cache.put(&url, copy) });
                }
                response
            }
            Err(e) => {
                tracing::debug!(url = %request.url, error = %e, "network failed, trying cache");
                self.ctx.caches.match_request(&request).unwrap_or_else(|| {
                    tracing::warn!(url = %request.url, "offline and not cached");
                    FetchResponse::offline()
                })
            }
        }
    }

    /// Display a background message.
    pub fn handle_push(&self, data: Option<&[u8]>) -> Notification {
        let notification = PushPayload::parse(data).into_notification();
        self.ctx.notifier.show(notification.clone());
        notification
    }

    /// Bring the app to the front after a notification click.
    pub fn handle_notification_click(&self, tag: Option<&str>) -> ClickOutcome {
        let outcome = self.ctx.clients.focus_or_open("/");
        tracing::debug!(tag = ?tag, ?outcome, "notification clicked");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ChannelNotifier;
    use crate::worker::testing::StubFetcher;
    use std::time::Duration;

    fn worker(fetcher: Arc<StubFetcher>, cache_name: &str) -> (OfflineWorker, WorkerContext) {
        let (notifier, _rx) = ChannelNotifier::new();
        let ctx = WorkerContext::new(fetcher, Arc::new(notifier));
        let config = WorkerConfig {
            cache_name: cache_name.to_string(),
            ..WorkerConfig::default()
        };
        (OfflineWorker::new(config, ctx.clone()), ctx)
    }

    fn shell() -> Arc<StubFetcher> {
        Arc::new(StubFetcher::with_pages(&DEFAULT_PRECACHE))
    }

    async fn wait_for_cached(cache: &Cache, url: &str) -> FetchResponse {
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Some(hit) = cache.match_url(url) {
                    return hit;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_install_precaches_manifest() {
        let (worker, ctx) = worker(shell(), "v1");
        worker.install().await.unwrap();

        assert_eq!(worker.state(), WorkerState::Installed);
        assert_eq!(ctx.caches.open("v1").len(), DEFAULT_PRECACHE.len());
    }

    #[tokio::test]
    async fn test_install_fails_when_an_asset_is_missing() {
        let fetcher = Arc::new(StubFetcher::with_pages(&["/", "/index.html"]));
        let (worker, ctx) = worker(fetcher, "v1");

        let err = worker.install().await.unwrap_err();
        assert!(matches!(err, NoteminderError::Install(_)));
        assert_eq!(worker.state(), WorkerState::Redundant);
        assert!(!ctx.caches.has("v1"));
    }

    #[tokio::test]
    async fn test_activate_removes_other_caches() {
        let (worker, ctx) = worker(shell(), "v2");
        ctx.caches.open("v1");
        ctx.caches.open("something-else");
        worker.install().await.unwrap();
        ctx.clients.connect("/");

        let mut removed = worker.activate();
        removed.sort();
        assert_eq!(removed, vec!["something-else".to_string(), "v1".to_string()]);
        assert_eq!(ctx.caches.keys(), vec!["v2".to_string()]);
        assert_eq!(worker.state(), WorkerState::Activated);
        assert!(ctx.clients.list().iter().all(|w| w.controlled));
    }

    #[tokio::test]
    async fn test_fetch_online_returns_live_and_updates_cache() {
        let fetcher = shell();
        let (worker, ctx) = worker(fetcher.clone(), "v1");
        fetcher.set_page("/notes.json", "fresh");

        let response = worker.handle_fetch(FetchRequest::get("/notes.json")).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "fresh".as_bytes());

        let cached = wait_for_cached(&ctx.caches.open("v1"), "/notes.json").await;
        assert_eq!(cached, response);
    }

    #[tokio::test]
    async fn test_fetch_offline_serves_cached_copy() {
        let fetcher = shell();
        let (worker, ctx) = worker(fetcher.clone(), "v1");
        worker.install().await.unwrap();

        fetcher.set_online(false);
        let response = worker.handle_fetch(FetchRequest::get("/index.html")).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "live /index.html".as_bytes());
        assert_eq!(ctx.caches.keys(), vec!["v1".to_string()]);
    }

    #[tokio::test]
    async fn test_fetch_offline_uncached_is_unavailable() {
        let fetcher = shell();
        let (worker, _ctx) = worker(fetcher.clone(), "v1");
        fetcher.set_online(false);

        let response = worker.handle_fetch(FetchRequest::get("/never-seen")).await;
        assert_eq!(response.status, OFFLINE_STATUS);
        assert!(response.is_offline());
    }

    #[tokio::test]
    async fn test_non_get_is_not_cached() {
        let fetcher = shell();
        let (worker, ctx) = worker(fetcher.clone(), "v1");
        fetcher.set_page("/api", "ok");

        let post = FetchRequest {
            method: "POST".into(),
            ..FetchRequest::get("/api")
        };
        assert_eq!(worker.handle_fetch(post.clone()).await.status, 200);
        tokio::task::yield_now().await;
        assert!(ctx.caches.open("v1").match_url("/api").is_none());

        fetcher.set_online(false);
        assert!(worker.handle_fetch(post).await.is_offline());
    }

    #[tokio::test]
    async fn test_push_shows_notification() {
        let (notifier, mut rx) = ChannelNotifier::new();
        let ctx = WorkerContext::new(shell(), Arc::new(notifier));
        let worker = OfflineWorker::new(WorkerConfig::default(), ctx);

        let shown = worker.handle_push(Some(br#"{"title":"Hi"}"#));
        assert_eq!(shown.title, "Hi");
        assert_eq!(shown.tag, DEFAULT_PUSH_TAG);
        assert_eq!(rx.recv().await.unwrap(), shown);
    }

    #[tokio::test]
    async fn test_notification_click_focuses_or_opens() {
        let (worker, ctx) = worker(shell(), "v1");
        let ClickOutcome::Opened(opened) = worker.handle_notification_click(Some("n1")) else {
            panic!("expected a window to be opened");
        };
        assert_eq!(
            worker.handle_notification_click(Some("n1")),
            ClickOutcome::Focused(opened)
        );
        assert_eq!(ctx.clients.list().len(), 1);
    }
}
