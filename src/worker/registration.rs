use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{OfflineWorker, WorkerConfig, WorkerContext, WorkerState};
use crate::error::Result;

/// Well-known path the worker is registered under.
pub const WORKER_PATH: &str = "/sw.js";

pub const UPDATE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Where newer worker versions come from.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn latest(&self) -> Result<WorkerConfig>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    UpToDate,
    /// A new version is installed and waits for a reload.
    Waiting { cache_name: String },
    /// A new version took over; `removed` lists the caches it deleted.
    Activated {
        cache_name: String,
        removed: Vec<String>,
    },
    Failed,
}

/// The worker registration for one origin: the active version plus, at most,
/// one installed version waiting to take over.
pub struct Registration {
    ctx: WorkerContext,
    activate_immediately: bool,
    active: RwLock<Arc<OfflineWorker>>,
    waiting: RwLock<Option<Arc<OfflineWorker>>>,
}

impl Registration {
    /// Install and activate the first worker version.
    pub async fn register(
        config: WorkerConfig,
        ctx: WorkerContext,
        skip_waiting: bool,
    ) -> Result<Self> {
        let worker = OfflineWorker::new(config, ctx.clone());
        worker.install().await?;
        Ok(Self::build(ctx, skip_waiting, worker))
    }

    /// Like [`Registration::register`], but a failed install is logged instead
    /// of returned. Until an install succeeds, requests go straight to the
    /// network (with the offline fallback) and every update check retries.
    pub async fn start(config: WorkerConfig, ctx: WorkerContext, skip_waiting: bool) -> Self {
        let worker = OfflineWorker::new(config, ctx.clone());
        if let Err(e) = worker.install().await {
            tracing::warn!(path = WORKER_PATH, error = %e, "worker registration failed, serving without offline cache");
        }
        Self::build(ctx, skip_waiting, worker)
    }

    fn build(ctx: WorkerContext, skip_waiting: bool, worker: OfflineWorker) -> Self {
        if worker.state() == WorkerState::Installed {
            worker.activate();
            tracing::info!(path = WORKER_PATH, cache = worker.cache_name(), "worker registered");
        }

        Self {
            ctx,
            activate_immediately: skip_waiting,
            active: RwLock::new(Arc::new(worker)),
            waiting: RwLock::new(None),
        }
    }

    /// Whether an installed version controls the origin.
    pub fn is_installed(&self) -> bool {
        self.active().state() == WorkerState::Activated
    }

    pub fn active(&self) -> Arc<OfflineWorker> {
        Arc::clone(&self.active.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn waiting(&self) -> Option<Arc<OfflineWorker>> {
        self.waiting
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Check `source` for a new version and install it if there is one.
    pub async fn update(&self, source: &dyn UpdateSource) -> UpdateEvent {
        let latest = match source.latest().await {
            Ok(latest) => latest,
            Err(e) => {
                tracing::warn!(error = %e, "worker update check failed");
                return UpdateEvent::Failed;
            }
        };

        let known = self
            .waiting()
            .map(|w| w.config().clone())
            .unwrap_or_else(|| self.active().config().clone());
        let installed = self.is_installed();
        if latest == known && installed {
            return UpdateEvent::UpToDate;
        }

        let candidate = OfflineWorker::new(latest, self.ctx.clone());
        if candidate.install().await.is_err() {
            return UpdateEvent::Failed;
        }
        let cache_name = candidate.cache_name().to_string();

        if !installed {
            // Nothing controls the origin yet, so there is nobody to wait for.
            let removed = candidate.activate();
            tracing::info!(path = WORKER_PATH, cache = %cache_name, "worker registered on retry");
            *self.active.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(candidate);
            return UpdateEvent::Activated {
                cache_name,
                removed,
            };
        }
        tracing::info!(cache = %cache_name, "new version available, reload to update");

        *self.waiting.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(candidate));
        if self.activate_immediately {
            return self.skip_waiting().unwrap_or(UpdateEvent::Failed);
        }
        UpdateEvent::Waiting { cache_name }
    }

    /// Promote the waiting version, if any.
    pub fn skip_waiting(&self) -> Option<UpdateEvent> {
        let next = self
            .waiting
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        let removed = next.activate();
        let cache_name = next.cache_name().to_string();
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = next;

        Some(UpdateEvent::Activated {
            cache_name,
            removed,
        })
    }

    /// Check for updates every `interval` until `shutdown` is cancelled.
    pub fn poll_updates(
        self: Arc<Self>,
        source: Arc<dyn UpdateSource>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let event = self.update(source.as_ref()).await;
                tracing::debug!(?event, "worker update check finished");
            }
        })
    }
}
