use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{NoteminderError, Result};
use crate::notify::Permission;
use crate::storage::DEFAULT_QUOTA_BYTES;
use crate::worker::{UpdateSource, WorkerConfig};

pub const DATA_DIR: &str = ".noteminder";
pub const CONFIG_FILE: &str = "config.json";

/// Runtime configuration.
///
/// Resolved from defaults, then `<data dir>/config.json`, then `NOTEMINDER_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Config {
    /// Origin the offline cache worker fronts.
    pub upstream: String,
    /// Address `serve` listens on.
    pub bind: String,
    pub worker: WorkerConfig,
    /// Activate a newly installed worker version without waiting for a reload.
    pub skip_waiting: bool,
    pub update_interval_secs: u64,
    /// How often `run` polls storage for writes from other processes.
    pub watch_interval_ms: u64,
    pub storage_quota_bytes: usize,
    /// Permission assumed until the user has decided.
    pub permission: Permission,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upstream: "http://127.0.0.1:5173".to_string(),
            bind: "127.0.0.1:8080".to_string(),
            worker: WorkerConfig::default(),
            skip_waiting: true,
            update_interval_secs: 60 * 60,
            watch_interval_ms: 1000,
            storage_quota_bytes: DEFAULT_QUOTA_BYTES,
            permission: Permission::Default,
        }
    }
}

impl Config {
    /// Load the configuration for `data_dir`, applying environment overrides.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let mut config = Self::from_file(data_dir)?;
        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Defaults merged with `<data_dir>/config.json`, if present.
    pub fn from_file(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path)?;
        serde_json::from_str(&raw)
            .map_err(|e| NoteminderError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(upstream) = lookup("NOTEMINDER_UPSTREAM") {
            self.upstream = upstream;
        }
        if let Some(bind) = lookup("NOTEMINDER_BIND") {
            self.bind = bind;
        }
        if let Some(cache_name) = lookup("NOTEMINDER_CACHE_NAME") {
            self.worker.cache_name = cache_name;
        }
        if let Some(permission) = lookup("NOTEMINDER_PERMISSION") {
            self.permission = permission.parse()?;
        }
        if let Some(secs) = lookup("NOTEMINDER_UPDATE_INTERVAL_SECS") {
            self.update_interval_secs = secs.parse().map_err(|_| {
                NoteminderError::Config(format!("invalid NOTEMINDER_UPDATE_INTERVAL_SECS: {}", secs))
            })?;
        }
        Ok(())
    }
}

/// Resolve the data directory: `NOTEMINDER_DIR`, else the nearest ancestor
/// holding a `.noteminder/` directory, else `.noteminder/` in the working directory.
pub fn find_data_dir() -> PathBuf {
    if let Ok(dir) = env::var("NOTEMINDER_DIR") {
        return PathBuf::from(dir);
    }

    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut current = cwd.as_path();
    loop {
        if current.join(DATA_DIR).is_dir() {
            return current.join(DATA_DIR);
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return cwd.join(DATA_DIR),
        }
    }
}

/// Treats the config file as the published worker version.
pub struct ConfigFileSource {
    data_dir: PathBuf,
}

impl ConfigFileSource {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
        }
    }
}

#[async_trait]
impl UpdateSource for ConfigFileSource {
    async fn latest(&self) -> Result<WorkerConfig> {
        Ok(Config::load(&self.data_dir)?.worker)
    }
}
