//! Configuration loading for offload.
//!
//! The config file lives at `~/.offload/config.toml`. Every section and key
//! is optional; missing values fall back to [`RuntimeSettings::default`].
//!
//! ```toml
//! [scheduler]
//! flavor = "throughput"          # or "current_thread"
//! thread_name = "offload-scheduler"
//!
//! [shutdown]
//! drain_timeout_ms = 5000
//! register_exit_hook = true
//! ```
//!
//! `OFFLOAD_SCHEDULER` and `OFFLOAD_DRAIN_TIMEOUT_MS` override the file.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use offload_types::{RuntimeSettings, SchedulerFlavor};

pub const ENV_SCHEDULER: &str = "OFFLOAD_SCHEDULER";
pub const ENV_DRAIN_TIMEOUT_MS: &str = "OFFLOAD_DRAIN_TIMEOUT_MS";

#[derive(Debug, Default, Deserialize)]
pub struct OffloadConfig {
    pub scheduler: Option<SchedulerConfig>,
    pub shutdown: Option<ShutdownConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SchedulerConfig {
    /// Scheduler tuning. Unknown values are logged and ignored.
    pub flavor: Option<String>,
    /// Name given to the scheduler thread.
    pub thread_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ShutdownConfig {
    /// Default drain deadline for `shutdown(None)`, in milliseconds.
    pub drain_timeout_ms: Option<u64>,
    /// Register a process-exit shutdown for the global dispatcher. Default: true.
    pub register_exit_hook: Option<bool>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".offload").join("config.toml"))
}

impl OffloadConfig {
    /// Load the user config. `Ok(None)` when there is no config file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let path = match config_path() {
            Some(path) => path,
            None => return Ok(None),
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Resolve against the process environment.
    #[must_use]
    pub fn resolve(&self) -> RuntimeSettings {
        self.resolve_with_env(|key| env::var(key).ok())
    }

    /// Resolve with an explicit environment lookup.
    pub fn resolve_with_env(&self, lookup: impl Fn(&str) -> Option<String>) -> RuntimeSettings {
        let mut settings = RuntimeSettings::default();

        if let Some(scheduler) = &self.scheduler {
            if let Some(raw) = scheduler.flavor.as_deref() {
                apply_flavor(&mut settings, raw, "config");
            }
            if let Some(name) = scheduler.thread_name.as_deref()
                && !name.trim().is_empty()
            {
                settings.thread_name = name.trim().to_string();
            }
        }

        if let Some(shutdown) = &self.shutdown {
            if let Some(ms) = shutdown.drain_timeout_ms {
                settings.drain_timeout = Duration::from_millis(ms);
            }
            if let Some(register) = shutdown.register_exit_hook {
                settings.register_exit_hook = register;
            }
        }

        if let Some(raw) = lookup(ENV_SCHEDULER) {
            apply_flavor(&mut settings, &raw, ENV_SCHEDULER);
        }
        if let Some(raw) = lookup(ENV_DRAIN_TIMEOUT_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => settings.drain_timeout = Duration::from_millis(ms),
                Err(_) => tracing::warn!("Ignoring invalid {ENV_DRAIN_TIMEOUT_MS}: {raw}"),
            }
        }

        settings
    }
}

fn apply_flavor(settings: &mut RuntimeSettings, raw: &str, origin: &str) {
    match SchedulerFlavor::parse(raw) {
        Some(flavor) => settings.flavor = flavor,
        None => tracing::warn!("Unknown scheduler flavor in {origin}: {raw}"),
    }
}
