//! Resolved runtime settings shared across crates.
//!
//! Raw TOML structs (with `Option` fields) stay private in `offload-config`.
//! The config loader resolves them into these types at the parse boundary.

use std::time::Duration;

use serde::Serialize;

pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_THREAD_NAME: &str = "offload-scheduler";

/// Which tuning the scheduler runtime is built with.
///
/// Both flavors run every task on the single scheduler thread and behave
/// identically from a caller's point of view. `Throughput` polls the I/O and
/// timer drivers less often per tick, lowering per-task scheduling overhead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerFlavor {
    #[default]
    CurrentThread,
    Throughput,
}

impl SchedulerFlavor {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CurrentThread => "current_thread",
            Self::Throughput => "throughput",
        }
    }

    /// Parse the user-facing spelling (case-insensitive, `-` or `_`).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "current_thread" | "default" => Some(Self::CurrentThread),
            "throughput" | "fast" => Some(Self::Throughput),
            _ => None,
        }
    }
}

/// Fully-resolved worker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub flavor: SchedulerFlavor,
    pub thread_name: String,
    /// Used by `shutdown(None)`.
    pub drain_timeout: Duration,
    /// Whether the global dispatcher registers a process-exit shutdown.
    pub register_exit_hook: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            flavor: SchedulerFlavor::default(),
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            register_exit_hook: true,
        }
    }
}
