//! Error taxonomy for the offload worker.
//!
//! Every failure a caller can observe is an [`OffloadError`]. Failures raised
//! by the submitted task itself are wrapped in [`TaskError`] so the original
//! error stays reachable through `source()` and [`TaskError::downcast_ref`].

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Boxed error type accepted from task bodies.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Why a submission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotRunningReason {
    /// `shutdown()` has completed.
    Stopped,
    /// `shutdown()` is in progress; no new work is admitted.
    Draining,
    /// The scheduler thread exited without being asked to.
    Crashed,
}

impl NotRunningReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Draining => "draining",
            Self::Crashed => "crashed",
        }
    }
}

impl fmt::Display for NotRunningReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure raised inside a submitted task.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task returned `Err`.
    #[error("task failed: {0}")]
    Failed(#[source] BoxError),
    /// The task panicked. Holds the panic payload when it was a string.
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn failed(err: impl Into<BoxError>) -> Self {
        Self::Failed(err.into())
    }

    /// Build a `Panicked` variant from a `catch_unwind` payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::Panicked(message)
    }

    #[must_use]
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }

    /// Borrow the task's original error as a concrete type.
    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Self::Failed(err) => err.downcast_ref::<E>(),
            Self::Panicked(_) => None,
        }
    }

    /// Recover the task's original boxed error.
    pub fn into_inner(self) -> Option<BoxError> {
        match self {
            Self::Failed(err) => Some(err),
            Self::Panicked(_) => None,
        }
    }
}

/// Every error surfaced by the worker, the dispatcher and handles.
#[derive(Debug, Error)]
pub enum OffloadError {
    /// The scheduler thread or its runtime could not be initialised.
    /// The start attempt may be retried.
    #[error("failed to start scheduler: {reason}")]
    Startup {
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },
    #[error("worker is not running ({0})")]
    NotRunning(NotRunningReason),
    /// The blocking wait gave up. The task was asked to cancel.
    #[error("task timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error("task was cancelled")]
    Cancelled,
    /// A blocking wait was attempted on the scheduler thread itself.
    #[error("blocking wait on the scheduler thread would deadlock")]
    WouldDeadlock,
}

impl OffloadError {
    pub fn startup(reason: impl Into<String>) -> Self {
        Self::Startup {
            reason: reason.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    #[must_use]
    pub fn as_task_error(&self) -> Option<&TaskError> {
        match self {
            Self::Task(err) => Some(err),
            _ => None,
        }
    }
}
