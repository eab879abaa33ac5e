//! Worker lifecycle state machine.
//!
//! ```text
//! Uninitialized -> Starting -> Running -> Draining -> Stopped
//!       ^             |           |
//!       +-------------+           +-> Failed
//! ```
//!
//! `Starting -> Uninitialized` is a failed start and may be retried.
//! `Stopped` and `Failed` are terminal: a fresh worker is required.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::error::NotRunningReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    #[default]
    Uninitialized,
    Starting,
    Running,
    Draining,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid lifecycle transition from {from} to {to}")]
pub struct LifecycleTransitionError {
    pub from: Lifecycle,
    pub to: Lifecycle,
}

impl Lifecycle {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Uninitialized, Self::Starting | Self::Stopped)
                | (Self::Starting, Self::Running | Self::Uninitialized)
                | (Self::Running, Self::Draining | Self::Failed)
                | (Self::Draining, Self::Stopped)
        )
    }

    /// Move to `next`, rejecting edges the state machine does not have.
    pub fn transition(&mut self, next: Self) -> Result<(), LifecycleTransitionError> {
        if !self.can_transition_to(next) {
            return Err(LifecycleTransitionError {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }

    /// The reason a submission is refused in this state, if it is.
    ///
    /// `Uninitialized` and `Starting` admit work: submissions auto-start.
    #[must_use]
    pub const fn refusal(self) -> Option<NotRunningReason> {
        match self {
            Self::Uninitialized | Self::Starting | Self::Running => None,
            Self::Draining => Some(NotRunningReason::Draining),
            Self::Stopped => Some(NotRunningReason::Stopped),
            Self::Failed => Some(NotRunningReason::Crashed),
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
