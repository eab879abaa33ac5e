//! Core domain types for offload.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies: the error taxonomy, the worker lifecycle state machine,
//! resolved settings and the stats snapshot.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod error;
mod ids;
mod lifecycle;
mod settings;
mod stats;

pub use error::{BoxError, NotRunningReason, OffloadError, TaskError};
pub use ids::{TaskId, TaskIdAllocator};
pub use lifecycle::{Lifecycle, LifecycleTransitionError};
pub use settings::{DEFAULT_DRAIN_TIMEOUT, DEFAULT_THREAD_NAME, RuntimeSettings, SchedulerFlavor};
pub use stats::Stats;
