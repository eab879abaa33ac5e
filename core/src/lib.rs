//! Dedicated-loop worker for offload.
//!
//! Blocking call sites submit futures to one Tokio current-thread runtime
//! that lives on its own thread, then wait on (or drop) a [`Handle`].
//!
//! ```text
//! caller ─▶ Dispatcher ─▶ Worker ─▶ SchedulerContext ─▶ scheduler thread
//!   ▲                                                         │
//!   └──────────────────── Handle<T> ◀────── completion ───────┘
//! ```
//!
//! The module-level functions ([`run_task`], [`run_tasks`], [`shutdown`],
//! [`get_stats`]) drive one process-wide [`Dispatcher`]. Construct
//! [`Dispatcher::new`] directly for isolated instances.

mod dispatcher;
mod global;
mod handle;
mod scheduler;
mod worker;

pub use dispatcher::{Batch, Dispatcher};
pub use global::{
    ShutdownGuard, Submission, configure, get_stats, global, run_task, run_tasks, shutdown, start,
};
pub use handle::{FailureHook, Handle, HandleStatus};
pub use scheduler::{DrainReport, SchedulerContext};
pub use worker::{Worker, WorkerOptions};

pub use offload_types::{
    BoxError, Lifecycle, NotRunningReason, OffloadError, SchedulerFlavor, Stats, TaskError, TaskId,
};
