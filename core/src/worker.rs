//! Worker: owns one [`SchedulerContext`] and turns "run this task" into
//! cross-thread scheduling calls.
//!
//! The lifecycle lives in a single mutex. Submissions, starts and the first
//! half of a shutdown all serialise on it; the drain itself runs with the
//! lock released so tasks on the scheduler thread can still observe the
//! worker (and be refused) without deadlocking.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use offload_config::OffloadConfig;
use offload_types::{
    BoxError, Lifecycle, NotRunningReason, OffloadError, RuntimeSettings, SchedulerFlavor, Stats,
    TaskId, TaskIdAllocator,
};

use crate::handle::{FailureHook, Handle, HandleParts, bind, lock, pair};
use crate::scheduler::{DrainReport, SchedulerContext};

/// Construction options for a [`Worker`] or [`crate::Dispatcher`].
#[derive(Clone, Default)]
pub struct WorkerOptions {
    pub settings: RuntimeSettings,
    pub on_unobserved_failure: Option<FailureHook>,
}

impl WorkerOptions {
    #[must_use]
    pub fn from_settings(settings: RuntimeSettings) -> Self {
        Self {
            settings,
            on_unobserved_failure: None,
        }
    }

    /// Resolve file values and environment overrides into options.
    #[must_use]
    pub fn from_config(config: &OffloadConfig) -> Self {
        Self::from_settings(config.resolve())
    }

    #[must_use]
    pub fn with_flavor(mut self, flavor: SchedulerFlavor) -> Self {
        self.settings.flavor = flavor;
        self
    }

    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.settings.thread_name = name.into();
        self
    }

    #[must_use]
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.settings.drain_timeout = drain_timeout;
        self
    }

    #[must_use]
    pub fn with_exit_hook(mut self, register: bool) -> Self {
        self.settings.register_exit_hook = register;
        self
    }

    /// Called with the task id and error whenever a failed task's handle is
    /// dropped without the failure being retrieved.
    #[must_use]
    pub fn on_unobserved_failure(
        mut self,
        hook: impl Fn(TaskId, &OffloadError) + Send + Sync + 'static,
    ) -> Self {
        self.on_unobserved_failure = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for WorkerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerOptions")
            .field("settings", &self.settings)
            .field(
                "on_unobserved_failure",
                &self.on_unobserved_failure.as_ref().map(|_| "<hook>"),
            )
            .finish()
    }
}

pub struct Worker {
    context: SchedulerContext,
    lifecycle: Mutex<Lifecycle>,
    pending: Arc<AtomicUsize>,
    ids: TaskIdAllocator,
    drain_timeout: Duration,
    on_unobserved_failure: Option<FailureHook>,
}

impl Worker {
    #[must_use]
    pub fn new(options: WorkerOptions) -> Self {
        let WorkerOptions {
            settings,
            on_unobserved_failure,
        } = options;
        Self {
            context: SchedulerContext::new(settings.flavor, settings.thread_name),
            lifecycle: Mutex::new(Lifecycle::Uninitialized),
            pending: Arc::new(AtomicUsize::new(0)),
            ids: TaskIdAllocator::new(),
            drain_timeout: settings.drain_timeout,
            on_unobserved_failure,
        }
    }

    /// Start the scheduler thread. Idempotent while running.
    ///
    /// A failed start leaves the worker `Uninitialized`, so it may be retried.
    pub fn start(&self) -> Result<(), OffloadError> {
        let mut lifecycle = lock(&self.lifecycle);
        self.ensure_started(&mut lifecycle)
    }

    fn ensure_started(&self, lifecycle: &mut Lifecycle) -> Result<(), OffloadError> {
        match *lifecycle {
            Lifecycle::Running => return Ok(()),
            Lifecycle::Uninitialized => {}
            other => {
                let reason = other.refusal().unwrap_or(NotRunningReason::Stopped);
                return Err(OffloadError::NotRunning(reason));
            }
        }

        advance(lifecycle, Lifecycle::Starting);
        match self.context.start() {
            Ok(()) => {
                advance(lifecycle, Lifecycle::Running);
                Ok(())
            }
            Err(err) => {
                tracing::error!("Failed to start scheduler: {err}");
                advance(lifecycle, Lifecycle::Uninitialized);
                Err(err)
            }
        }
    }

    /// Submit `task` without waiting. Starts the worker on first use.
    ///
    /// Never fails synchronously: a refused submission yields a handle that
    /// is already `Failed` with the reason.
    pub fn submit_async<F, T, E>(&self, task: F) -> Handle<T>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let id = self.ids.next_id();
        let mut lifecycle = lock(&self.lifecycle);

        if let Err(err) = self.ensure_started(&mut lifecycle) {
            tracing::debug!(task_id = %id, "Submission refused: {err}");
            return Handle::rejected(id, err, self.on_unobserved_failure.clone());
        }

        let (handle, completer) = pair(
            HandleParts {
                id,
                scheduler_thread: self.context.thread_id(),
                on_unobserved_failure: self.on_unobserved_failure.clone(),
            },
            Arc::clone(&self.pending),
        );

        match self.context.spawn(bind(task, completer)) {
            Ok(()) => {
                tracing::debug!(task_id = %id, "Task submitted");
            }
            Err(rejected) => {
                // Settle the handle before the job (and its completer) drops,
                // otherwise it would read as cancelled.
                handle.fail_if_pending(OffloadError::NotRunning(rejected.reason));
                drop(rejected.job);
                if rejected.reason == NotRunningReason::Crashed {
                    tracing::error!("Scheduler thread exited unexpectedly");
                    advance(&mut lifecycle, Lifecycle::Failed);
                }
            }
        }
        handle
    }

    /// Submit `task` and block the calling thread for its result.
    ///
    /// On timeout the task is cancelled and [`OffloadError::Timeout`] is
    /// returned. Called from the scheduler thread this fails with
    /// [`OffloadError::WouldDeadlock`] without submitting anything.
    pub fn run<F, T, E>(&self, task: F, timeout: Option<Duration>) -> Result<T, OffloadError>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + 'static,
    {
        if self.on_scheduler_thread() {
            return Err(OffloadError::WouldDeadlock);
        }
        self.submit_async(task).result(timeout)
    }

    /// Stop accepting work, drain in-flight tasks for up to `drain_timeout`
    /// (the configured default when `None`), cancel the rest and stop the
    /// scheduler thread. Safe to call more than once.
    ///
    /// Call this from outside the scheduler thread. Called from a task on
    /// that thread, the loop is told to stop but its thread cannot be joined:
    /// it is detached, a `warn!` is logged, and nothing reaps it later.
    pub fn shutdown(&self, drain_timeout: Option<Duration>) {
        let drain_timeout = drain_timeout.unwrap_or(self.drain_timeout);
        {
            let mut lifecycle = lock(&self.lifecycle);
            let current = *lifecycle;
            match current {
                Lifecycle::Uninitialized => {
                    advance(&mut lifecycle, Lifecycle::Stopped);
                    return;
                }
                Lifecycle::Running => advance(&mut lifecycle, Lifecycle::Draining),
                // Reap the crashed thread; the state stays `Failed`.
                Lifecycle::Failed => {}
                Lifecycle::Starting | Lifecycle::Draining | Lifecycle::Stopped => return,
            }
        }

        let report = self.context.stop(drain_timeout);

        let mut lifecycle = lock(&self.lifecycle);
        if *lifecycle == Lifecycle::Draining {
            advance(&mut lifecycle, Lifecycle::Stopped);
        }
        drop(lifecycle);

        let DrainReport {
            completed,
            cancelled,
        } = report.unwrap_or_default();
        tracing::info!(completed, cancelled, "Worker shut down");
    }

    #[must_use]
    pub fn stats(&self) -> Stats {
        let state = self.state();
        Stats {
            pending_tasks: self.pending.load(Ordering::SeqCst),
            running: state == Lifecycle::Running,
            state,
        }
    }

    #[must_use]
    pub fn state(&self) -> Lifecycle {
        *lock(&self.lifecycle)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == Lifecycle::Running
    }

    #[must_use]
    pub fn scheduler_thread_id(&self) -> Option<ThreadId> {
        self.context.thread_id()
    }

    /// Default drain deadline used by `shutdown(None)`.
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    pub(crate) fn on_scheduler_thread(&self) -> bool {
        self.context.thread_id() == Some(thread::current().id())
    }
}

impl Default for Worker {
    fn default() -> Self {
        Self::new(WorkerOptions::default())
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("state", &self.state())
            .field("pending", &self.pending.load(Ordering::SeqCst))
            .field("drain_timeout", &self.drain_timeout)
            .finish_non_exhaustive()
    }
}

/// Apply a lifecycle edge the worker itself chose. An illegal edge is a bug
/// in this module; it is logged and the state is left untouched.
fn advance(lifecycle: &mut Lifecycle, next: Lifecycle) {
    if let Err(err) = lifecycle.transition(next) {
        tracing::error!("{err}");
    }
}
