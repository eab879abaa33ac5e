//! Cross-thread result handle.
//!
//! A [`Handle`] is the consumer side of one submitted task and a
//! [`Completer`] is the producer side. The terminal transition happens under
//! the shared mutex, so a value stored on the scheduler thread is visible to
//! whichever thread wakes from the condition variable.
//!
//! The same handle serves blocking callers ([`Handle::result`],
//! [`Handle::wait`]) and async callers ([`Handle::join`]).

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::{Pin, pin};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::sync::Notify;

use offload_types::{BoxError, OffloadError, TaskError, TaskId};

/// Callback for task failures whose handle was dropped unread.
pub type FailureHook = Arc<dyn Fn(TaskId, &OffloadError) + Send + Sync>;

/// A type-erased job ready to be spawned on the scheduler.
pub(crate) type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// Every critical section in this crate leaves the guarded data consistent,
/// so a poisoned lock carries no torn state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Observable state of a [`Handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl HandleStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

enum Slot<T> {
    Pending,
    Completed(T),
    Failed(OffloadError),
    Cancelled,
    /// The terminal value has been moved out.
    Taken,
}

impl<T> Slot<T> {
    fn status(&self) -> HandleStatus {
        match self {
            Slot::Pending => HandleStatus::Pending,
            // `Taken` is only reachable after the handle was consumed.
            Slot::Completed(_) | Slot::Taken => HandleStatus::Completed,
            Slot::Failed(_) => HandleStatus::Failed,
            Slot::Cancelled => HandleStatus::Cancelled,
        }
    }

    fn into_result(self) -> Result<T, OffloadError> {
        match self {
            Slot::Completed(value) => Ok(value),
            Slot::Failed(err) => Err(err),
            Slot::Cancelled | Slot::Pending | Slot::Taken => Err(OffloadError::Cancelled),
        }
    }
}

struct State<T> {
    slot: Slot<T>,
    handle_alive: bool,
}

struct Shared<T> {
    id: TaskId,
    state: Mutex<State<T>>,
    /// Wakes blocking waiters.
    done: Condvar,
    /// Wakes async waiters.
    finished: Notify,
    /// Wakes the task so it can stop at its next suspension point.
    cancel: Notify,
    scheduler_thread: Option<ThreadId>,
    on_unobserved_failure: Option<FailureHook>,
}

impl<T> Shared<T> {
    fn notify_terminal(&self) {
        self.done.notify_all();
        self.finished.notify_waiters();
    }

    fn on_scheduler_thread(&self) -> bool {
        self.scheduler_thread == Some(thread::current().id())
    }
}

fn report_unobserved(id: TaskId, err: &OffloadError, hook: Option<&FailureHook>) {
    tracing::error!(task_id = %id, error = %err, "Task failed and its result was never retrieved");
    if let Some(hook) = hook {
        hook(id, err);
    }
}

/// Consumer side of a submitted task. Usable from any thread.
pub struct Handle<T> {
    shared: Arc<Shared<T>>,
}

/// Producer side of a submitted task. Lives inside the job on the scheduler.
///
/// Dropping a completer that never settled marks the handle `Cancelled`.
/// This is how aborted and never-started jobs are reported.
pub(crate) struct Completer<T> {
    shared: Arc<Shared<T>>,
    pending: Arc<AtomicUsize>,
}

pub(crate) struct HandleParts {
    pub id: TaskId,
    pub scheduler_thread: Option<ThreadId>,
    pub on_unobserved_failure: Option<FailureHook>,
}

/// Create a connected handle/completer pair and count it as pending.
pub(crate) fn pair<T>(parts: HandleParts, pending: Arc<AtomicUsize>) -> (Handle<T>, Completer<T>) {
    let shared = Arc::new(Shared {
        id: parts.id,
        state: Mutex::new(State {
            slot: Slot::Pending,
            handle_alive: true,
        }),
        done: Condvar::new(),
        finished: Notify::new(),
        cancel: Notify::new(),
        scheduler_thread: parts.scheduler_thread,
        on_unobserved_failure: parts.on_unobserved_failure,
    });
    pending.fetch_add(1, Ordering::SeqCst);
    (
        Handle {
            shared: Arc::clone(&shared),
        },
        Completer { shared, pending },
    )
}

/// Wrap a task so its outcome settles `completer`.
///
/// Cancellation requested through the handle wins over further progress:
/// the task future is dropped at its next suspension point.
pub(crate) fn bind<F, T, E>(task: F, completer: Completer<T>) -> Job
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<BoxError> + 'static,
{
    Box::pin(async move {
        let outcome = tokio::select! {
            biased;
            () = completer.cancelled() => return,
            outcome = AssertUnwindSafe(task).catch_unwind() => outcome,
        };
        let result = match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(TaskError::failed(err)),
            Err(payload) => Err(TaskError::from_panic(payload.as_ref())),
        };
        completer.complete(result);
    })
}

impl<T> Completer<T> {
    async fn cancelled(&self) {
        self.shared.cancel.notified().await;
    }

    pub(crate) fn complete(self, result: Result<T, TaskError>) {
        let slot = match result {
            Ok(value) => Slot::Completed(value),
            Err(err) => Slot::Failed(OffloadError::Task(err)),
        };
        self.settle(slot);
    }

    fn settle(&self, slot: Slot<T>) {
        let mut state = lock(&self.shared.state);
        if !matches!(state.slot, Slot::Pending) {
            // Cancelled by the caller while the task was finishing.
            return;
        }
        state.slot = slot;
        let unobserved = if !state.handle_alive && matches!(state.slot, Slot::Failed(_)) {
            match std::mem::replace(&mut state.slot, Slot::Taken) {
                Slot::Failed(err) => Some(err),
                _ => None,
            }
        } else {
            None
        };
        drop(state);

        if let Some(err) = unobserved {
            report_unobserved(
                self.shared.id,
                &err,
                self.shared.on_unobserved_failure.as_ref(),
            );
        }
        self.shared.notify_terminal();
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        let mut state = lock(&self.shared.state);
        let abandoned = matches!(state.slot, Slot::Pending);
        if abandoned {
            state.slot = Slot::Cancelled;
        }
        drop(state);
        if abandoned {
            tracing::debug!(task_id = %self.shared.id, "Task dropped before completing");
            self.shared.notify_terminal();
        }
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<T> Handle<T> {
    /// A handle born failed, for submissions that were refused.
    pub(crate) fn rejected(
        id: TaskId,
        err: OffloadError,
        on_unobserved_failure: Option<FailureHook>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                state: Mutex::new(State {
                    slot: Slot::Failed(err),
                    handle_alive: true,
                }),
                done: Condvar::new(),
                finished: Notify::new(),
                cancel: Notify::new(),
                scheduler_thread: None,
                on_unobserved_failure,
            }),
        }
    }

    /// Fail a still-pending handle whose job never reached the scheduler.
    pub(crate) fn fail_if_pending(&self, err: OffloadError) {
        let mut state = lock(&self.shared.state);
        if matches!(state.slot, Slot::Pending) {
            state.slot = Slot::Failed(err);
            drop(state);
            self.shared.notify_terminal();
        }
    }

    #[must_use]
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    #[must_use]
    pub fn status(&self) -> HandleStatus {
        lock(&self.shared.state).slot.status()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    /// Request cancellation.
    ///
    /// Returns `false` if the task had already reached a terminal state.
    /// The handle becomes `Cancelled` immediately; the task itself stops at
    /// its next suspension point, and side effects it already performed are
    /// not undone.
    pub fn cancel(&self) -> bool {
        let mut state = lock(&self.shared.state);
        if !matches!(state.slot, Slot::Pending) {
            return false;
        }
        state.slot = Slot::Cancelled;
        drop(state);

        tracing::debug!(task_id = %self.shared.id, "Cancellation requested");
        self.shared.notify_terminal();
        self.shared.cancel.notify_one();
        true
    }

    /// Block until the task reaches a terminal state or `timeout` elapses.
    ///
    /// Does not consume the result; follow with [`Handle::result`].
    pub fn wait(&self, timeout: Option<Duration>) -> Result<(), OffloadError> {
        if self.wait_until(deadline_after(timeout))? {
            Ok(())
        } else {
            Err(OffloadError::Timeout(timeout.unwrap_or_default()))
        }
    }

    /// Block for the task's result.
    ///
    /// On timeout the task is cancelled and [`OffloadError::Timeout`] is
    /// returned right away, whether or not the task has stopped yet.
    pub fn result(self, timeout: Option<Duration>) -> Result<T, OffloadError> {
        let reported = timeout.unwrap_or_default();
        self.result_by(deadline_after(timeout), reported)
    }

    /// Like [`Handle::result`] with an absolute deadline, for batches that
    /// share one.
    pub(crate) fn result_by(
        self,
        deadline: Option<Instant>,
        reported: Duration,
    ) -> Result<T, OffloadError> {
        if !self.wait_until(deadline)? {
            self.cancel();
            tracing::debug!(task_id = %self.shared.id, timeout = ?reported, "Task timed out");
            return Err(OffloadError::Timeout(reported));
        }
        self.take()
    }

    /// Await the task's result from async code, on any runtime.
    ///
    /// Unlike the blocking calls this is safe inside tasks running on the
    /// scheduler thread.
    pub async fn join(self) -> Result<T, OffloadError> {
        let shared = Arc::clone(&self.shared);
        loop {
            let mut notified = pin!(shared.finished.notified());
            notified.as_mut().enable();
            if self.is_finished() {
                return self.take();
            }
            notified.await;
        }
    }

    fn wait_until(&self, deadline: Option<Instant>) -> Result<bool, OffloadError> {
        let mut state = lock(&self.shared.state);
        if state.slot.status().is_terminal() {
            return Ok(true);
        }
        if self.shared.on_scheduler_thread() {
            return Err(OffloadError::WouldDeadlock);
        }
        loop {
            if state.slot.status().is_terminal() {
                return Ok(true);
            }
            match deadline {
                None => {
                    state = self
                        .shared
                        .done
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    let (guard, _) = self
                        .shared
                        .done
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    state = guard;
                }
            }
        }
    }

    fn take(self) -> Result<T, OffloadError> {
        let slot = std::mem::replace(&mut lock(&self.shared.state).slot, Slot::Taken);
        slot.into_result()
    }
}

impl<T> Drop for Handle<T> {
    fn drop(&mut self) {
        let mut state = lock(&self.shared.state);
        state.handle_alive = false;
        let unobserved = if matches!(state.slot, Slot::Failed(_)) {
            match std::mem::replace(&mut state.slot, Slot::Taken) {
                Slot::Failed(err) => Some(err),
                _ => None,
            }
        } else {
            None
        };
        drop(state);

        if let Some(err) = unobserved {
            report_unobserved(
                self.shared.id,
                &err,
                self.shared.on_unobserved_failure.as_ref(),
            );
        }
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.shared.id)
            .field("status", &self.status())
            .finish()
    }
}

fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.and_then(|timeout| Instant::now().checked_add(timeout))
}
