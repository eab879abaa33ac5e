//! Dispatcher: the synchronous-facing façade over one [`Worker`].

use std::future::Future;
use std::time::{Duration, Instant};

use offload_types::{BoxError, OffloadError, Stats};

use crate::handle::Handle;
use crate::worker::{Worker, WorkerOptions};

/// Outcome of [`Dispatcher::execute_many`].
#[derive(Debug)]
pub enum Batch<T> {
    /// One result per input task, in input order.
    Results(Vec<Result<T, OffloadError>>),
    /// One handle per input task, in input order; nothing was awaited.
    Handles(Vec<Handle<T>>),
}

impl<T> Batch<T> {
    /// The collected results, or `None` for a fire-and-forget batch.
    #[must_use]
    pub fn into_results(self) -> Option<Vec<Result<T, OffloadError>>> {
        match self {
            Self::Results(results) => Some(results),
            Self::Handles(_) => None,
        }
    }

    #[must_use]
    pub fn into_handles(self) -> Option<Vec<Handle<T>>> {
        match self {
            Self::Handles(handles) => Some(handles),
            Self::Results(_) => None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Results(results) => results.len(),
            Self::Handles(handles) => handles.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Blocking, batch and non-blocking submission over a single worker.
///
/// The process-wide instance behind [`crate::run_task`] is one of these;
/// construct more with [`Dispatcher::new`] for isolation.
#[derive(Debug, Default)]
pub struct Dispatcher {
    worker: Worker,
}

impl Dispatcher {
    #[must_use]
    pub fn new(options: WorkerOptions) -> Self {
        Self {
            worker: Worker::new(options),
        }
    }

    pub fn start(&self) -> Result<(), OffloadError> {
        self.worker.start()
    }

    /// Run `task` and block for its result, up to `timeout`.
    pub fn execute<F, T, E>(&self, task: F, timeout: Option<Duration>) -> Result<T, OffloadError>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.worker.run(task, timeout)
    }

    /// Submit `task` and return its handle immediately.
    pub fn execute_async<F, T, E>(&self, task: F) -> Handle<T>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.worker.submit_async(task)
    }

    /// Submit every task before waiting on any of them.
    ///
    /// With `wait_all`, blocks until all tasks finish or the shared
    /// `timeout` deadline passes; tasks still pending at the deadline are
    /// cancelled and reported as [`OffloadError::Timeout`]. Results keep the
    /// input order regardless of completion order.
    pub fn execute_many<I, F, T, E>(
        &self,
        tasks: I,
        wait_all: bool,
        timeout: Option<Duration>,
    ) -> Batch<T>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + 'static,
    {
        if wait_all && self.worker.on_scheduler_thread() {
            let results = tasks
                .into_iter()
                .map(|_| Err(OffloadError::WouldDeadlock))
                .collect();
            return Batch::Results(results);
        }

        let handles: Vec<Handle<T>> = tasks
            .into_iter()
            .map(|task| self.worker.submit_async(task))
            .collect();
        tracing::debug!(count = handles.len(), wait_all, "Batch submitted");

        if !wait_all {
            return Batch::Handles(handles);
        }

        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let reported = timeout.unwrap_or_default();
        Batch::Results(
            handles
                .into_iter()
                .map(|handle| handle.result_by(deadline, reported))
                .collect(),
        )
    }

    pub fn shutdown(&self, drain_timeout: Option<Duration>) {
        self.worker.shutdown(drain_timeout);
    }

    #[must_use]
    pub fn stats(&self) -> Stats {
        self.worker.stats()
    }

    #[must_use]
    pub fn worker(&self) -> &Worker {
        &self.worker
    }
}
