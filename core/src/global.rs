//! The process-wide dispatcher and its module-level entry points.
//!
//! The global instance is created lazily on first use from the user config
//! (see `offload-config`), or explicitly with [`configure`]. A process-exit
//! hook drains it as a safety net; callers that care about the drain should
//! still call [`shutdown`] themselves or hold a [`ShutdownGuard`].

use std::future::Future;
use std::io;
use std::panic;
use std::sync::OnceLock;
use std::time::Duration;

use offload_config::OffloadConfig;
use offload_types::{BoxError, Lifecycle, OffloadError, Stats};

use crate::dispatcher::{Batch, Dispatcher};
use crate::handle::Handle;
use crate::worker::WorkerOptions;

static GLOBAL: OnceLock<Dispatcher> = OnceLock::new();

/// Result of [`run_task`].
#[derive(Debug)]
pub enum Submission<T> {
    /// The task ran to completion while the caller waited.
    Completed(T),
    /// Fire-and-forget: the task is running in the background.
    Detached(Handle<T>),
}

impl<T> Submission<T> {
    #[must_use]
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Detached(_) => None,
        }
    }

    #[must_use]
    pub fn into_handle(self) -> Option<Handle<T>> {
        match self {
            Self::Detached(handle) => Some(handle),
            Self::Completed(_) => None,
        }
    }
}

/// Install `options` for the global dispatcher.
///
/// Returns `false` if the global dispatcher already exists, in which case
/// `options` are discarded.
pub fn configure(options: WorkerOptions) -> bool {
    let register = options.settings.register_exit_hook;
    let installed = GLOBAL.set(Dispatcher::new(options)).is_ok();
    if installed && register {
        register_exit_hook();
    }
    installed
}

/// The global dispatcher, created from the user config on first access.
pub fn global() -> &'static Dispatcher {
    GLOBAL.get_or_init(|| {
        let options = load_options();
        if options.settings.register_exit_hook {
            register_exit_hook();
        }
        Dispatcher::new(options)
    })
}

fn load_options() -> WorkerOptions {
    let config = match OffloadConfig::load() {
        Ok(config) => config.unwrap_or_default(),
        Err(err) => {
            tracing::warn!("Using default worker settings: {err}");
            OffloadConfig::default()
        }
    };
    WorkerOptions::from_config(&config)
}

/// Start the global worker. Repeated calls are no-ops once running.
pub fn start() -> Result<(), OffloadError> {
    global().start()
}

/// Run `task` on the global worker.
///
/// With `fire_and_forget` the handle is returned at once and this never
/// fails; otherwise blocks for the result up to `timeout`.
pub fn run_task<F, T, E>(
    task: F,
    fire_and_forget: bool,
    timeout: Option<Duration>,
) -> Result<Submission<T>, OffloadError>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<BoxError> + 'static,
{
    let dispatcher = global();
    if fire_and_forget {
        return Ok(Submission::Detached(dispatcher.execute_async(task)));
    }
    dispatcher.execute(task, timeout).map(Submission::Completed)
}

/// Run a batch on the global worker. See [`Dispatcher::execute_many`].
pub fn run_tasks<I, F, T, E>(tasks: I, wait_all: bool, timeout: Option<Duration>) -> Batch<T>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<BoxError> + 'static,
{
    global().execute_many(tasks, wait_all, timeout)
}

/// Shut the global worker down. A no-op if it was never created.
pub fn shutdown(drain_timeout: Option<Duration>) {
    if let Some(dispatcher) = GLOBAL.get() {
        dispatcher.shutdown(drain_timeout);
    }
}

#[must_use]
pub fn get_stats() -> Stats {
    GLOBAL
        .get()
        .map_or_else(|| Stats::idle(Lifecycle::Uninitialized), Dispatcher::stats)
}

/// Shuts the global worker down when dropped.
///
/// ```no_run
/// let _guard = offload_core::ShutdownGuard::new();
/// // ... submit work ...
/// // drained here, before process exit
/// ```
#[derive(Debug, Default)]
#[must_use = "the worker shuts down when the guard is dropped"]
pub struct ShutdownGuard {
    drain_timeout: Option<Duration>,
}

impl ShutdownGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_drain_timeout(drain_timeout: Duration) -> Self {
        Self {
            drain_timeout: Some(drain_timeout),
        }
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        shutdown(self.drain_timeout);
    }
}

fn register_exit_hook() {
    match register_platform_exit_hook() {
        Ok(()) => tracing::debug!("Registered process-exit shutdown"),
        Err(err) => tracing::warn!("Failed to register process-exit shutdown: {err}"),
    }
}

#[cfg(unix)]
fn register_platform_exit_hook() -> io::Result<()> {
    extern "C" fn shutdown_at_exit() {
        // Unwinding out of an `extern "C"` fn aborts the process.
        let _ = panic::catch_unwind(|| shutdown(None));
    }

    let rc = unsafe { libc::atexit(shutdown_at_exit) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::other("atexit registration table is full"))
    }
}

#[cfg(not(unix))]
fn register_platform_exit_hook() -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "no process-exit hook on this platform; call shutdown() explicitly",
    ))
}
