//! Scheduler context: one Tokio current-thread runtime pinned to a thread
//! this context spawned itself.
//!
//! The context never looks for, or borrows, a runtime that already exists on
//! the caller's thread. Callers talk to the loop through a single unbounded
//! channel; nothing else touches the runtime from outside its thread.
//!
//! ```text
//! caller thread ──Command::Spawn(job)──▶ channel ──▶ scheduler thread
//!                                                     JoinSet<()>
//! caller thread ──Command::Stop{drain}─▶ channel ──▶ drain, abort, exit
//! ```

use std::io;
use std::sync::Mutex;
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

use offload_types::{NotRunningReason, OffloadError, SchedulerFlavor};

use crate::handle::{Job, lock};

/// Driver polls per tick for [`SchedulerFlavor::Throughput`]. Tokio's
/// current-thread default is 61.
const THROUGHPUT_EVENT_INTERVAL: u32 = 127;

/// Injection-queue checks per tick for [`SchedulerFlavor::Throughput`].
/// Tokio's current-thread default is 31.
const THROUGHPUT_GLOBAL_QUEUE_INTERVAL: u32 = 61;

enum Command {
    Spawn(Job),
    Stop { drain_timeout: Duration },
    /// Kill the loop without draining, as an unexpected runtime failure would.
    #[cfg(test)]
    Crash,
}

/// Outcome of a drain, returned by [`SchedulerContext::stop`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Jobs that ran to completion during the drain.
    pub completed: usize,
    /// Jobs aborted when the drain deadline passed.
    pub cancelled: usize,
}

/// A job the context refused, handed back so the caller can settle it.
pub(crate) struct Rejected {
    pub job: Job,
    pub reason: NotRunningReason,
}

struct RunningLoop {
    commands: mpsc::UnboundedSender<Command>,
    thread: JoinHandle<DrainReport>,
    thread_id: ThreadId,
}

enum ContextState {
    Idle,
    Running(RunningLoop),
    Stopped,
}

pub struct SchedulerContext {
    flavor: SchedulerFlavor,
    thread_name: String,
    state: Mutex<ContextState>,
}

impl SchedulerContext {
    #[must_use]
    pub fn new(flavor: SchedulerFlavor, thread_name: impl Into<String>) -> Self {
        Self {
            flavor,
            thread_name: thread_name.into(),
            state: Mutex::new(ContextState::Idle),
        }
    }

    /// Spawn the scheduler thread and wait until its runtime is ready.
    ///
    /// Idempotent while running. Blocks only until the loop reports ready,
    /// never until it finishes.
    pub fn start(&self) -> Result<(), OffloadError> {
        let mut state = lock(&self.state);
        match &*state {
            ContextState::Running(_) => return Ok(()),
            ContextState::Stopped => {
                return Err(OffloadError::NotRunning(NotRunningReason::Stopped));
            }
            ContextState::Idle => {}
        }

        let (commands, receiver) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<io::Result<()>>(1);
        let flavor = self.flavor;

        let thread = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || {
                let runtime = match build_runtime(flavor) {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return DrainReport::default();
                    }
                };
                let _ = ready_tx.send(Ok(()));
                runtime.block_on(run_loop(receiver))
            })
            .map_err(|source| OffloadError::Startup {
                reason: "could not spawn scheduler thread".to_string(),
                source: Some(source),
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                let _ = thread.join();
                return Err(OffloadError::Startup {
                    reason: "could not build scheduler runtime".to_string(),
                    source: Some(source),
                });
            }
            Err(_) => {
                let _ = thread.join();
                return Err(OffloadError::startup(
                    "scheduler thread exited before reporting ready",
                ));
            }
        }

        let thread_id = thread.thread().id();
        *state = ContextState::Running(RunningLoop {
            commands,
            thread,
            thread_id,
        });
        tracing::info!(
            thread = %self.thread_name,
            flavor = self.flavor.as_str(),
            "Scheduler started"
        );
        Ok(())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(&*lock(&self.state), ContextState::Running(_))
    }

    /// Identity of the scheduler thread while it runs.
    #[must_use]
    pub fn thread_id(&self) -> Option<ThreadId> {
        match &*lock(&self.state) {
            ContextState::Running(running) => Some(running.thread_id),
            ContextState::Idle | ContextState::Stopped => None,
        }
    }

    /// Hand a job to the scheduler thread. Never runs it on the caller.
    pub(crate) fn spawn(&self, job: Job) -> Result<(), Rejected> {
        let state = lock(&self.state);
        let running = match &*state {
            ContextState::Running(running) => running,
            ContextState::Idle | ContextState::Stopped => {
                return Err(Rejected {
                    job,
                    reason: NotRunningReason::Stopped,
                });
            }
        };
        if let Err(mpsc::error::SendError(Command::Spawn(job))) =
            running.commands.send(Command::Spawn(job))
        {
            // The loop is gone although nobody asked it to stop.
            return Err(Rejected {
                job,
                reason: NotRunningReason::Crashed,
            });
        }
        Ok(())
    }

    /// Stop the loop: admit already-queued jobs, give in-flight jobs up to
    /// `drain_timeout`, abort the rest, then join the thread.
    ///
    /// Returns `None` if the context was not running (a repeated stop is a
    /// no-op), or when called from the scheduler thread itself, where the
    /// loop is told to stop but cannot be joined.
    pub fn stop(&self, drain_timeout: Duration) -> Option<DrainReport> {
        let running = {
            let mut state = lock(&self.state);
            match std::mem::replace(&mut *state, ContextState::Stopped) {
                ContextState::Running(running) => running,
                ContextState::Idle | ContextState::Stopped => return None,
            }
        };

        tracing::info!(drain_timeout = ?drain_timeout, "Stopping scheduler");
        if running
            .commands
            .send(Command::Stop { drain_timeout })
            .is_err()
        {
            tracing::warn!("Scheduler loop already exited");
        }

        if thread::current().id() == running.thread_id {
            tracing::warn!("Scheduler stopped from its own thread; not joining");
            return None;
        }

        match running.thread.join() {
            Ok(report) => {
                tracing::info!(
                    completed = report.completed,
                    cancelled = report.cancelled,
                    "Scheduler stopped"
                );
                Some(report)
            }
            Err(_) => {
                tracing::error!("Scheduler thread panicked");
                Some(DrainReport::default())
            }
        }
    }
}

#[cfg(test)]
impl SchedulerContext {
    /// Make the loop die without a stop request and wait until its thread
    /// is gone, leaving the context believing it still runs.
    pub(crate) fn crash_loop(&self) {
        if let ContextState::Running(running) = &*lock(&self.state) {
            let _ = running.commands.send(Command::Crash);
        }
        loop {
            let finished = match &*lock(&self.state) {
                ContextState::Running(running) => running.thread.is_finished(),
                ContextState::Idle | ContextState::Stopped => true,
            };
            if finished {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Drop for SchedulerContext {
    fn drop(&mut self) {
        self.stop(Duration::ZERO);
    }
}

fn build_runtime(flavor: SchedulerFlavor) -> io::Result<Runtime> {
    let mut builder = Builder::new_current_thread();
    builder.enable_all();
    if flavor == SchedulerFlavor::Throughput {
        builder
            .event_interval(THROUGHPUT_EVENT_INTERVAL)
            .global_queue_interval(THROUGHPUT_GLOBAL_QUEUE_INTERVAL);
    }
    builder.build()
}

async fn run_loop(mut commands: mpsc::UnboundedReceiver<Command>) -> DrainReport {
    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Spawn(job)) => {
                    tasks.spawn(job);
                }
                Some(Command::Stop { drain_timeout }) => {
                    return drain(commands, tasks, drain_timeout).await;
                }
                #[cfg(test)]
                Some(Command::Crash) => panic!("scheduler loop crashed"),
                // Every sender is gone without a Stop: nobody can observe
                // the jobs any more.
                None => return drain(commands, tasks, Duration::ZERO).await,
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_join(&joined),
        }
    }
}

async fn drain(
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut tasks: JoinSet<()>,
    drain_timeout: Duration,
) -> DrainReport {
    commands.close();
    // Jobs accepted before the stop request are still owed a run.
    while let Ok(command) = commands.try_recv() {
        if let Command::Spawn(job) = command {
            tasks.spawn(job);
        }
    }

    let mut report = DrainReport::default();
    let in_flight = tasks.len();
    tracing::debug!(in_flight, "Draining scheduler");

    let drained = tokio::time::timeout(drain_timeout, async {
        while let Some(joined) = tasks.join_next().await {
            log_join(&joined);
            report.completed += 1;
        }
    })
    .await
    .is_ok();

    if !drained {
        tracing::warn!(
            remaining = tasks.len(),
            "Drain deadline passed; cancelling remaining tasks"
        );
        tasks.abort_all();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Err(err) if err.is_cancelled() => report.cancelled += 1,
                other => {
                    log_join(&other);
                    report.completed += 1;
                }
            }
        }
    }

    report
}

fn log_join(joined: &Result<(), JoinError>) {
    if let Err(err) = joined
        && !err.is_cancelled()
    {
        tracing::error!("Scheduler job failed: {err}");
    }
}
