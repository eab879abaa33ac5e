//! Shared test utilities and fixtures
//!
//! Common infrastructure for integration tests. Every test builds its own
//! isolated dispatcher; the process-wide instance is never touched here.

#![allow(dead_code)]

use std::time::Duration;

use offload_core::{BoxError, Dispatcher, SchedulerFlavor, WorkerOptions};

/// Generous ceiling for waits that are expected to succeed.
pub const PATIENCE: Duration = Duration::from_secs(10);

/// An isolated dispatcher with a recognisable thread name.
pub fn dispatcher(name: &str) -> Dispatcher {
    Dispatcher::new(options(name))
}

pub fn throughput_dispatcher(name: &str) -> Dispatcher {
    Dispatcher::new(options(name).with_flavor(SchedulerFlavor::Throughput))
}

pub fn options(name: &str) -> WorkerOptions {
    WorkerOptions::default()
        .with_thread_name(format!("offload-it-{name}"))
        .with_exit_hook(false)
}

/// Sleep `ms` on the scheduler, then yield `value`.
pub async fn sleepy<T: Send>(value: T, ms: u64) -> Result<T, BoxError> {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Ok(value)
}

/// Fail with `message` after `ms`.
pub async fn failing<T>(message: &'static str, ms: u64) -> Result<T, BoxError> {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Err(message.into())
}
