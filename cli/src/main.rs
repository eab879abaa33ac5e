//! offload CLI - demonstration driver for the dedicated-loop worker.
//!
//! Runs a short scenario against the process-wide dispatcher and prints the
//! final stats as JSON on stdout. Logs go to stderr; set `RUST_LOG` (for
//! example `RUST_LOG=offload_core=debug`) to see per-task events.
//!
//! ```text
//! main() -> init_tracing() -> load config -> configure() -> scenario
//!                                                             |
//!                   fire-and-forget, blocking, timeout, batch v
//!                                          stats JSON -> ShutdownGuard drop
//! ```

use std::io;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use offload_config::OffloadConfig;
use offload_core::{BoxError, OffloadError, ShutdownGuard, Submission, WorkerOptions};

const BLOCKING_TIMEOUT: Duration = Duration::from_secs(1);
const SHORT_TIMEOUT: Duration = Duration::from_millis(10);
const BATCH_TIMEOUT: Duration = Duration::from_secs(2);

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    // stdout carries the stats document; keep logs off it.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();
}

async fn greet(name: &'static str) -> Result<String, BoxError> {
    tokio::time::sleep(Duration::from_millis(20)).await;
    Ok(format!("hello from {name}"))
}

async fn multiply(a: u64, b: u64, delay: Duration) -> Result<u64, BoxError> {
    tokio::time::sleep(delay).await;
    Ok(a * b)
}

fn run_scenario() -> Result<()> {
    // Fire-and-forget: returns at once, collected at the end.
    let background = match offload_core::run_task(greet("the background"), true, None)? {
        Submission::Detached(handle) => handle,
        Submission::Completed(_) => bail!("fire-and-forget submission completed inline"),
    };
    tracing::info!(task_id = %background.id(), "Submitted background task");

    let answer = offload_core::run_task(
        multiply(6, 7, Duration::from_millis(50)),
        false,
        Some(BLOCKING_TIMEOUT),
    )
    .context("blocking task failed")?
    .into_value()
    .context("blocking task returned no value")?;
    println!("blocking result: {answer}");

    match offload_core::run_task(
        multiply(1, 1, Duration::from_millis(500)),
        false,
        Some(SHORT_TIMEOUT),
    ) {
        Err(OffloadError::Timeout(after)) => println!("slow task timed out after {after:?}"),
        Err(err) => return Err(err).context("slow task failed unexpectedly"),
        Ok(_) => bail!("slow task finished inside {SHORT_TIMEOUT:?}"),
    }

    let batch = offload_core::run_tasks(
        (1..=5).map(|n| multiply(n, n, Duration::from_millis(60 - n * 10))),
        true,
        Some(BATCH_TIMEOUT),
    );
    let squares = batch
        .into_results()
        .context("batch returned handles instead of results")?
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .context("batch task failed")?;
    println!("batch results: {squares:?}");

    let greeting = background
        .result(Some(BLOCKING_TIMEOUT))
        .context("background task failed")?;
    println!("background result: {greeting}");

    Ok(())
}

fn main() -> Result<()> {
    init_tracing();

    let config = match OffloadConfig::load() {
        Ok(config) => config.unwrap_or_default(),
        Err(err) => {
            tracing::warn!("Ignoring unreadable config: {err}");
            OffloadConfig::default()
        }
    };
    let options = WorkerOptions::from_config(&config);
    tracing::info!(
        flavor = options.settings.flavor.as_str(),
        drain_timeout = ?options.settings.drain_timeout,
        "Configuring worker"
    );
    if !offload_core::configure(options) {
        tracing::warn!("Global dispatcher was already initialised; using its settings");
    }

    let _shutdown = ShutdownGuard::new();
    offload_core::start().context("failed to start offload worker")?;

    run_scenario()?;

    let stats = serde_json::to_string_pretty(&offload_core::get_stats())
        .context("failed to serialise stats")?;
    println!("{stats}");
    Ok(())
}
