//! Start, drain and shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use offload_core::{
    BoxError, HandleStatus, Lifecycle, NotRunningReason, OffloadError, ShutdownGuard, Submission,
};

use crate::common::{PATIENCE, dispatcher, options, sleepy};

#[test]
fn shutdown_twice_is_a_no_op() {
    let dispatcher = dispatcher("twice");
    assert_eq!(dispatcher.execute(sleepy(1, 1), Some(PATIENCE)).unwrap(), 1);
    dispatcher.shutdown(None);
    dispatcher.shutdown(None);
    assert_eq!(dispatcher.stats().state, Lifecycle::Stopped);
}

#[test]
fn shutdown_without_start_is_harmless() {
    let dispatcher = dispatcher("never-started");
    dispatcher.shutdown(Some(Duration::ZERO));
    assert_eq!(dispatcher.stats().state, Lifecycle::Stopped);
    assert!(dispatcher.worker().scheduler_thread_id().is_none());
}

#[test]
fn zero_drain_cancels_unfinished_tasks() {
    let dispatcher = dispatcher("zero-drain");
    let slow: Vec<_> = (0..3)
        .map(|i| dispatcher.execute_async(sleepy(i, 10_000)))
        .collect();

    let started = Instant::now();
    dispatcher.shutdown(Some(Duration::ZERO));
    assert!(started.elapsed() < Duration::from_secs(5));

    for handle in slow {
        assert_eq!(handle.status(), HandleStatus::Cancelled);
        assert!(matches!(handle.result(None), Err(OffloadError::Cancelled)));
    }
    assert_eq!(dispatcher.stats().pending_tasks, 0);
}

#[test]
fn drain_lets_in_flight_tasks_finish() {
    let dispatcher = dispatcher("drain");
    let finished = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let finished = Arc::clone(&finished);
            dispatcher.execute_async(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(())
            })
        })
        .collect();

    dispatcher.shutdown(Some(PATIENCE));
    assert_eq!(finished.load(Ordering::SeqCst), 4);
    for handle in handles {
        assert_eq!(handle.status(), HandleStatus::Completed);
    }
}

#[test]
fn no_new_work_after_shutdown() {
    let dispatcher = dispatcher("closed");
    dispatcher.start().unwrap();
    dispatcher.shutdown(None);

    let err = dispatcher.execute(sleepy(1, 0), Some(PATIENCE)).unwrap_err();
    assert!(matches!(
        err,
        OffloadError::NotRunning(NotRunningReason::Stopped)
    ));
    assert!(matches!(
        dispatcher.start(),
        Err(OffloadError::NotRunning(NotRunningReason::Stopped))
    ));

    let handle = dispatcher.execute_async(sleepy(2, 0));
    assert_eq!(handle.status(), HandleStatus::Failed);
    drop(handle.result(None));
}

#[test]
fn draining_worker_refuses_new_submissions() {
    let dispatcher = Arc::new(dispatcher("draining"));
    let inner = Arc::clone(&dispatcher);

    let outer = dispatcher.execute_async(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let late = inner.execute_async(sleepy(1, 0));
        Ok::<_, BoxError>(late)
    });

    dispatcher.shutdown(Some(PATIENCE));

    // The in-flight task still ran to completion during the drain.
    let late = outer.result(None).unwrap();
    assert_eq!(late.status(), HandleStatus::Failed);
    assert!(matches!(
        late.result(None),
        Err(OffloadError::NotRunning(NotRunningReason::Draining))
    ));
    assert_eq!(dispatcher.stats().state, Lifecycle::Stopped);
}

#[test]
fn stats_follow_the_lifecycle() {
    let dispatcher = dispatcher("stats");
    let stats = dispatcher.stats();
    assert_eq!(stats.state, Lifecycle::Uninitialized);
    assert!(!stats.running);

    let handle = dispatcher.execute_async(sleepy((), 200));
    let stats = dispatcher.stats();
    assert_eq!(stats.state, Lifecycle::Running);
    assert!(stats.running);
    assert_eq!(stats.pending_tasks, 1);

    handle.result(Some(PATIENCE)).unwrap();
    dispatcher.shutdown(None);
    let stats = dispatcher.stats();
    assert_eq!(stats.state, Lifecycle::Stopped);
    assert!(!stats.running);
    assert_eq!(stats.pending_tasks, 0);
}

#[test]
fn shutdown_from_another_thread_unblocks_waiters() {
    let dispatcher = Arc::new(dispatcher("cross-thread-stop"));
    let handle = dispatcher.execute_async(sleepy(0, 10_000));

    let stopper = {
        let dispatcher = Arc::clone(&dispatcher);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            dispatcher.shutdown(Some(Duration::ZERO));
        })
    };

    assert!(handle.result(Some(PATIENCE)).unwrap_err().is_cancelled());
    stopper.join().unwrap();
}

/// The only test in this binary that touches the process-wide dispatcher.
#[test]
fn global_dispatcher_round_trip() {
    assert_eq!(offload_core::get_stats().state, Lifecycle::Uninitialized);
    assert!(offload_core::configure(options("global")));
    assert!(!offload_core::configure(options("global-again")));

    {
        let _guard = ShutdownGuard::with_drain_timeout(PATIENCE);
        offload_core::start().unwrap();
        offload_core::start().unwrap();

        let value = offload_core::run_task(sleepy(42, 5), false, Some(PATIENCE))
            .unwrap()
            .into_value();
        assert_eq!(value, Some(42));

        let detached = offload_core::run_task(sleepy(7, 5), true, None).unwrap();
        let Submission::Detached(handle) = detached else {
            panic!("fire-and-forget must return a handle");
        };
        assert_eq!(handle.result(Some(PATIENCE)).unwrap(), 7);

        let batch = offload_core::run_tasks((0..3).map(|i| sleepy(i, 1)), true, Some(PATIENCE));
        assert_eq!(batch.len(), 3);
        assert!(offload_core::get_stats().running);
    }

    assert_eq!(offload_core::get_stats().state, Lifecycle::Stopped);
    offload_core::shutdown(None);
}
