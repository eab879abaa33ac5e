//! Task failures, panics, reentrancy and unobserved errors.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use offload_core::{
    BoxError, Dispatcher, HandleStatus, OffloadError, TaskError, TaskId, Worker,
};

use crate::common::{PATIENCE, dispatcher, failing, options, sleepy};

#[test]
fn task_error_is_reachable_as_source() {
    let dispatcher = dispatcher("source");
    let err = dispatcher
        .execute(
            async { Err::<(), _>(io::Error::new(io::ErrorKind::NotFound, "no such table")) },
            Some(PATIENCE),
        )
        .unwrap_err();

    let task = err.as_task_error().expect("task error");
    let io_err = task.downcast_ref::<io::Error>().expect("io error");
    assert_eq!(io_err.kind(), io::ErrorKind::NotFound);
    assert_eq!(
        std::error::Error::source(task).map(ToString::to_string).as_deref(),
        Some("no such table")
    );
    dispatcher.shutdown(None);
}

#[test]
fn panics_become_task_errors() {
    let dispatcher = dispatcher("panic");
    let err = dispatcher
        .execute(
            async {
                tokio::time::sleep(Duration::from_millis(1)).await;
                if true {
                    panic!("scheduler must survive this");
                }
                Ok::<u8, BoxError>(0)
            },
            Some(PATIENCE),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        OffloadError::Task(TaskError::Panicked(ref msg)) if msg == "scheduler must survive this"
    ));

    // The scheduler keeps serving after a task panicked.
    assert_eq!(dispatcher.execute(sleepy(5, 1), Some(PATIENCE)).unwrap(), 5);
    dispatcher.shutdown(None);
}

#[test]
fn blocking_from_the_scheduler_thread_is_refused() {
    let dispatcher = Arc::new(dispatcher("reentrant"));
    let inner = Arc::clone(&dispatcher);

    let outcome = dispatcher
        .execute(
            async move {
                let blocking = inner.execute(sleepy(1, 0), Some(PATIENCE));
                let batch = inner
                    .execute_many([sleepy(2, 0)], true, None)
                    .into_results()
                    .unwrap_or_default();
                Ok::<_, BoxError>((blocking, batch))
            },
            Some(PATIENCE),
        )
        .unwrap();

    assert!(matches!(outcome.0, Err(OffloadError::WouldDeadlock)));
    assert!(matches!(
        outcome.1.as_slice(),
        [Err(OffloadError::WouldDeadlock)]
    ));
    dispatcher.shutdown(None);
}

#[test]
fn tasks_may_await_other_tasks() {
    let dispatcher = Arc::new(dispatcher("nested"));
    let inner = Arc::clone(&dispatcher);

    let value = dispatcher
        .execute(
            async move {
                let child = inner.execute_async(sleepy(20, 5));
                let child = child.join().await?;
                Ok::<_, OffloadError>(child + 1)
            },
            Some(PATIENCE),
        )
        .unwrap();
    assert_eq!(value, 21);
    dispatcher.shutdown(None);
}

#[test]
fn dropped_failures_reach_the_hook() {
    let seen: Arc<Mutex<Vec<(TaskId, String)>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let dispatcher = Dispatcher::new(options("hook").on_unobserved_failure(
        move |id: TaskId, err: &OffloadError| {
            sink.lock().unwrap().push((id, err.to_string()));
        },
    ));

    // Read: not reported.
    let observed = dispatcher.execute_async(failing::<u8>("seen", 1));
    assert!(observed.result(Some(PATIENCE)).is_err());

    // Dropped unread: reported once.
    let dropped = dispatcher.execute_async(failing::<u8>("ignored", 1));
    let dropped_id = dropped.id();
    drop(dropped);

    // Successful fire-and-forget: never reported.
    drop(dispatcher.execute_async(sleepy(1, 1)));

    dispatcher.shutdown(Some(PATIENCE));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, dropped_id);
    assert_eq!(seen[0].1, "task failed: ignored");
}

#[test]
fn worker_can_be_used_without_a_dispatcher() {
    let worker = Worker::new(options("bare-worker"));
    let handle = worker.submit_async(sleepy("hi", 1));
    assert_eq!(handle.result(Some(PATIENCE)).unwrap(), "hi");
    assert_eq!(
        worker.run(failing::<()>("bad", 0), Some(PATIENCE)).unwrap_err().to_string(),
        "task failed: bad"
    );
    let late = worker.submit_async(sleepy(0, 10_000));
    worker.shutdown(Some(Duration::ZERO));
    assert_eq!(late.status(), HandleStatus::Cancelled);
}
