//! Many caller threads, one scheduler thread.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use offload_core::BoxError;

use crate::common::{PATIENCE, dispatcher, sleepy, throughput_dispatcher};

const CALLERS: usize = 16;

#[test]
fn concurrent_runs_share_one_scheduler_thread() {
    let dispatcher = Arc::new(dispatcher("concurrent"));
    let barrier = Arc::new(Barrier::new(CALLERS));

    let callers: Vec<_> = (0..CALLERS)
        .map(|i| {
            let dispatcher = Arc::clone(&dispatcher);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                dispatcher.execute(
                    async move {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        Ok::<_, BoxError>((i, thread::current().id()))
                    },
                    Some(PATIENCE),
                )
            })
        })
        .collect();

    let mut values = Vec::new();
    let mut threads = HashSet::new();
    for caller in callers {
        let (value, scheduler) = caller.join().unwrap().unwrap();
        values.push(value);
        threads.insert(scheduler);
    }

    values.sort_unstable();
    assert_eq!(values, (0..CALLERS).collect::<Vec<_>>());
    assert_eq!(threads.len(), 1);
    assert_eq!(
        threads.into_iter().next(),
        dispatcher.worker().scheduler_thread_id()
    );
    dispatcher.shutdown(None);
}

#[test]
fn concurrent_first_use_starts_once() {
    let dispatcher = Arc::new(dispatcher("first-use"));
    let barrier = Arc::new(Barrier::new(CALLERS));

    let callers: Vec<_> = (0..CALLERS)
        .map(|_| {
            let dispatcher = Arc::clone(&dispatcher);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                dispatcher.start().unwrap();
                dispatcher.worker().scheduler_thread_id()
            })
        })
        .collect();

    let ids: HashSet<_> = callers
        .into_iter()
        .map(|caller| caller.join().unwrap())
        .collect();
    assert_eq!(ids.len(), 1);
    assert!(ids.into_iter().next().flatten().is_some());
    dispatcher.shutdown(None);
}

#[test]
fn tasks_interleave_on_the_scheduler() {
    // Ten 100 ms sleeps finish together, not back to back.
    let dispatcher = dispatcher("interleave");
    let started = Instant::now();
    let handles: Vec<_> = (0..10)
        .map(|i| dispatcher.execute_async(sleepy(i, 100)))
        .collect();
    for handle in handles {
        handle.result(Some(PATIENCE)).unwrap();
    }
    assert!(started.elapsed() < Duration::from_millis(900));
    dispatcher.shutdown(None);
}

#[test]
fn throughput_flavor_is_functionally_transparent() {
    let dispatcher = throughput_dispatcher("throughput");
    let values: Vec<u32> = (0..50)
        .map(|i| dispatcher.execute_async(sleepy(i, 1)))
        .collect::<Vec<_>>()
        .into_iter()
        .map(|handle| handle.result(Some(PATIENCE)).unwrap())
        .collect();
    assert_eq!(values, (0..50).collect::<Vec<_>>());
    dispatcher.shutdown(None);
}
