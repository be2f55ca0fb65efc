// Copyright 2026 the spindle authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Invoker wrapper policies driven through a real scheduler thread.

use spindle::{
    ActionQueue, InvokePrioritized, Invoker, Promise, async_via,
    create_bounded_concurrency_invoker, create_prioritized_invoker, create_serialized_invoker,
    wait_for,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt;

fn init_tracing() -> tracing::subscriber::DefaultGuard {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_thread_names(true)
        .with_test_writer()
        .set_default()
}

const WAIT_BUDGET: Duration = Duration::from_secs(10);

/// A future that completes on a helper thread after `delay`.
fn delayed_future(delay: Duration) -> spindle::Future<()> {
    let promise = Promise::new();
    let future = promise.future();
    thread::spawn(move || {
        thread::sleep(delay);
        promise.try_set(());
    });
    future
}

fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
    let deadline = Instant::now() + WAIT_BUDGET;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn bounded_concurrency_never_exceeds_the_limit() {
    let _trace = init_tracing();
    let queue = ActionQueue::new("bounded");
    let bounded = create_bounded_concurrency_invoker(queue.invoker(), 3, "bounded-3");

    let in_flight = Arc::new(AtomicUsize::new(0));
    let high_water = Arc::new(AtomicUsize::new(0));

    let started = Instant::now();
    let results: Vec<_> = (0..10)
        .map(|_| {
            let in_flight = Arc::clone(&in_flight);
            let high_water = Arc::clone(&high_water);
            async_via(&bounded, move || {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                high_water.fetch_max(now, Ordering::SeqCst);

                // Parked time counts against the concurrency budget.
                let _ = wait_for(&delayed_future(Duration::from_millis(30)));

                in_flight.fetch_sub(1, Ordering::SeqCst);
            })
        })
        .collect();

    for result in &results {
        assert!(result.wait_timeout(WAIT_BUDGET));
        assert_eq!(result.try_get(), Some(Ok(())));
    }

    assert!(high_water.load(Ordering::SeqCst) <= 3);
    // Ten 30 ms waits through a window of three take at least four batches.
    assert!(started.elapsed() >= Duration::from_millis(60));

    queue.shutdown();
}

#[test]
fn prioritized_runs_highest_pending_first() {
    let _trace = init_tracing();
    let queue = ActionQueue::new("prioritized");
    let prioritized = create_prioritized_invoker(queue.invoker());

    // Hold the scheduler thread hostage until every submission is in, so all
    // drivers see the fully populated heap.
    let gate = Promise::<()>::new();
    {
        let gate_future = gate.future();
        queue.invoker().invoke(Box::new(move || {
            let _ = gate_future.get();
        }));
    }

    let completed: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
    let mut submitted = Vec::new();
    for index in 0..100i64 {
        let priority = index * 7 % 3 + 1;
        submitted.push(priority);
        let completed = Arc::clone(&completed);
        prioritized.invoke_with_priority(
            Box::new(move || {
                completed.lock().unwrap().push(priority);
            }),
            priority,
        );
    }
    gate.set(());

    wait_until(|| completed.lock().unwrap().len() == 100, "all callbacks");

    let completed = completed.lock().unwrap().clone();
    // Every driver popped the maximum of what was pending, so the completed
    // priorities are exactly the submitted ones in non-increasing order.
    let mut expected = submitted;
    expected.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(completed, expected);

    queue.shutdown();
}

#[test]
fn serialized_callbacks_never_overlap() {
    let _trace = init_tracing();
    // Several pool threads, but the serialized wrapper admits one at a time.
    let pool = spindle::ThreadPool::new(4, "serialized-pool");
    let serialized = create_serialized_invoker(pool.invoker());

    let running = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));
    let overlapped = Arc::new(AtomicUsize::new(0));

    for _ in 0..50 {
        let running = Arc::clone(&running);
        let completed = Arc::clone(&completed);
        let overlapped = Arc::clone(&overlapped);
        serialized.invoke(Box::new(move || {
            if running.fetch_add(1, Ordering::SeqCst) != 0 {
                overlapped.fetch_add(1, Ordering::SeqCst);
            }
            // Enough work to expose overlap across the pool's threads.
            std::hint::black_box(&mut [0u8; 64]);
            running.fetch_sub(1, Ordering::SeqCst);
            completed.fetch_add(1, Ordering::SeqCst);
        }));
    }

    wait_until(|| completed.load(Ordering::SeqCst) == 50, "all callbacks");
    assert_eq!(overlapped.load(Ordering::SeqCst), 0);

    pool.shutdown();
}
