// Copyright 2026 the spindle authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! End-to-end scheduling behavior on a single action queue.

use spindle::{
    ActionQueue, FutureError, Invoker, Promise, async_via, current_fiber_canceler,
    current_fiber_id, subscribe_context_switched, wait_for, with_fiber_local, yield_now,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
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

#[test]
fn ping_pong() {
    let _trace = init_tracing();
    let queue = ActionQueue::new("ping-pong");

    const ROUNDS: u32 = 100;
    let log: Arc<Mutex<Vec<(&str, u32)>>> = Arc::new(Mutex::new(Vec::new()));

    let player = |tag: &'static str| {
        let log = Arc::clone(&log);
        move || {
            let my_id = current_fiber_id();
            assert!(my_id.is_valid());
            for round in 0..ROUNDS {
                log.lock().unwrap().push((tag, round));
                yield_now();
                // The fiber's identity is stable across yields.
                assert_eq!(current_fiber_id(), my_id);
            }
        }
    };

    // Hold the thread until both players are queued, so neither gets a head
    // start.
    let gate = Promise::<()>::new();
    {
        let gate_future = gate.future();
        queue.invoker().invoke(Box::new(move || {
            let _ = gate_future.get();
        }));
    }

    let a = async_via(&queue.invoker(), player("a"));
    let b = async_via(&queue.invoker(), player("b"));
    gate.set(());

    assert!(a.wait_timeout(WAIT_BUDGET));
    assert!(b.wait_timeout(WAIT_BUDGET));
    assert_eq!(a.try_get(), Some(Ok(())));
    assert_eq!(b.try_get(), Some(Ok(())));

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 2 * ROUNDS as usize);

    // Yielding hands the thread over every time: the two fibers strictly
    // alternate, neither starves.
    for window in log.windows(2) {
        assert_ne!(window[0].0, window[1].0, "a fiber ran twice in a row");
    }
    for tag in ["a", "b"] {
        let rounds: Vec<u32> = log
            .iter()
            .filter(|(t, _)| *t == tag)
            .map(|(_, round)| *round)
            .collect();
        assert_eq!(rounds, (0..ROUNDS).collect::<Vec<_>>());
    }

    queue.shutdown();
}

#[test]
fn cancel_while_sleeping() {
    let _trace = init_tracing();
    let queue = ActionQueue::new("cancel");

    let promise = Promise::<u32>::new();
    let future = promise.future();
    let reached_after_wait = Arc::new(AtomicBool::new(false));

    let (canceler_tx, canceler_rx) = mpsc::channel();
    let (parked_tx, parked_rx) = mpsc::channel();

    let submitted = {
        let future = future.clone();
        let reached_after_wait = Arc::clone(&reached_after_wait);
        async_via(&queue.invoker(), move || {
            canceler_tx.send(current_fiber_canceler()).unwrap();
            // Fires inside wait_for, after the awaited future is recorded but
            // before the fiber leaves the thread.
            subscribe_context_switched(Box::new(move || {
                let _ = parked_tx.send(());
            }));
            let _ = wait_for(&future);
            reached_after_wait.store(true, Ordering::Relaxed);
        })
    };

    let canceler = canceler_rx.recv_timeout(WAIT_BUDGET).unwrap();
    parked_rx.recv_timeout(WAIT_BUDGET).unwrap();
    canceler.cancel();

    // The canceled fiber unwinds instead of returning from wait_for, so the
    // result promise is dropped unset.
    assert!(submitted.wait_timeout(WAIT_BUDGET));
    assert_eq!(submitted.try_get(), Some(Err(FutureError::Abandoned)));
    assert!(!reached_after_wait.load(Ordering::Relaxed));

    // The awaited future observed the cancellation request.
    assert!(future.is_canceled());

    queue.shutdown();
}

#[test]
fn wait_for_delivers_errors_as_values() {
    let _trace = init_tracing();
    let queue = ActionQueue::new("errors");

    let promise = Promise::<u32>::new();
    let future = promise.future();

    let observed = {
        let future = future.clone();
        async_via(&queue.invoker(), move || wait_for(&future))
    };

    drop(promise);

    assert!(observed.wait_timeout(WAIT_BUDGET));
    assert_eq!(observed.try_get(), Some(Ok(Err(FutureError::Abandoned))));

    queue.shutdown();
}

#[test]
fn wait_for_completed_future_still_round_trips() {
    let _trace = init_tracing();
    let queue = ActionQueue::new("round-trip");

    let result = async_via(&queue.invoker(), || {
        let ready = spindle::Future::ready(7);
        wait_for(&ready).expect("ready future cannot fail")
    });

    assert!(result.wait_timeout(WAIT_BUDGET));
    assert_eq!(result.try_get(), Some(Ok(7)));

    queue.shutdown();
}

#[test]
fn fiber_locals_travel_with_the_fiber() {
    let _trace = init_tracing();
    let queue = ActionQueue::new("fls");

    static DESTROYED: AtomicUsize = AtomicUsize::new(0);
    let slot = spindle::fls::reserve_slot(Some(|value| {
        DESTROYED.fetch_add(value, Ordering::Relaxed);
    }));

    let done = async_via(&queue.invoker(), move || {
        with_fiber_local(slot, |value| *value = 17);
        yield_now();
        // The slot value survives the round trip through the scheduler.
        with_fiber_local(slot, |value| assert_eq!(*value, 17));
    });

    assert!(done.wait_timeout(WAIT_BUDGET));
    assert_eq!(done.try_get(), Some(Ok(())));

    // Shutting the queue down destroys its fibers, which runs the slot
    // destructor on the recorded value.
    queue.shutdown();

    let deadline = Instant::now() + WAIT_BUDGET;
    while DESTROYED.load(Ordering::Relaxed) != 17 {
        assert!(Instant::now() < deadline, "fls destructor never ran");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn parked_fiber_unwinds_when_its_invoker_drains() {
    let _trace = init_tracing();
    let queue = ActionQueue::new("unwind");

    let promise = Promise::<u32>::new();
    let future = promise.future();
    let reached_after_wait = Arc::new(AtomicBool::new(false));
    let (parked_tx, parked_rx) = mpsc::channel();

    let submitted = {
        let future = future.clone();
        let reached_after_wait = Arc::clone(&reached_after_wait);
        async_via(&queue.invoker(), move || {
            subscribe_context_switched(Box::new(move || {
                let _ = parked_tx.send(());
            }));
            let _ = wait_for(&future);
            reached_after_wait.store(true, Ordering::Relaxed);
        })
    };

    parked_rx.recv_timeout(WAIT_BUDGET).unwrap();

    // The fiber is parked on the future with the queue as its resume target;
    // take that target away, then complete the future. The resumer gets
    // dropped by the drained queue and the unwinder path takes over: the
    // fiber is canceled and unwound on the finalizer thread.
    queue.shutdown();
    promise.set(1);

    assert!(submitted.wait_timeout(WAIT_BUDGET));
    assert_eq!(submitted.try_get(), Some(Err(FutureError::Abandoned)));
    assert!(!reached_after_wait.load(Ordering::Relaxed));
}

#[test]
fn submissions_to_a_shut_down_queue_are_dropped() {
    let _trace = init_tracing();
    let queue = ActionQueue::new("drops");
    let invoker = queue.invoker();
    queue.shutdown();

    let result = async_via(&invoker, || 1);
    assert!(result.wait_timeout(WAIT_BUDGET));
    // The callback never ran; its promise was released unset.
    assert_eq!(result.try_get(), Some(Err(FutureError::Abandoned)));
}
