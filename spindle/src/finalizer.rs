// Copyright 2026 the spindle authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The process-global finalizer thread.
//!
//! A dedicated single-threaded scheduler used by the reschedule protocol's
//! unwinder path and by background cleanup. Started lazily on first use;
//! shut down as the last stage of process teardown. Shutdown waits a bounded
//! amount of time for outstanding invoker handles to drain and aborts the
//! process if they never do, surfacing the leak instead of hanging forever.

use crate::event_count::EventCount;
use crate::future::Promise;
use crate::invoker::{Callback, Invoker, InvokerRef};
use crate::profiling;
use crate::queue::{InvokerQueue, MpscInvokerQueue};
use crate::scheduler::{SchedulerThread, SingleQueueExecutor};
use crate::shutdown::{FINALIZER_SHUTDOWN_PRIORITY, register_shutdown_callback};
use core::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::ThreadId;
use std::time::Duration;

const SHUTDOWN_SPIN_COUNT: usize = 100;
// 30 seconds of 1 ms naps; overrunning this is treated as a leak and aborts.
const REF_DRAIN_ATTEMPTS: usize = 30_000;

static SHUTDOWN_STARTED: AtomicBool = AtomicBool::new(false);
static SHUTDOWN_FINISHED: AtomicBool = AtomicBool::new(false);

struct FinalizerThread {
    queue: Arc<MpscInvokerQueue>,
    thread: Arc<SchedulerThread>,
    /// Live invoker handles plus one reference owned by the registry itself.
    refs: AtomicIsize,
    owning_pid: u32,
}

// === impl FinalizerThread ===

impl FinalizerThread {
    fn new() -> Self {
        let callback_event_count = Arc::new(EventCount::new());
        let queue: Arc<MpscInvokerQueue> = InvokerQueue::new(
            Arc::clone(&callback_event_count),
            profiling::thread_tags("finalizer"),
        );
        let thread = SchedulerThread::new(
            Box::new(SingleQueueExecutor::new(Arc::clone(&queue))),
            callback_event_count,
            "finalizer",
        );

        Self {
            queue,
            thread,
            refs: AtomicIsize::new(1),
            owning_pid: std::process::id(),
        }
    }

    fn ensure_started(&self) {
        self.thread.start();
        if let Some(thread_id) = self.thread.thread_id() {
            self.queue.set_thread_id(thread_id);
        }
    }

    fn is_same_process(&self) -> bool {
        std::process::id() == self.owning_pid
    }

    fn invoke(&self, callback: Callback) {
        assert!(
            !SHUTDOWN_FINISHED.load(Ordering::Acquire),
            "finalizer used after shutdown"
        );
        self.ensure_started();
        self.queue.invoke(callback);
    }

    fn shutdown(&'static self) {
        if SHUTDOWN_STARTED.swap(true, Ordering::AcqRel) {
            while !SHUTDOWN_FINISHED.load(Ordering::Acquire) {
                std::thread::yield_now();
            }
            return;
        }

        // After a fork only the owning process tears the thread down.
        if self.is_same_process() {
            self.ensure_started();

            // Wait until all live invoker handles are gone.
            if self.refs.load(Ordering::Acquire) != 1 {
                for _ in 0..REF_DRAIN_ATTEMPTS {
                    if self.refs.load(Ordering::Acquire) == 1 {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                let refs = self.refs.load(Ordering::Acquire);
                if refs != 1 {
                    // Things have gone really bad; surface the leak.
                    tracing::error!(refs, "finalizer invokers leaked, aborting");
                    eprintln!("hung during finalizer shutdown: {refs} invoker handles leaked");
                    std::process::abort();
                }
            }

            // There might be pending actions (the finalizer may run future
            // destructors which briefly re-enqueue). Round-trip a few times
            // to give them a chance to finish.
            for _ in 0..SHUTDOWN_SPIN_COUNT {
                let promise = Promise::new();
                let future = promise.future();
                self.queue.invoke(Box::new(move || promise.set(())));
                let _ = future.get();
            }

            let drained = self
                .refs
                .compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire);
            assert!(drained.is_ok(), "finalizer invoker resurrected during shutdown");

            self.queue.shutdown();
            self.thread.shutdown();
            self.queue.drain();
        }

        SHUTDOWN_FINISHED.store(true, Ordering::Release);
    }
}

/// An invoker handle counted against the finalizer's shutdown gate: both the
/// handle itself and every pending callback hold a reference.
struct FinalizerInvoker {
    owner: &'static FinalizerThread,
}

impl FinalizerInvoker {
    fn new(owner: &'static FinalizerThread) -> Self {
        let previous = owner.refs.fetch_add(1, Ordering::AcqRel);
        assert!(previous > 0);
        Self { owner }
    }
}

impl Drop for FinalizerInvoker {
    fn drop(&mut self) {
        let previous = self.owner.refs.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0);
    }
}

impl Invoker for FinalizerInvoker {
    fn invoke(&self, callback: Callback) {
        let pending = RefsGuard::new(self.owner);
        self.owner.invoke(Box::new(move || {
            let _pending = pending;
            callback();
        }));
    }

    fn thread_id(&self) -> Option<ThreadId> {
        self.owner.queue.thread_id()
    }
}

struct RefsGuard {
    owner: &'static FinalizerThread,
}

impl RefsGuard {
    fn new(owner: &'static FinalizerThread) -> Self {
        owner.refs.fetch_add(1, Ordering::AcqRel);
        Self { owner }
    }
}

impl Drop for RefsGuard {
    fn drop(&mut self) {
        self.owner.refs.fetch_sub(1, Ordering::AcqRel);
    }
}

static FINALIZER: OnceLock<FinalizerThread> = OnceLock::new();

fn finalizer_thread() -> &'static FinalizerThread {
    FINALIZER.get_or_init(|| {
        register_shutdown_callback(FINALIZER_SHUTDOWN_PRIORITY, shutdown_finalizer_thread);
        FinalizerThread::new()
    })
}

/// Returns a fresh handle to the process-global finalizer invoker, starting
/// the thread on first use.
pub fn finalizer_invoker() -> InvokerRef {
    let thread = finalizer_thread();
    thread.ensure_started();
    Arc::new(FinalizerInvoker::new(thread))
}

/// Stops the finalizer thread. Runs automatically as the last stage of
/// [`shutdown`](crate::shutdown::shutdown); calling it directly is only
/// useful in tests.
pub fn shutdown_finalizer_thread() {
    if let Some(thread) = FINALIZER.get() {
        thread.shutdown();
    } else {
        SHUTDOWN_STARTED.store(true, Ordering::Release);
        SHUTDOWN_FINISHED.store(true, Ordering::Release);
    }
}
