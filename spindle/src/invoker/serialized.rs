// Copyright 2026 the spindle authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::api::ContextSwitchGuard;
use crate::invoker::{Callback, CurrentInvokerGuard, Invoker, InvokerRef};
use core::sync::atomic::{AtomicBool, Ordering};
use crossbeam_queue::SegQueue;
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

/// Runs callbacks through the underlying invoker one at a time, in submission
/// order.
///
/// A callback that parks (context-switches out) releases its exclusive turn:
/// the next queued callback may start while the parked one waits. The lock is
/// released exactly once per submitted driver run; the release flag lives in
/// the per-run state shared between the context-switch handler and the
/// completion guard, so a resumed stale run cannot release a newer run's
/// lock.
struct SerializedInvoker {
    underlying: InvokerRef,
    queue: SegQueue<Callback>,
    lock: AtomicBool,
    weak: Weak<SerializedInvoker>,
}

/// Creates an invoker that executes all callbacks in the context of
/// `underlying` (possibly on different threads) but in a serialized fashion:
/// queued callbacks start in order and no two run at the same time.
pub fn create_serialized_invoker(underlying: InvokerRef) -> InvokerRef {
    Arc::new_cyclic(|weak| SerializedInvoker {
        underlying,
        queue: SegQueue::new(),
        lock: AtomicBool::new(false),
        weak: weak.clone(),
    })
}

// === impl SerializedInvoker ===

impl SerializedInvoker {
    fn this(&self) -> Arc<Self> {
        self.weak.upgrade().expect("serialized invoker vanished")
    }

    fn try_schedule(&self) {
        if self.queue.is_empty() {
            return;
        }

        if !self.lock.swap(true, Ordering::Acquire) {
            let this = self.this();
            // The release action is created at submission time and travels
            // with the driver: if the underlying invoker drops the driver
            // without running it, the guard still releases the lock.
            let finished: Arc<dyn Fn() + Send + Sync> = {
                let this = Arc::clone(&this);
                let released = Arc::new(AtomicBool::new(false));
                Arc::new(move || {
                    if !released.swap(true, Ordering::AcqRel) {
                        this.lock.store(false, Ordering::Release);
                        this.try_schedule();
                    }
                })
            };
            let run_guard = FinishGuard { finished };
            self.underlying
                .invoke(Box::new(move || this.run_callbacks(run_guard)));
        }
    }

    fn run_callbacks(self: Arc<Self>, run_guard: FinishGuard) {
        let finished = Arc::clone(&run_guard.finished);
        let _run_guard = run_guard;
        let _switch_guard = ContextSwitchGuard::new(Box::new(move || finished()));
        let _invoker_guard = CurrentInvokerGuard::new(self.this() as InvokerRef);

        if let Some(callback) = self.queue.pop() {
            callback();
        }
    }
}

impl Invoker for SerializedInvoker {
    fn invoke(&self, callback: Callback) {
        self.queue.push(callback);
        self.try_schedule();
    }

    fn thread_id(&self) -> Option<ThreadId> {
        self.underlying.thread_id()
    }
}

struct FinishGuard {
    finished: Arc<dyn Fn() + Send + Sync>,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        (self.finished)();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::test_util::{CollectInvoker, ImmediateInvoker};
    use std::sync::Mutex;

    #[test]
    fn runs_in_submission_order() {
        let invoker = create_serialized_invoker(Arc::new(ImmediateInvoker));
        let order = Arc::new(Mutex::new(Vec::new()));

        for n in 0..5 {
            let order = Arc::clone(&order);
            invoker.invoke(Box::new(move || {
                order.lock().unwrap().push(n);
            }));
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn one_driver_per_turn() {
        let collect = Arc::new(CollectInvoker::default());
        let invoker = create_serialized_invoker(Arc::clone(&collect) as InvokerRef);

        invoker.invoke(Box::new(|| {}));
        invoker.invoke(Box::new(|| {}));
        invoker.invoke(Box::new(|| {}));

        // Only the lock winner submitted a driver; the rest wait their turn.
        assert_eq!(collect.pending(), 1);

        assert!(collect.run_next());
        assert_eq!(collect.pending(), 1);
        collect.run_all();
        assert_eq!(collect.pending(), 0);
    }

    #[test]
    fn dropped_driver_releases_the_lock() {
        let collect = Arc::new(CollectInvoker::default());
        let invoker = create_serialized_invoker(Arc::clone(&collect) as InvokerRef);

        let ran = Arc::new(Mutex::new(0));
        {
            let ran = Arc::clone(&ran);
            invoker.invoke(Box::new(move || {
                *ran.lock().unwrap() += 1;
            }));
        }

        // Simulate the underlying invoker shutting down: the driver is
        // dropped without running, which must release the lock (and, with
        // work still queued, resubmit a fresh driver).
        collect.drop_all();
        assert_eq!(collect.pending(), 1);

        {
            let ran = Arc::clone(&ran);
            invoker.invoke(Box::new(move || {
                *ran.lock().unwrap() += 1;
            }));
        }
        collect.run_all();

        // The first callback was dequeued by the second driver run.
        assert_eq!(*ran.lock().unwrap(), 2);
    }
}
