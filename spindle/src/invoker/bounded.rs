// Copyright 2026 the spindle authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::invoker::{Callback, CurrentInvokerGuard, Invoker, InvokerRef};
use crate::profiling::{self, SemaphoreCounters};
use core::cell::Cell;
use core::sync::atomic::{AtomicIsize, Ordering};
use crossbeam_queue::SegQueue;
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

thread_local! {
    /// Guards against reentrant schedule_more from the same thread (the
    /// underlying invoker may run or drop a driver inside invoke()).
    static CURRENT_SCHEDULING_INVOKER: Cell<*const ()> = const { Cell::new(core::ptr::null()) };
}

/// Runs callbacks through the underlying invoker, with at most
/// `max_concurrent` of them in flight at any moment. A callback counts as in
/// flight from its start until it finishes, *including* time parked in
/// `wait_for`.
struct BoundedConcurrencyInvoker {
    underlying: InvokerRef,
    max_concurrent: isize,
    semaphore: AtomicIsize,
    queue: SegQueue<Callback>,
    counters: Arc<SemaphoreCounters>,
    weak: Weak<BoundedConcurrencyInvoker>,
}

/// Creates an invoker that executes all callbacks in the context of
/// `underlying` allowing up to `max_concurrent` outstanding invocations.
pub fn create_bounded_concurrency_invoker(
    underlying: InvokerRef,
    max_concurrent: usize,
    invoker_name: &str,
) -> InvokerRef {
    Arc::new_cyclic(|weak| BoundedConcurrencyInvoker {
        underlying,
        max_concurrent: max_concurrent as isize,
        semaphore: AtomicIsize::new(0),
        queue: SegQueue::new(),
        counters: profiling::register_semaphore(profiling::invoker_tags(invoker_name)),
        weak: weak.clone(),
    })
}

// === impl BoundedConcurrencyInvoker ===

impl BoundedConcurrencyInvoker {
    fn this(&self) -> Arc<Self> {
        self.weak.upgrade().expect("bounded invoker vanished")
    }

    fn run_callback(&self, callback: Callback) {
        // The callback observes the underlying invoker as its current one
        // (sic): rescheduling through us would double-count the semaphore.
        let _guard = CurrentInvokerGuard::new(Arc::clone(&self.underlying));
        callback();
    }

    fn on_finished(&self) {
        self.release_semaphore();
        self.schedule_more();
    }

    fn schedule_more(&self) {
        // Prevent reentrant invocations.
        let key = core::ptr::from_ref(self).cast::<()>();
        if CURRENT_SCHEDULING_INVOKER.with(Cell::get) == key {
            return;
        }

        loop {
            if !self.try_acquire_semaphore() {
                break;
            }

            let Some(callback) = self.queue.pop() else {
                self.release_semaphore();
                break;
            };

            let this = self.this();
            let driver: Callback = Box::new(move || {
                let _guard = FinishGuard { owner: this.clone() };
                this.run_callback(callback);
            });

            // If the underlying invoker is already shut down, invoke() may
            // drop the driver (and run the guard) right away; the
            // thread-local blocks the resulting reentrant schedule_more.
            CURRENT_SCHEDULING_INVOKER.with(|current| current.set(key));
            self.underlying.invoke(driver);
            CURRENT_SCHEDULING_INVOKER.with(|current| current.set(core::ptr::null()));
        }
    }

    fn try_acquire_semaphore(&self) -> bool {
        if self.semaphore.fetch_add(1, Ordering::AcqRel) + 1 <= self.max_concurrent {
            self.counters.fill.add(1);
            true
        } else {
            self.semaphore.fetch_sub(1, Ordering::AcqRel);
            false
        }
    }

    fn release_semaphore(&self) {
        let remaining = self.semaphore.fetch_sub(1, Ordering::AcqRel) - 1;
        assert!(remaining >= 0);
        self.counters.fill.add(-1);
    }
}

impl Invoker for BoundedConcurrencyInvoker {
    fn invoke(&self, callback: Callback) {
        self.queue.push(callback);
        self.schedule_more();
    }

    fn thread_id(&self) -> Option<ThreadId> {
        self.underlying.thread_id()
    }
}

struct FinishGuard {
    owner: Arc<BoundedConcurrencyInvoker>,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.owner.on_finished();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::test_util::{CollectInvoker, ImmediateInvoker};
    use std::sync::Mutex;

    #[test]
    fn never_submits_more_than_the_limit() {
        let collect = Arc::new(CollectInvoker::default());
        let invoker =
            create_bounded_concurrency_invoker(Arc::clone(&collect) as InvokerRef, 2, "test-bci");

        for _ in 0..5 {
            invoker.invoke(Box::new(|| {}));
        }
        assert_eq!(collect.pending(), 2);

        // Finishing one admits exactly one more.
        assert!(collect.run_next());
        assert_eq!(collect.pending(), 2);

        collect.run_all();
        assert_eq!(collect.pending(), 0);
    }

    #[test]
    fn runs_everything_inline_under_the_limit() {
        let invoker = create_bounded_concurrency_invoker(Arc::new(ImmediateInvoker), 3, "test-bci");
        let order = Arc::new(Mutex::new(Vec::new()));

        for n in 0..10 {
            let order = Arc::clone(&order);
            invoker.invoke(Box::new(move || order.lock().unwrap().push(n)));
        }

        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }
}
