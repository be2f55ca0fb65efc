// Copyright 2026 the spindle authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::future::{Future, Promise};
use crate::invoker::{Callback, Invoker, InvokerRef};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use crossbeam_queue::SegQueue;
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

/// An invoker whose submission to the underlying invoker can be paused.
///
/// While suspended, `invoke` still queues callbacks; they are handed to the
/// underlying invoker again on [`resume`](SuspendableInvoker::resume).
pub struct SuspendableInvoker {
    underlying: InvokerRef,
    queue: SegQueue<Callback>,
    suspended: AtomicBool,
    active: AtomicUsize,
    drained: spin::Mutex<Option<Promise<()>>>,
    weak: Weak<SuspendableInvoker>,
}

/// Creates a suspendable wrapper around `underlying`.
pub fn create_suspendable_invoker(underlying: InvokerRef) -> Arc<SuspendableInvoker> {
    Arc::new_cyclic(|weak| SuspendableInvoker {
        underlying,
        queue: SegQueue::new(),
        suspended: AtomicBool::new(false),
        active: AtomicUsize::new(0),
        drained: spin::Mutex::new(None),
        weak: weak.clone(),
    })
}

// === impl SuspendableInvoker ===

impl SuspendableInvoker {
    /// Stops handing callbacks to the underlying invoker. The returned future
    /// completes once every callback already handed over has finished.
    ///
    /// # Panics
    ///
    /// Panics if already suspended.
    pub fn suspend(&self) -> Future<()> {
        let was_suspended = self.suspended.swap(true, Ordering::AcqRel);
        assert!(!was_suspended, "invoker is already suspended");

        let promise = Promise::new();
        let future = promise.future();
        *self.drained.lock() = Some(promise);

        if self.active.load(Ordering::Acquire) == 0 {
            self.complete_drained();
        }
        future
    }

    /// Resumes handing queued callbacks to the underlying invoker.
    ///
    /// # Panics
    ///
    /// Panics if not suspended.
    pub fn resume(&self) {
        let was_suspended = self.suspended.swap(false, Ordering::AcqRel);
        assert!(was_suspended, "invoker is not suspended");
        self.schedule_more();
    }

    /// Whether the invoker is currently suspended.
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    fn complete_drained(&self) {
        if let Some(promise) = self.drained.lock().take() {
            promise.try_set(());
        }
    }

    fn schedule_more(&self) {
        while !self.suspended.load(Ordering::Acquire) {
            let Some(callback) = self.queue.pop() else {
                break;
            };

            self.active.fetch_add(1, Ordering::AcqRel);
            let this = self.weak.upgrade().expect("suspendable invoker vanished");
            self.underlying.invoke(Box::new(move || {
                let _guard = ActiveGuard { owner: this };
                callback();
            }));
        }
    }
}

impl Invoker for SuspendableInvoker {
    fn invoke(&self, callback: Callback) {
        self.queue.push(callback);
        self.schedule_more();
    }

    fn thread_id(&self) -> Option<ThreadId> {
        self.underlying.thread_id()
    }
}

struct ActiveGuard {
    owner: Arc<SuspendableInvoker>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if self.owner.active.fetch_sub(1, Ordering::AcqRel) == 1
            && self.owner.suspended.load(Ordering::Acquire)
        {
            self.owner.complete_drained();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::test_util::{CollectInvoker, ImmediateInvoker};
    use std::sync::Mutex;

    #[test]
    fn suspend_holds_back_new_work() {
        let collect = Arc::new(CollectInvoker::default());
        let invoker = create_suspendable_invoker(Arc::clone(&collect) as InvokerRef);

        let drained = invoker.suspend();
        assert!(drained.is_set());

        invoker.invoke(Box::new(|| {}));
        invoker.invoke(Box::new(|| {}));
        assert_eq!(collect.pending(), 0);

        invoker.resume();
        assert_eq!(collect.pending(), 2);
        collect.run_all();
    }

    #[test]
    fn suspend_completes_after_inflight_drain() {
        let collect = Arc::new(CollectInvoker::default());
        let invoker = create_suspendable_invoker(Arc::clone(&collect) as InvokerRef);

        let ran = Arc::new(Mutex::new(0));
        {
            let ran = Arc::clone(&ran);
            invoker.invoke(Box::new(move || *ran.lock().unwrap() += 1));
        }
        assert_eq!(collect.pending(), 1);

        let drained = invoker.suspend();
        assert!(!drained.is_set());

        collect.run_all();
        assert!(drained.is_set());
        assert_eq!(*ran.lock().unwrap(), 1);

        invoker.resume();
    }

    #[test]
    fn immediate_underlying_runs_inline() {
        let invoker = create_suspendable_invoker(Arc::new(ImmediateInvoker));
        let ran = Arc::new(Mutex::new(0));
        {
            let ran = Arc::clone(&ran);
            invoker.invoke(Box::new(move || *ran.lock().unwrap() += 1));
        }
        assert_eq!(*ran.lock().unwrap(), 1);
    }
}
