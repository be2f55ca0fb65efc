// Copyright 2026 the spindle authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::invoker::{Callback, Invoker, InvokerRef};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

/// An invoker that additionally accepts a priority per callback; higher
/// priorities run first.
pub trait InvokePrioritized: Invoker {
    /// Submits a callback with a priority. Reordering happens relative to
    /// other callbacks submitted through this method; plain
    /// [`invoke`](Invoker::invoke) bypasses the priority queue.
    fn invoke_with_priority(&self, callback: Callback, priority: i64);
}

/// Shared handle to an [`InvokePrioritized`] invoker.
pub type PrioritizedInvokerRef = Arc<dyn InvokePrioritized>;

struct Entry {
    callback: Callback,
    priority: i64,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority.cmp(&other.priority)
    }
}

/// One driver is submitted to the underlying invoker per prioritized
/// submission, but each driver pops the *current* maximum: a driver may well
/// run a different callback than the one whose submission triggered it. That
/// is what makes late high-priority submissions overtake earlier pending
/// work.
struct PrioritizedInvoker {
    underlying: InvokerRef,
    heap: spin::Mutex<BinaryHeap<Entry>>,
    weak: Weak<PrioritizedInvoker>,
}

/// Creates a wrapper around an invoker that supports callback reordering.
/// Callbacks with the highest priority are executed first.
pub fn create_prioritized_invoker(underlying: InvokerRef) -> PrioritizedInvokerRef {
    Arc::new_cyclic(|weak| PrioritizedInvoker {
        underlying,
        heap: spin::Mutex::new(BinaryHeap::new()),
        weak: weak.clone(),
    })
}

// === impl PrioritizedInvoker ===

impl PrioritizedInvoker {
    fn do_execute(&self) {
        let entry = {
            let mut heap = self.heap.lock();
            heap.pop().expect("prioritized driver found an empty heap")
        };
        (entry.callback)();
    }
}

impl Invoker for PrioritizedInvoker {
    fn invoke(&self, callback: Callback) {
        self.underlying.invoke(callback);
    }

    fn thread_id(&self) -> Option<ThreadId> {
        self.underlying.thread_id()
    }
}

impl InvokePrioritized for PrioritizedInvoker {
    fn invoke_with_priority(&self, callback: Callback, priority: i64) {
        self.heap.lock().push(Entry { callback, priority });

        let this = self.weak.upgrade().expect("prioritized invoker vanished");
        self.underlying.invoke(Box::new(move || this.do_execute()));
    }
}

/// A prioritized invoker that does not actually reorder anything; priorities
/// are ignored.
struct FakePrioritizedInvoker {
    underlying: InvokerRef,
}

/// Creates a wrapper that implements the prioritized interface but performs
/// no reordering.
pub fn create_fake_prioritized_invoker(underlying: InvokerRef) -> PrioritizedInvokerRef {
    Arc::new(FakePrioritizedInvoker { underlying })
}

impl Invoker for FakePrioritizedInvoker {
    fn invoke(&self, callback: Callback) {
        self.underlying.invoke(callback);
    }

    fn thread_id(&self) -> Option<ThreadId> {
        self.underlying.thread_id()
    }
}

impl InvokePrioritized for FakePrioritizedInvoker {
    fn invoke_with_priority(&self, callback: Callback, _priority: i64) {
        self.underlying.invoke(callback);
    }
}

/// Presents a prioritized invoker as a plain invoker with a fixed priority.
struct FixedPriorityInvoker {
    underlying: PrioritizedInvokerRef,
    priority: i64,
}

/// Creates a wrapper around a prioritized invoker turning it into a regular
/// invoker. All callbacks are propagated with the given fixed priority.
pub fn create_fixed_priority_invoker(
    underlying: PrioritizedInvokerRef,
    priority: i64,
) -> InvokerRef {
    Arc::new(FixedPriorityInvoker {
        underlying,
        priority,
    })
}

impl Invoker for FixedPriorityInvoker {
    fn invoke(&self, callback: Callback) {
        self.underlying
            .invoke_with_priority(callback, self.priority);
    }

    fn thread_id(&self) -> Option<ThreadId> {
        self.underlying.thread_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::test_util::{CollectInvoker, ImmediateInvoker};
    use std::sync::Mutex;

    fn record(order: &Arc<Mutex<Vec<i64>>>, n: i64) -> Callback {
        let order = Arc::clone(order);
        Box::new(move || order.lock().unwrap().push(n))
    }

    #[test]
    fn drivers_pop_the_current_max() {
        let collect = Arc::new(CollectInvoker::default());
        let invoker = create_prioritized_invoker(Arc::clone(&collect) as InvokerRef);
        let order = Arc::new(Mutex::new(Vec::new()));

        // All three land before any driver runs; the drivers then pop in
        // priority order, regardless of which submission queued them.
        invoker.invoke_with_priority(record(&order, 1), 1);
        invoker.invoke_with_priority(record(&order, 3), 3);
        invoker.invoke_with_priority(record(&order, 2), 2);
        assert_eq!(collect.pending(), 3);

        // The first driver (submitted for the priority-1 entry) runs the
        // priority-3 callback.
        assert!(collect.run_next());
        assert_eq!(*order.lock().unwrap(), vec![3]);

        collect.run_all();
        assert_eq!(*order.lock().unwrap(), vec![3, 2, 1]);
    }

    #[test]
    fn fixed_priority_forwards() {
        let collect = Arc::new(CollectInvoker::default());
        let prioritized = create_prioritized_invoker(Arc::clone(&collect) as InvokerRef);
        let order = Arc::new(Mutex::new(Vec::new()));

        let low = create_fixed_priority_invoker(Arc::clone(&prioritized), 1);
        let high = create_fixed_priority_invoker(prioritized, 10);

        low.invoke(record(&order, 1));
        high.invoke(record(&order, 10));

        collect.run_all();
        assert_eq!(*order.lock().unwrap(), vec![10, 1]);
    }

    #[test]
    fn fake_prioritized_keeps_submission_order() {
        let invoker = create_fake_prioritized_invoker(Arc::new(ImmediateInvoker));
        let order = Arc::new(Mutex::new(Vec::new()));

        invoker.invoke_with_priority(record(&order, 1), 1);
        invoker.invoke_with_priority(record(&order, 3), 3);

        assert_eq!(*order.lock().unwrap(), vec![1, 3]);
    }
}
