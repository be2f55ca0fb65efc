// Copyright 2026 the spindle authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Invoker queues: FIFO queues of callbacks paired with the scheduler's
//! execution bookkeeping.

use crate::event_count::EventCount;
use crate::invoker::{Callback, Invoker, InvokerRef};
use crate::profiling::{self, QueueCounters, TagSet};
use crate::scheduler;
use core::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use crossbeam_queue::SegQueue;
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Instant;

const MAX_TRY_DEQUEUE: usize = 100;

/// A callback plus the timestamps the queue records around its execution.
pub(crate) struct EnqueuedAction {
    pub(crate) finished: bool,
    pub(crate) enqueued_at: Instant,
    pub(crate) started_at: Instant,
    pub(crate) finished_at: Instant,
    pub(crate) callback: Option<Callback>,
}

impl Default for EnqueuedAction {
    fn default() -> Self {
        let now = Instant::now();
        Self {
            finished: true,
            enqueued_at: now,
            started_at: now,
            finished_at: now,
            callback: None,
        }
    }
}

/// Interior of an invoker queue; fixes the producer/consumer discipline.
pub(crate) trait QueueImpl: Default + Send + Sync + 'static {
    /// Whether [`try_dequeue`](Self::try_dequeue) may be called concurrently.
    const SINGLE_CONSUMER: bool;

    fn enqueue(&self, action: EnqueuedAction);
    fn try_dequeue(&self) -> Option<EnqueuedAction>;
    /// Discards all queued actions, returning how many were dropped.
    fn drain(&self) -> usize;
    fn is_empty(&self) -> bool;
}

/// Multi-producer single-consumer interior.
#[derive(Default)]
pub(crate) struct MpscQueueImpl {
    queue: SegQueue<EnqueuedAction>,
}

impl QueueImpl for MpscQueueImpl {
    const SINGLE_CONSUMER: bool = true;

    fn enqueue(&self, action: EnqueuedAction) {
        self.queue.push(action);
    }

    fn try_dequeue(&self) -> Option<EnqueuedAction> {
        self.queue.pop()
    }

    fn drain(&self) -> usize {
        let mut drained = 0;
        while self.queue.pop().is_some() {
            drained += 1;
        }
        drained
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Multi-producer multi-consumer interior, used by thread pools.
///
/// A separate size counter arbitrates between concurrent consumers; a
/// consumer that won the counter may still race the producer's push and has
/// to spin-retry the dequeue a bounded number of times.
#[derive(Default)]
pub(crate) struct MpmcQueueImpl {
    queue: SegQueue<EnqueuedAction>,
    size: AtomicIsize,
}

impl QueueImpl for MpmcQueueImpl {
    const SINGLE_CONSUMER: bool = false;

    fn enqueue(&self, action: EnqueuedAction) {
        self.queue.push(action);
        self.size.fetch_add(1, Ordering::Release);
    }

    fn try_dequeue(&self) -> Option<EnqueuedAction> {
        if self.size.load(Ordering::Acquire) <= 0 {
            return None;
        }

        // Fast path.
        if self.size.fetch_sub(1, Ordering::AcqRel) <= 0 {
            self.size.fetch_add(1, Ordering::AcqRel);

            // Slow path.
            let mut queue_size = self.size.load(Ordering::Acquire);
            loop {
                if queue_size <= 0 {
                    return None;
                }
                match self.size.compare_exchange_weak(
                    queue_size,
                    queue_size - 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => break,
                    Err(actual) => queue_size = actual,
                }
            }
        }

        for try_index in 0..MAX_TRY_DEQUEUE {
            if let Some(action) = self.queue.pop() {
                if try_index > 1 {
                    tracing::debug!(try_index, "action has been dequeued");
                }
                return Some(action);
            }
            core::hint::spin_loop();
        }

        // The size counter said an action must be there; losing it means the
        // counter and the queue are out of sync.
        panic!("invoker queue size counter out of sync with the queue");
    }

    fn drain(&self) -> usize {
        let mut size = self.size.swap(0, Ordering::AcqRel);
        let mut drained = 0;
        while size > 0 {
            if self.queue.pop().is_some() {
                drained += 1;
            }
            size -= 1;
        }
        drained
    }

    fn is_empty(&self) -> bool {
        self.size.load(Ordering::Acquire) <= 0
    }
}

/// A FIFO queue of callbacks shared between producers and the scheduler
/// thread(s) consuming it.
pub(crate) struct InvokerQueue<Q: QueueImpl> {
    queue_impl: Q,
    callback_event_count: Arc<EventCount>,
    running: AtomicBool,
    thread_id: spin::Mutex<Option<ThreadId>>,
    counters: Arc<QueueCounters>,
    weak: std::sync::Weak<InvokerQueue<Q>>,
}

pub(crate) type MpscInvokerQueue = InvokerQueue<MpscQueueImpl>;
pub(crate) type MpmcInvokerQueue = InvokerQueue<MpmcQueueImpl>;

// === impl InvokerQueue ===

impl<Q: QueueImpl> InvokerQueue<Q> {
    pub fn new(callback_event_count: Arc<EventCount>, tags: TagSet) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            queue_impl: Q::default(),
            callback_event_count,
            running: AtomicBool::new(true),
            thread_id: spin::Mutex::new(None),
            counters: profiling::register_queue(tags),
            weak: weak.clone(),
        })
    }

    pub fn set_thread_id(&self, thread_id: ThreadId) {
        *self.thread_id.lock() = Some(thread_id);
    }

    /// Single-consumer operation (multi-consumer for the MPMC variant):
    /// dequeues the next action into `*action` and returns its callback for
    /// the caller to run. Returns `None` when the queue is empty, after
    /// canceling the caller's wait token.
    pub fn begin_execute(&self, action: &mut EnqueuedAction) -> Option<Callback> {
        debug_assert!(action.finished);

        #[cfg(debug_assertions)]
        if Q::SINGLE_CONSUMER {
            if let Some(thread_id) = *self.thread_id.lock() {
                debug_assert_eq!(
                    thread_id,
                    std::thread::current().id(),
                    "single-consumer queue pumped from a foreign thread"
                );
            }
        }

        let Some(dequeued) = self.queue_impl.try_dequeue() else {
            self.callback_event_count.cancel_wait();
            return None;
        };
        *action = dequeued;
        action.started_at = Instant::now();

        self.counters.dequeued.increment();
        self.counters
            .wait_time
            .record(action.started_at.duration_since(action.enqueued_at));

        // Publish ourselves as the invoker of whatever fiber runs this
        // callback.
        if let Some(this) = self.weak.upgrade() {
            let invoker: InvokerRef = this as InvokerRef;
            scheduler::with_current_fiber(|fiber| {
                fiber.swap_current_invoker(Some(invoker));
            });
        }

        action.callback.take()
    }

    /// Completes the accounting for the action begun by
    /// [`begin_execute`](Self::begin_execute). Idempotent: the first call
    /// (whether from the fiber-main loop or the thread-main loop) wins.
    pub fn end_execute(&self, action: &mut EnqueuedAction) {
        if action.finished {
            return;
        }

        action.finished_at = Instant::now();
        action.finished = true;

        self.counters.size.add(-1);
        self.counters
            .exec_time
            .record(action.finished_at.duration_since(action.started_at));
        self.counters
            .total_time
            .record(action.finished_at.duration_since(action.enqueued_at));
    }

    /// Stops accepting work. Already queued actions still run; use
    /// [`drain`](Self::drain) after the consumer stopped to discard them.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Discards every queued action. Only legal after
    /// [`shutdown`](Self::shutdown).
    pub fn drain(&self) {
        assert!(
            !self.running.load(Ordering::Relaxed),
            "queue must be shut down before draining"
        );
        let dropped = self.queue_impl.drain();
        if dropped > 0 {
            self.counters.size.add(-(dropped as i64));
            tracing::debug!(dropped, "drained invoker queue");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue_impl.is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

impl<Q: QueueImpl> Invoker for InvokerQueue<Q> {
    fn invoke(&self, callback: Callback) {
        tracing::trace!("callback enqueued");

        self.counters.enqueued.increment();
        self.counters.size.add(1);

        self.queue_impl.enqueue(EnqueuedAction {
            finished: false,
            enqueued_at: Instant::now(),
            started_at: Instant::now(),
            finished_at: Instant::now(),
            callback: Some(callback),
        });

        if !self.running.load(Ordering::Relaxed) {
            let dropped = self.queue_impl.drain();
            self.counters.size.add(-(dropped as i64));
            tracing::trace!("queue had been shut down, incoming action ignored");
            return;
        }

        self.callback_event_count.notify_one();
    }

    fn thread_id(&self) -> Option<ThreadId> {
        *self.thread_id.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn queue() -> Arc<MpscInvokerQueue> {
        InvokerQueue::new(Arc::new(EventCount::new()), TagSet::default())
    }

    fn push_marker(queue: &Arc<MpscInvokerQueue>, order: &Arc<std::sync::Mutex<Vec<u32>>>, n: u32) {
        let order = Arc::clone(order);
        queue.invoke(Box::new(move || {
            order.lock().unwrap().push(n);
        }));
    }

    #[test]
    fn fifo_order() {
        let queue = queue();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for n in 0..10 {
            push_marker(&queue, &order, n);
        }

        let mut action = EnqueuedAction::default();
        while let Some(callback) = queue.begin_execute(&mut action) {
            callback();
            queue.end_execute(&mut action);
        }

        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
        assert!(queue.is_empty());
        assert_eq!(queue.counters.size.get(), 0);
        assert_eq!(queue.counters.dequeued.get(), 10);
    }

    #[test]
    fn end_execute_is_idempotent() {
        let queue = queue();
        queue.invoke(Box::new(|| {}));

        let mut action = EnqueuedAction::default();
        let callback = queue.begin_execute(&mut action).unwrap();
        callback();
        queue.end_execute(&mut action);
        queue.end_execute(&mut action);
        assert_eq!(queue.counters.size.get(), 0);
    }

    #[test]
    fn shutdown_drops_new_work() {
        let queue = queue();
        let ran = Arc::new(AtomicUsize::new(0));

        queue.shutdown();
        assert!(!queue.is_running());

        let ran2 = Arc::clone(&ran);
        queue.invoke(Box::new(move || {
            ran2.fetch_add(1, Ordering::Relaxed);
        }));

        assert!(queue.is_empty());
        let mut action = EnqueuedAction::default();
        assert!(queue.begin_execute(&mut action).is_none());
        assert_eq!(ran.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn drain_discards_queued_work() {
        let queue = queue();
        for _ in 0..5 {
            queue.invoke(Box::new(|| panic!("must not run")));
        }
        queue.shutdown();
        queue.drain();
        assert!(queue.is_empty());
        assert_eq!(queue.counters.size.get(), 0);
    }

    #[test]
    fn mpmc_counter_dance() {
        let queue: Arc<MpmcInvokerQueue> =
            InvokerQueue::new(Arc::new(EventCount::new()), TagSet::default());
        for _ in 0..4 {
            queue.invoke(Box::new(|| {}));
        }

        let mut action = EnqueuedAction::default();
        let mut dequeued = 0;
        while let Some(callback) = queue.begin_execute(&mut action) {
            callback();
            queue.end_execute(&mut action);
            dequeued += 1;
        }
        assert_eq!(dequeued, 4);
        assert!(queue.is_empty());
    }
}
