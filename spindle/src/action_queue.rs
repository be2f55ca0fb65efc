// Copyright 2026 the spindle authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::event_count::EventCount;
use crate::invoker::InvokerRef;
use crate::profiling;
use crate::queue::{InvokerQueue, MpscInvokerQueue};
use crate::scheduler::{SchedulerThread, SingleQueueExecutor};
use std::sync::Arc;

/// A single named scheduler thread with its own FIFO invoker queue: the
/// simplest way to get an [`InvokerRef`] to run fibers on.
pub struct ActionQueue {
    queue: Arc<MpscInvokerQueue>,
    thread: Arc<SchedulerThread>,
}

// === impl ActionQueue ===

impl ActionQueue {
    pub fn new(thread_name: &str) -> Self {
        let callback_event_count = Arc::new(EventCount::new());
        let queue: Arc<MpscInvokerQueue> = InvokerQueue::new(
            Arc::clone(&callback_event_count),
            profiling::thread_tags(thread_name),
        );
        let thread = SchedulerThread::new(
            Box::new(SingleQueueExecutor::new(Arc::clone(&queue))),
            callback_event_count,
            thread_name,
        );

        thread.start();
        if let Some(thread_id) = thread.thread_id() {
            queue.set_thread_id(thread_id);
        }

        Self { queue, thread }
    }

    /// The invoker delivering callbacks to this queue's thread.
    pub fn invoker(&self) -> InvokerRef {
        Arc::clone(&self.queue) as InvokerRef
    }

    /// Stops accepting work, waits for the thread to finish what is queued,
    /// and discards the rest. Idempotent.
    pub fn shutdown(&self) {
        self.queue.shutdown();
        self.thread.shutdown();
        self.queue.drain();
    }
}

impl Drop for ActionQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
