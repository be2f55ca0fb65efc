// Copyright 2026 the spindle authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::event_count::EventCount;
use crate::invoker::InvokerRef;
use crate::profiling;
use crate::queue::{InvokerQueue, MpmcInvokerQueue};
use crate::scheduler::{SchedulerThread, SingleQueueExecutor};
use std::sync::{Arc, Mutex, PoisonError};

/// N scheduler threads sharing a single multi-consumer invoker queue.
///
/// Threads are named `<prefix>:<index>`. The pool can be resized at runtime:
/// growing spawns fresh threads, shrinking retires tail threads at their next
/// fiber-main boundary, after they complete any in-flight callback.
pub struct ThreadPool {
    callback_event_count: Arc<EventCount>,
    queue: Arc<MpmcInvokerQueue>,
    thread_name_prefix: String,
    threads: Mutex<Vec<Arc<SchedulerThread>>>,
}

// === impl ThreadPool ===

impl ThreadPool {
    pub fn new(thread_count: usize, thread_name_prefix: &str) -> Self {
        let callback_event_count = Arc::new(EventCount::new());
        let queue: Arc<MpmcInvokerQueue> = InvokerQueue::new(
            Arc::clone(&callback_event_count),
            profiling::thread_tags(thread_name_prefix),
        );

        let pool = Self {
            callback_event_count,
            queue,
            thread_name_prefix: thread_name_prefix.to_owned(),
            threads: Mutex::new(Vec::new()),
        };
        pool.configure(thread_count);
        pool
    }

    /// The shared invoker dispatching onto whichever pool thread gets there
    /// first.
    pub fn invoker(&self) -> InvokerRef {
        Arc::clone(&self.queue) as InvokerRef
    }

    pub fn thread_count(&self) -> usize {
        self.threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Grows or shrinks the pool to `thread_count` threads.
    pub fn configure(&self, thread_count: usize) {
        let mut retired = Vec::new();
        {
            let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);

            while threads.len() < thread_count {
                let thread = SchedulerThread::new(
                    Box::new(SingleQueueExecutor::new(Arc::clone(&self.queue))),
                    Arc::clone(&self.callback_event_count),
                    format!("{}:{}", self.thread_name_prefix, threads.len()),
                );
                thread.start();
                threads.push(thread);
            }

            while threads.len() > thread_count {
                // The dying thread finishes its in-flight callback and stops
                // at the next fiber-main boundary; the queue stays open for
                // the survivors.
                retired.extend(threads.pop());
            }
        }

        for thread in retired {
            thread.shutdown();
        }
    }

    /// Stops accepting work, joins every thread and discards whatever is
    /// still queued. Idempotent.
    pub fn shutdown(&self) {
        self.queue.shutdown();
        let threads: Vec<_> = {
            let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
            threads.drain(..).collect()
        };
        for thread in threads {
            thread.shutdown();
        }
        self.queue.drain();
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
