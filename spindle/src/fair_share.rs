// Copyright 2026 the spindle authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Fair-share scheduling: one thread, N buckets, CPU time split evenly.
//!
//! Each bucket is its own invoker queue plus an accumulated CPU-time excess.
//! Every scheduling step picks the non-empty bucket with the least excess and
//! charges it for the time its callback consumed; the selected excess is also
//! subtracted from everyone (saturating at zero) so a bucket that went quiet
//! regains priority instead of hoarding unbounded credit.

use crate::event_count::EventCount;
use crate::invoker::InvokerRef;
use crate::profiling;
use crate::queue::{EnqueuedAction, MpscInvokerQueue};
use crate::scheduler::{BeginExecuteResult, SchedulerThread, ThreadExecutor, run_callback};
use std::sync::Arc;
use std::time::Duration;

/// A fixed array of bucket queues sharing one scheduler thread.
pub(crate) struct FairShareQueue {
    buckets: Vec<Arc<MpscInvokerQueue>>,
}

// === impl FairShareQueue ===

impl FairShareQueue {
    pub(crate) fn new(
        callback_event_count: Arc<EventCount>,
        thread_name: &str,
        bucket_names: &[&str],
    ) -> Arc<Self> {
        let buckets = bucket_names
            .iter()
            .map(|bucket_name| {
                MpscInvokerQueue::new(
                    Arc::clone(&callback_event_count),
                    profiling::bucket_tags(thread_name, bucket_name),
                )
            })
            .collect();
        Arc::new(Self { buckets })
    }

    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn invoker(&self, index: usize) -> InvokerRef {
        Arc::clone(&self.buckets[index]) as InvokerRef
    }

    pub(crate) fn set_thread_id(&self, thread_id: std::thread::ThreadId) {
        for bucket in &self.buckets {
            bucket.set_thread_id(thread_id);
        }
    }

    pub(crate) fn shutdown(&self) {
        for bucket in &self.buckets {
            bucket.shutdown();
        }
    }

    pub(crate) fn drain(&self) {
        for bucket in &self.buckets {
            bucket.drain();
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.buckets.iter().all(|bucket| bucket.is_running())
    }
}

/// The fair-share variant of the scheduler thread's begin/end hooks.
pub(crate) struct FairShareExecutor {
    queue: Arc<FairShareQueue>,
    excess: Vec<Duration>,
    current_bucket: Option<usize>,
    current_action: EnqueuedAction,
}

// === impl FairShareExecutor ===

impl FairShareExecutor {
    pub(crate) fn new(queue: Arc<FairShareQueue>) -> Self {
        let excess = vec![Duration::ZERO; queue.len()];
        Self {
            queue,
            excess,
            current_bucket: None,
            current_action: EnqueuedAction::default(),
        }
    }

    /// The non-empty bucket with the least excess time; ties go to the lowest
    /// index.
    fn starving_bucket(&self) -> Option<usize> {
        let mut starving = None;
        for (index, bucket) in self.queue.buckets.iter().enumerate() {
            if bucket.is_empty() {
                continue;
            }
            match starving {
                Some(best) if self.excess[index] >= self.excess[best] => {}
                _ => starving = Some(index),
            }
        }
        starving
    }
}

impl ThreadExecutor for FairShareExecutor {
    fn begin_execute(&mut self) -> BeginExecuteResult {
        assert!(self.current_bucket.is_none());

        // Check if any callback is ready at all.
        let Some(index) = self.starving_bucket() else {
            return BeginExecuteResult::QueueEmpty;
        };

        // Reduce excesses (with truncation).
        let delta = self.excess[index];
        if delta > Duration::ZERO {
            for excess in &mut self.excess {
                *excess = excess.saturating_sub(delta);
            }
        }

        // Pump the starving bucket.
        self.current_bucket = Some(index);
        match self.queue.buckets[index].begin_execute(&mut self.current_action) {
            Some(callback) => run_callback(callback),
            None => {
                self.current_bucket = None;
                BeginExecuteResult::QueueEmpty
            }
        }
    }

    fn end_execute(&mut self) {
        let Some(index) = self.current_bucket.take() else {
            return;
        };

        self.queue.buckets[index].end_execute(&mut self.current_action);
        self.excess[index] += self
            .current_action
            .finished_at
            .duration_since(self.current_action.started_at);
    }
}

/// A scheduler thread multiplexing callbacks from named buckets with equal
/// CPU shares.
pub struct FairShareActionQueue {
    queue: Arc<FairShareQueue>,
    thread: Arc<SchedulerThread>,
}

// === impl FairShareActionQueue ===

impl FairShareActionQueue {
    pub fn new(thread_name: &str, bucket_names: &[&str]) -> Self {
        let callback_event_count = Arc::new(EventCount::new());
        let queue = FairShareQueue::new(Arc::clone(&callback_event_count), thread_name, bucket_names);
        let thread = SchedulerThread::new(
            Box::new(FairShareExecutor::new(Arc::clone(&queue))),
            callback_event_count,
            thread_name,
        );

        thread.start();
        if let Some(thread_id) = thread.thread_id() {
            queue.set_thread_id(thread_id);
        }

        Self { queue, thread }
    }

    /// The invoker feeding the given bucket.
    pub fn invoker(&self, index: usize) -> InvokerRef {
        self.queue.invoker(index)
    }

    /// Whether the queue still accepts work.
    pub fn is_running(&self) -> bool {
        self.queue.is_running()
    }

    pub fn shutdown(&self) {
        self.queue.shutdown();
        self.thread.shutdown();
        self.queue.drain();
    }
}

impl Drop for FairShareActionQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::Invoker;

    #[test]
    fn starving_bucket_prefers_least_excess() {
        let callback_event_count = Arc::new(EventCount::new());
        let queue = FairShareQueue::new(callback_event_count, "fair-test", &["a", "b", "c"]);
        let mut executor = FairShareExecutor::new(Arc::clone(&queue));

        // Only non-empty buckets are candidates.
        queue.invoker(1).invoke(Box::new(|| {}));
        queue.invoker(2).invoke(Box::new(|| {}));

        executor.excess[1] = Duration::from_millis(5);
        executor.excess[2] = Duration::from_millis(3);
        assert_eq!(executor.starving_bucket(), Some(2));

        // Ties break toward the lowest index.
        executor.excess[2] = Duration::from_millis(5);
        assert_eq!(executor.starving_bucket(), Some(1));
    }

    #[test]
    fn selection_subtracts_excess_uniformly() {
        let callback_event_count = Arc::new(EventCount::new());
        let queue = FairShareQueue::new(callback_event_count, "fair-test-2", &["a", "b"]);
        let mut executor = FairShareExecutor::new(Arc::clone(&queue));

        queue.invoker(1).invoke(Box::new(|| {}));
        executor.excess[0] = Duration::from_millis(1);
        executor.excess[1] = Duration::from_millis(4);

        let result = executor.begin_execute();
        assert_eq!(result, BeginExecuteResult::Success);
        executor.end_execute();

        // Bucket 1's pre-selection excess was subtracted from everyone;
        // bucket 1 then re-accrued its own execution time.
        assert_eq!(executor.excess[0], Duration::ZERO);
        assert!(executor.excess[1] >= Duration::ZERO);
    }
}
