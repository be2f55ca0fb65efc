// Copyright 2026 the spindle authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Write-only, non-blocking instrumentation.
//!
//! Queues and scheduler threads publish plain atomic counters here; where
//! they ultimately go is up to whoever scrapes [`queues`] and [`threads`].
//! Nothing in this module blocks or allocates on the hot path.

use core::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Monotonic event counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Adds one, returning the new value.
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Signed up/down gauge.
#[derive(Debug, Default)]
pub struct Gauge(AtomicI64);

impl Gauge {
    /// Adds `delta`, returning the new value.
    pub fn add(&self, delta: i64) -> i64 {
        self.0.fetch_add(delta, Ordering::Relaxed) + delta
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

const HISTOGRAM_BUCKETS: usize = 24;

/// Fixed-bucket duration histogram; bucket `i` counts samples below
/// `2^i` microseconds, the last bucket catches the rest.
#[derive(Debug)]
pub struct TimeHistogram {
    buckets: [AtomicU64; HISTOGRAM_BUCKETS],
    count: AtomicU64,
    total_micros: AtomicU64,
}

impl Default for TimeHistogram {
    fn default() -> Self {
        Self {
            buckets: [const { AtomicU64::new(0) }; HISTOGRAM_BUCKETS],
            count: AtomicU64::new(0),
            total_micros: AtomicU64::new(0),
        }
    }
}

impl TimeHistogram {
    pub fn record(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        let index = (64 - micros.leading_zeros() as usize).min(HISTOGRAM_BUCKETS - 1);
        self.buckets[index].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> Duration {
        Duration::from_micros(self.total_micros.load(Ordering::Relaxed))
    }
}

/// Identifies the emitter of a set of counters.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TagSet {
    pub thread: Option<String>,
    pub bucket: Option<String>,
    pub invoker: Option<String>,
}

pub(crate) fn thread_tags(thread: &str) -> TagSet {
    TagSet {
        thread: Some(thread.to_owned()),
        ..TagSet::default()
    }
}

pub(crate) fn bucket_tags(thread: &str, bucket: &str) -> TagSet {
    TagSet {
        thread: Some(thread.to_owned()),
        bucket: Some(bucket.to_owned()),
        ..TagSet::default()
    }
}

pub(crate) fn invoker_tags(invoker: &str) -> TagSet {
    TagSet {
        invoker: Some(invoker.to_owned()),
        ..TagSet::default()
    }
}

/// Per-queue counters: enqueue/dequeue totals, current size, and the
/// wait / exec / total time distributions of executed actions.
#[derive(Debug, Default)]
pub struct QueueCounters {
    pub enqueued: Counter,
    pub dequeued: Counter,
    pub size: Gauge,
    pub wait_time: TimeHistogram,
    pub exec_time: TimeHistogram,
    pub total_time: TimeHistogram,
}

/// Per-scheduler-thread counters.
#[derive(Debug, Default)]
pub struct ThreadCounters {
    pub created_fibers: Counter,
    pub alive_fibers: Gauge,
}

/// Semaphore fill gauge of a bounded-concurrency invoker.
#[derive(Debug, Default)]
pub struct SemaphoreCounters {
    pub fill: Gauge,
}

static QUEUES: spin::Mutex<Vec<(TagSet, Arc<QueueCounters>)>> = spin::Mutex::new(Vec::new());
static THREADS: spin::Mutex<Vec<(TagSet, Arc<ThreadCounters>)>> = spin::Mutex::new(Vec::new());
static SEMAPHORES: spin::Mutex<Vec<(TagSet, Arc<SemaphoreCounters>)>> = spin::Mutex::new(Vec::new());

pub(crate) fn register_queue(tags: TagSet) -> Arc<QueueCounters> {
    let counters = Arc::new(QueueCounters::default());
    QUEUES.lock().push((tags, Arc::clone(&counters)));
    counters
}

pub(crate) fn register_thread(tags: TagSet) -> Arc<ThreadCounters> {
    let counters = Arc::new(ThreadCounters::default());
    THREADS.lock().push((tags, Arc::clone(&counters)));
    counters
}

pub(crate) fn register_semaphore(tags: TagSet) -> Arc<SemaphoreCounters> {
    let counters = Arc::new(SemaphoreCounters::default());
    SEMAPHORES.lock().push((tags, Arc::clone(&counters)));
    counters
}

/// Snapshot of every registered queue.
pub fn queues() -> Vec<(TagSet, Arc<QueueCounters>)> {
    QUEUES.lock().clone()
}

/// Snapshot of every registered scheduler thread.
pub fn threads() -> Vec<(TagSet, Arc<ThreadCounters>)> {
    THREADS.lock().clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_buckets() {
        let histogram = TimeHistogram::default();
        histogram.record(Duration::from_micros(3));
        histogram.record(Duration::from_millis(2));
        histogram.record(Duration::from_secs(90));

        assert_eq!(histogram.count(), 3);
        assert!(histogram.total() >= Duration::from_secs(90));
    }

    #[test]
    fn registry_snapshot() {
        let counters = register_queue(thread_tags("test-registry"));
        counters.enqueued.increment();

        let snapshot = queues();
        let (_, found) = snapshot
            .iter()
            .find(|(tags, _)| tags.thread.as_deref() == Some("test-registry"))
            .expect("registered queue missing");
        assert_eq!(found.enqueued.get(), 1);
    }
}
