// Copyright 2026 the spindle authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use spindle::{FairShareActionQueue, Invoker, Promise};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt;

const BUCKETS: usize = 3;
const PER_BUCKET: usize = 100;

fn busy_work() {
    let end = Instant::now() + Duration::from_micros(200);
    while Instant::now() < end {
        std::hint::spin_loop();
    }
}

#[test]
fn equal_cost_buckets_complete_evenly() {
    let _trace = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_thread_names(true)
        .with_test_writer()
        .set_default();

    // The extra "gate" bucket absorbs the blocked time of the gate callback,
    // so the measured buckets all start with zero excess.
    let queue = FairShareActionQueue::new("fair-share", &["gate", "alpha", "beta", "gamma"]);
    assert!(queue.is_running());

    let gate = Promise::<()>::new();
    {
        let gate_future = gate.future();
        queue.invoker(0).invoke(Box::new(move || {
            let _ = gate_future.get();
        }));
    }

    let completions: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    for bucket in 0..BUCKETS {
        let invoker = queue.invoker(bucket + 1);
        for _ in 0..PER_BUCKET {
            let completions = Arc::clone(&completions);
            invoker.invoke(Box::new(move || {
                busy_work();
                completions.lock().unwrap().push(bucket);
            }));
        }
    }
    gate.set(());

    let deadline = Instant::now() + Duration::from_secs(30);
    while completions.lock().unwrap().len() < BUCKETS * PER_BUCKET {
        assert!(Instant::now() < deadline, "fair-share queue stalled");
        std::thread::sleep(Duration::from_millis(1));
    }

    let completions = completions.lock().unwrap();

    // With identical per-callback cost and all buckets continuously
    // non-empty, completions stay balanced throughout: in every prefix the
    // per-bucket counts differ by a small constant. The tolerance absorbs OS
    // preemption inflating the measured cost of individual callbacks; a
    // non-fair (FIFO) discipline would drain a whole bucket first and blow
    // way past it.
    let mut counts = [0usize; BUCKETS];
    for &bucket in completions.iter() {
        counts[bucket] += 1;
        let all_pending = counts.iter().all(|&count| count < PER_BUCKET);
        if all_pending {
            let max = counts.iter().max().unwrap();
            let min = counts.iter().min().unwrap();
            assert!(
                max - min <= PER_BUCKET / 4,
                "bucket imbalance {counts:?} after {} completions",
                counts.iter().sum::<usize>()
            );
        }
    }
    assert_eq!(counts, [PER_BUCKET; BUCKETS]);

    queue.shutdown();
}
