// Copyright 2026 the spindle authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use spindle::{ThreadPool, async_via, current_fiber_id, current_scheduler, switch_to};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt;

#[test]
fn fiber_bounces_between_pools() {
    let _trace = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_thread_names(true)
        .with_test_writer()
        .set_default();

    let pool_one = ThreadPool::new(1, "p1");
    let pool_two = ThreadPool::new(1, "p2");

    let invoker_one = pool_one.invoker();
    let invoker_two = pool_two.invoker();

    let done = async_via(&pool_one.invoker(), move || {
        let my_id = current_fiber_id();
        assert!(current_scheduler().thread_name().starts_with("p1"));

        for _ in 0..100 {
            switch_to(invoker_two.clone());
            assert!(current_scheduler().thread_name().starts_with("p2"));
            // Moving between pools does not change the fiber's identity.
            assert_eq!(current_fiber_id(), my_id);

            switch_to(invoker_one.clone());
            assert!(current_scheduler().thread_name().starts_with("p1"));
            assert_eq!(current_fiber_id(), my_id);
        }
    });

    assert!(done.wait_timeout(Duration::from_secs(10)));
    assert_eq!(done.try_get(), Some(Ok(())));

    pool_one.shutdown();
    pool_two.shutdown();
}
