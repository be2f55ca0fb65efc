// Copyright 2026 the spindle authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Blocking notification primitives for scheduler threads.

use std::sync::{Condvar, Mutex, PoisonError};

/// A condition-variable wrapper without spurious lost wakeups.
///
/// The protocol is prepare/check/wait: call [`prepare_wait`] *before*
/// re-checking the condition, then either [`wait`] with the returned cookie or
/// [`cancel_wait`]. Any [`notify_one`]/[`notify_all`] that happens after
/// `prepare_wait` makes the subsequent `wait` return immediately.
///
/// [`prepare_wait`]: EventCount::prepare_wait
/// [`wait`]: EventCount::wait
/// [`cancel_wait`]: EventCount::cancel_wait
/// [`notify_one`]: EventCount::notify_one
/// [`notify_all`]: EventCount::notify_all
#[derive(Debug, Default)]
pub(crate) struct EventCount {
    generation: Mutex<u64>,
    cond: Condvar,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct WaitCookie(u64);

impl EventCount {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepare_wait(&self) -> WaitCookie {
        let generation = self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        WaitCookie(*generation)
    }

    /// Abandons a prepared wait. A no-op in this implementation; kept so call
    /// sites spell out the full protocol.
    pub fn cancel_wait(&self) {}

    pub fn wait(&self, cookie: WaitCookie) {
        let mut generation = self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *generation == cookie.0 {
            generation = self
                .cond
                .wait(generation)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn notify_one(&self) {
        {
            let mut generation = self
                .generation
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *generation += 1;
        }
        self.cond.notify_one();
    }

    pub fn notify_all(&self) {
        {
            let mut generation = self
                .generation
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *generation += 1;
        }
        self.cond.notify_all();
    }
}

/// A one-shot latch: many waiters, one irreversible notify.
#[derive(Debug, Default)]
pub(crate) struct OneshotEvent {
    done: Mutex<bool>,
    cond: Condvar,
}

impl OneshotEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        *done = true;
        drop(done);
        self.cond.notify_all();
    }

    pub fn wait(&self) {
        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        while !*done {
            done = self
                .cond
                .wait(done)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn notify_after_prepare_unblocks() {
        let event_count = Arc::new(EventCount::new());
        let cookie = event_count.prepare_wait();

        let notifier = {
            let event_count = Arc::clone(&event_count);
            thread::spawn(move || event_count.notify_one())
        };

        // Either the notify already happened (wait returns immediately) or it
        // is about to; both must unblock.
        event_count.wait(cookie);
        notifier.join().unwrap();
    }

    #[test]
    fn stale_cookie_does_not_block() {
        let event_count = EventCount::new();
        let cookie = event_count.prepare_wait();
        event_count.notify_all();
        event_count.wait(cookie);
    }

    #[test]
    fn oneshot_event_is_sticky() {
        let event = Arc::new(OneshotEvent::new());
        event.notify();
        event.wait();
        event.wait();
    }
}
