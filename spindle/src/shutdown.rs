// Copyright 2026 the spindle authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Ordered process-teardown callbacks.
//!
//! Global state (thread pools, the finalizer thread, caches) registers a
//! callback with a priority; [`shutdown`] runs them in ascending priority
//! order. The finalizer thread registers at the highest priority and thus
//! stops last. Nothing here relies on the destruction order of globals.

use core::sync::atomic::{AtomicBool, Ordering};

type ShutdownCallback = Box<dyn FnOnce() + Send>;

/// Priority used by the finalizer thread; everything else should register
/// below it.
pub(crate) const FINALIZER_SHUTDOWN_PRIORITY: i32 = i32::MAX;

static CALLBACKS: spin::Mutex<Vec<(i32, ShutdownCallback)>> = spin::Mutex::new(Vec::new());
static SHUTDOWN_RAN: AtomicBool = AtomicBool::new(false);

/// Registers a callback to run during [`shutdown`], ordered by ascending
/// priority. Registration after shutdown runs the callback immediately.
pub fn register_shutdown_callback(priority: i32, callback: impl FnOnce() + Send + 'static) {
    if SHUTDOWN_RAN.load(Ordering::Acquire) {
        callback();
        return;
    }
    CALLBACKS.lock().push((priority, Box::new(callback)));
}

/// Runs all registered shutdown callbacks, once. Subsequent calls are no-ops.
pub fn shutdown() {
    if SHUTDOWN_RAN.swap(true, Ordering::AcqRel) {
        return;
    }

    let mut callbacks = {
        let mut registered = CALLBACKS.lock();
        core::mem::take(&mut *registered)
    };
    callbacks.sort_by_key(|(priority, _)| *priority);

    for (priority, callback) in callbacks {
        tracing::debug!(priority, "running shutdown callback");
        callback();
    }
}
