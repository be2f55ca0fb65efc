// Copyright 2026 the spindle authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The blocking-style fiber API.
//!
//! Everything here must be called from fiber context (inside a callback
//! running on a scheduler thread) unless noted otherwise. The cancellation
//! payload may be raised by any function that parks.

use crate::fiber::Canceler;
use crate::future::{Completion, Future, Promise, void_future};
use crate::invoker::{Invoker, InvokerRef, current_invoker};
use crate::scheduler::{self, current_scheduler};

/// Parks the current fiber until `future` completes, then resumes it on its
/// current invoker and returns the completion value.
///
/// Always goes through the scheduler, even for an already-completed future.
/// Errors from the future are returned as values; cancellation of the
/// *fiber* raises the cancellation payload instead.
pub fn wait_for<T>(future: &Future<T>) -> Completion<T>
where
    T: Clone + Send + 'static,
{
    wait_for_via(future, current_invoker())
}

/// Like [`wait_for`], but resumes the fiber on the given invoker.
pub fn wait_for_via<T>(future: &Future<T>, invoker: InvokerRef) -> Completion<T>
where
    T: Clone + Send + 'static,
{
    current_scheduler().wait_for(future.as_awaitable(), invoker);

    // The resumer only fires once the future completed; a fiber canceled
    // while parked never gets here.
    future
        .try_get()
        .expect("fiber resumed before its awaited future completed")
}

/// Forces one round trip through the scheduler, giving other ready fibers a
/// chance to run.
pub fn yield_now() {
    let _ = wait_for(&void_future());
}

/// Parks the current fiber and resumes it on `invoker` (typically another
/// thread or pool).
pub fn switch_to(invoker: InvokerRef) {
    current_scheduler().switch_to(invoker);
}

/// Returns a canceler for the currently running fiber.
///
/// Taking a canceler marks the fiber non-reusable; the handle stays valid
/// after the fiber terminates (canceling is then a no-op).
///
/// # Panics
///
/// Panics outside fiber context.
pub fn current_fiber_canceler() -> Canceler {
    scheduler::current_fiber()
        .expect("current_fiber_canceler called outside fiber context")
        .canceler()
}

/// Runs `f` on `invoker` and returns a future for its result.
///
/// The future completes with [`FutureError::Abandoned`] when the invoker
/// drops the callback (shutdown) or the fiber running it is canceled.
///
/// [`FutureError::Abandoned`]: crate::FutureError::Abandoned
pub fn async_via<T, F>(invoker: &InvokerRef, f: F) -> Future<T>
where
    T: Clone + Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let promise = Promise::new();
    let future = promise.future();
    invoker.invoke(Box::new(move || {
        let value = f();
        promise.set(value);
    }));
    future
}

/// Gives access to a fiber-local storage slot of the current fiber, growing
/// the fiber's slot vector if needed. Slots are reserved process-wide with
/// [`fls::reserve_slot`](crate::fls::reserve_slot).
///
/// # Panics
///
/// Panics outside fiber context.
pub fn with_fiber_local<R>(slot: usize, f: impl FnOnce(&mut usize) -> R) -> R {
    scheduler::with_current_fiber(|fiber| fiber.with_fls_slot(slot, f))
        .expect("with_fiber_local called outside fiber context")
}

/// Installs a handler invoked every time the current fiber context-switches
/// out. Pair with [`unsubscribe_context_switched`]; prefer
/// [`ContextSwitchGuard`] which pairs them automatically.
///
/// # Panics
///
/// Panics outside fiber context.
pub fn subscribe_context_switched(handler: Box<dyn FnMut() + Send>) {
    scheduler::with_current_fiber(|fiber| fiber.push_context_handlers(Some(handler), None))
        .expect("subscribe_context_switched called outside fiber context");
}

/// Removes the most recently installed context-switch handler pair.
///
/// # Panics
///
/// Panics outside fiber context.
pub fn unsubscribe_context_switched() {
    scheduler::with_current_fiber(|fiber| fiber.pop_context_handlers())
        .expect("unsubscribe_context_switched called outside fiber context");
}

/// Scoped context-switch subscription; outside fiber context it is inert.
pub struct ContextSwitchGuard {
    active: bool,
}

impl ContextSwitchGuard {
    /// Installs `on_out` to run at every context switch out of the current
    /// fiber until the guard is dropped.
    pub fn new(on_out: Box<dyn FnMut() + Send>) -> Self {
        let active =
            scheduler::with_current_fiber(|fiber| fiber.push_context_handlers(Some(on_out), None))
                .is_some();
        Self { active }
    }
}

impl Drop for ContextSwitchGuard {
    fn drop(&mut self) {
        if self.active {
            scheduler::with_current_fiber(|fiber| fiber.pop_context_handlers());
        }
    }
}
