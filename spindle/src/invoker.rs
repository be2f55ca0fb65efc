// Copyright 2026 the spindle authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The invoker abstraction: a handle that accepts callbacks and delivers them
//! to some execution context according to a policy.

mod bounded;
mod prioritized;
mod serialized;
mod suspendable;

pub use bounded::create_bounded_concurrency_invoker;
pub use prioritized::{
    InvokePrioritized, PrioritizedInvokerRef, create_fake_prioritized_invoker,
    create_fixed_priority_invoker, create_prioritized_invoker,
};
pub use serialized::create_serialized_invoker;
pub use suspendable::{SuspendableInvoker, create_suspendable_invoker};

use crate::scheduler;
use static_assertions::assert_impl_all;
use std::sync::Arc;
use std::thread::ThreadId;

/// A unit of work submitted to an invoker.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// The sole public execution abstraction: accepts callbacks, runs them
/// somewhere, sometime, according to its policy.
pub trait Invoker: Send + Sync + 'static {
    /// Submits a callback. Depending on the policy this may run it later on
    /// another thread, or (for wrappers) immediately inline. Submitting to a
    /// shut-down invoker silently drops the callback.
    fn invoke(&self, callback: Callback);

    /// The OS thread this invoker dispatches to, when it has exactly one.
    fn thread_id(&self) -> Option<ThreadId> {
        None
    }
}

/// Shared handle to an [`Invoker`].
pub type InvokerRef = Arc<dyn Invoker>;

assert_impl_all!(InvokerRef: Send, Sync);

/// Returns the invoker the current fiber runs on.
///
/// # Panics
///
/// Panics outside fiber context.
pub fn current_invoker() -> InvokerRef {
    try_current_invoker().expect("current_invoker called outside fiber context")
}

/// Returns the invoker the current fiber runs on, if any.
pub fn try_current_invoker() -> Option<InvokerRef> {
    scheduler::with_current_fiber(|fiber| fiber.current_invoker()).flatten()
}

/// Swaps the current fiber's invoker for the guard's lifetime, restoring the
/// previous value on drop. Wrappers use this so callbacks observe the wrapper
/// (not the backing queue) as their invoker.
pub(crate) struct CurrentInvokerGuard {
    previous: Option<InvokerRef>,
    active: bool,
}

impl CurrentInvokerGuard {
    pub(crate) fn new(invoker: InvokerRef) -> Self {
        match scheduler::with_current_fiber(|fiber| fiber.swap_current_invoker(Some(invoker))) {
            Some(previous) => Self {
                previous,
                active: true,
            },
            // Off fiber context (e.g. unit tests driving wrappers inline)
            // there is nothing to publish to.
            None => Self {
                previous: None,
                active: false,
            },
        }
    }
}

impl Drop for CurrentInvokerGuard {
    fn drop(&mut self) {
        if self.active {
            scheduler::with_current_fiber(|fiber| {
                fiber.swap_current_invoker(self.previous.take());
            });
        }
    }
}

struct InvocationGuard {
    failure: Option<Callback>,
}

impl Drop for InvocationGuard {
    fn drop(&mut self) {
        if let Some(failure) = self.failure.take() {
            failure();
        }
    }
}

/// Submits `on_success` to `invoker`; if the invoker drops the submission
/// instead of running it (shutdown, drain), `on_failure` runs in its place.
pub(crate) fn guarded_invoke(invoker: &InvokerRef, on_success: Callback, on_failure: Callback) {
    let mut guard = InvocationGuard {
        failure: Some(on_failure),
    };
    invoker.invoke(Box::new(move || {
        guard.failure = None;
        on_success();
    }));
}
