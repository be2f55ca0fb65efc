// Copyright 2026 the spindle authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Fibers: user-space execution contexts with a stable identity, local
//! storage, and a cancellation channel.
//!
//! A fiber is shared (`Arc`) between the scheduler thread that currently owns
//! it and any [`Canceler`] handles. State transitions and the awaited-future
//! slot are guarded by a per-fiber spin lock; everything else is owned by
//! whichever scheduler thread currently runs the fiber and must only be
//! touched from there.

mod id;

pub use id::FiberId;

use crate::error;
use crate::fls;
use crate::future::Awaitable;
use crate::invoker::{Callback, InvokerRef};
use crate::stack_pool::{self, PooledStack, StackSize};
use context::{ExecutionContext, Resume, Switcher};
use core::cell::UnsafeCell;
use core::mem;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use static_assertions::assert_impl_all;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

/// The lifecycle state of a fiber.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum FiberState {
    /// Unscheduled and waiting for an external event to happen.
    Sleeping = 0,
    /// Scheduled but not yet running.
    Suspended = 1,
    /// Currently executing.
    Running = 2,
    /// Terminated.
    Terminated = 3,
}

impl FiberState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => FiberState::Sleeping,
            1 => FiberState::Suspended,
            2 => FiberState::Running,
            3 => FiberState::Terminated,
            _ => unreachable!("invalid fiber state {raw}"),
        }
    }
}

type SwitchHandler = Box<dyn FnMut() + Send>;

pub(crate) struct ContextSwitchHandlers {
    pub(crate) on_out: Option<SwitchHandler>,
    pub(crate) on_in: Option<SwitchHandler>,
}

struct FiberShared {
    awaited: Option<Awaitable>,
    canceler: Option<Canceler>,
}

struct FiberOwner {
    execution: ExecutionContext<PooledStack>,
    /// Points into the fiber's own stack while the fiber is alive; set by the
    /// entry trampoline before user code runs.
    switcher: *const Switcher,
    fls: Vec<usize>,
    handlers: Vec<ContextSwitchHandlers>,
    invoker: Option<InvokerRef>,
}

/// A fiber :)
///
/// Not intended to be used directly; fibers are created and driven by
/// scheduler threads. Some methods may only be called from the owner thread
/// (the thread that currently runs the fiber); they are marked "owner-only".
pub(crate) struct Fiber {
    id: AtomicU64,
    /// Mirror of the state for lock-free owner reads; transitions happen
    /// under the shared lock.
    state: AtomicU8,
    canceled: AtomicBool,
    weak_self: Weak<Fiber>,
    shared: spin::Mutex<FiberShared>,
    owner: UnsafeCell<FiberOwner>,
}

// Safety: the `owner` cell is only accessed by the scheduler thread that
// currently owns the fiber; ownership moves between threads only through the
// run queues and invoker queues, which provide the necessary happens-before
// edges. Everything else is atomics or lock-guarded.
unsafe impl Send for Fiber {}
unsafe impl Sync for Fiber {}

// === impl Fiber ===

impl Fiber {
    /// Creates a fiber in the [`Suspended`](FiberState::Suspended) state that
    /// will run `callee` when first switched to.
    pub(crate) fn new(callee: Callback, stack_size: StackSize) -> Arc<Fiber> {
        Arc::new_cyclic(|weak: &Weak<Fiber>| {
            let stack = stack_pool::allocate(stack_size);
            let entry_weak = weak.clone();
            let execution = ExecutionContext::new(stack, move |switcher| {
                let fiber = entry_weak.upgrade().expect("fiber destroyed while entering");
                fiber.enter(switcher, callee);
                // `fiber` drops here, on the fiber stack. The scheduler that
                // resumed us still holds a strong reference, so this is never
                // the last one.
            });

            Fiber {
                id: AtomicU64::new(FiberId::next().as_u64()),
                state: AtomicU8::new(FiberState::Suspended as u8),
                canceled: AtomicBool::new(false),
                weak_self: weak.clone(),
                shared: spin::Mutex::new(FiberShared {
                    awaited: None,
                    canceler: None,
                }),
                owner: UnsafeCell::new(FiberOwner {
                    execution,
                    switcher: ptr::null(),
                    fls: Vec::new(),
                    handlers: Vec::new(),
                    invoker: None,
                }),
            }
        })
    }

    /// Runs on the fiber's own stack: invokes the callee and records
    /// termination. The distinguished cancellation payload is swallowed; any
    /// other panic is fatal for the process (the panic hook has already
    /// printed the failing backtrace by the time we see the payload).
    fn enter(&self, switcher: &Switcher, callee: Callback) {
        // Safety: we are the owner thread by definition here.
        unsafe {
            (*self.owner.get()).switcher = ptr::from_ref(switcher);
        }

        if let Err(payload) = catch_unwind(AssertUnwindSafe(callee)) {
            if error::is_canceled_payload(&payload) {
                tracing::trace!(fiber_id = %self.id(), "fiber unwound by cancellation");
            } else {
                tracing::error!(fiber_id = %self.id(), "unhandled panic in fiber, aborting");
                std::process::abort();
            }
        }

        self.set_terminated();

        // Safety: owner thread; the switcher becomes dangling once we return.
        unsafe {
            (*self.owner.get()).switcher = ptr::null();
        }
    }

    /// Returns the unique fiber id. Thread affinity: any.
    pub(crate) fn id(&self) -> FiberId {
        FiberId::from_raw(self.id.load(Ordering::Relaxed))
    }

    /// Assigns a new unique id. Used when the fiber instance is reused for a
    /// logically distinct work unit. Returns the new id.
    pub(crate) fn regenerate_id(&self) -> FiberId {
        let id = FiberId::next();
        self.id.store(id.as_u64(), Ordering::Relaxed);
        id
    }

    /// Owner-only.
    pub(crate) fn state(&self) -> FiberState {
        FiberState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Owner-only.
    pub(crate) fn set_running(&self) {
        let mut shared = self.shared.lock();
        assert_ne!(self.state(), FiberState::Terminated);
        self.state.store(FiberState::Running as u8, Ordering::Release);
        shared.awaited = None;
    }

    /// Owner-only. Flags the fiber as sleeping, recording the awaited future
    /// so a concurrent [`cancel`](Self::cancel) can propagate into it.
    /// Returns false if the fiber is already canceled, in which case the
    /// state is left untouched and the caller must raise the cancellation
    /// payload instead of parking.
    pub(crate) fn try_set_sleeping(&self, awaited: Option<Awaitable>) -> bool {
        let mut shared = self.shared.lock();
        assert_ne!(self.state(), FiberState::Terminated);
        if self.canceled.load(Ordering::Relaxed) {
            return false;
        }
        debug_assert!(shared.awaited.is_none());
        self.state.store(FiberState::Sleeping as u8, Ordering::Release);
        shared.awaited = awaited;
        true
    }

    /// Owner-only.
    pub(crate) fn set_suspended(&self) {
        let mut shared = self.shared.lock();
        assert_ne!(self.state(), FiberState::Terminated);
        self.state
            .store(FiberState::Suspended as u8, Ordering::Release);
        shared.awaited = None;
    }

    fn set_terminated(&self) {
        let mut shared = self.shared.lock();
        self.state
            .store(FiberState::Terminated as u8, Ordering::Release);
        shared.awaited = None;
    }

    /// Requests cancellation. Idempotent; thread affinity: any.
    ///
    /// Sets the canceled flag and, if the fiber is parked on a future,
    /// cancels that future so external work is torn down and the fiber gets
    /// resumed to observe the flag.
    pub(crate) fn cancel(&self) {
        if self
            .canceled
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let awaited = self.shared.lock().awaited.take();
        if let Some(awaited) = awaited {
            tracing::debug!(
                fiber_id = %self.id(),
                "sending cancellation to fiber, propagating to the awaited future"
            );
            awaited.cancel();
        } else {
            tracing::debug!(fiber_id = %self.id(), "sending cancellation to fiber");
        }
    }

    /// Returns a cached handle that cancels this fiber. Thread affinity: any.
    pub(crate) fn canceler(&self) -> Canceler {
        let mut shared = self.shared.lock();
        shared
            .canceler
            .get_or_insert_with(|| Canceler {
                fiber: self.weak_self.clone(),
            })
            .clone()
    }

    /// Whether anyone holds a canceler for this fiber. Thread affinity: any.
    pub(crate) fn is_cancelable(&self) -> bool {
        self.shared.lock().canceler.is_some()
    }

    /// Thread affinity: any.
    pub(crate) fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Relaxed)
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.state() == FiberState::Terminated
    }

    /// Raises the cancellation payload if the fiber was canceled. Called at
    /// every suspension point, on the fiber's own stack.
    pub(crate) fn unwind_if_canceled(&self) {
        if self.is_canceled() {
            error::raise_canceled();
        }
    }

    /// Owner-only: switches into the fiber's execution context.
    pub(crate) fn resume(&self) -> Resume {
        // Safety: owner-only; no other reference to the execution context
        // exists while we resume it.
        unsafe { (*self.owner.get()).execution.resume() }
    }

    /// Owner-only: switches out of the fiber, back to the scheduler context
    /// that resumed it. Must be called on the fiber's own stack.
    pub(crate) fn switch_out(&self) {
        // Safety: owner-only; the switcher points into our live stack.
        unsafe {
            let switcher = (*self.owner.get()).switcher;
            assert!(!switcher.is_null(), "fiber has no live switcher");
            (*switcher).switch_out();
        }
    }

    /// Owner-only: replaces the fiber's current invoker, returning the
    /// previous one.
    pub(crate) fn swap_current_invoker(&self, invoker: Option<InvokerRef>) -> Option<InvokerRef> {
        // Safety: owner-only.
        unsafe { mem::replace(&mut (*self.owner.get()).invoker, invoker) }
    }

    pub(crate) fn current_invoker(&self) -> Option<InvokerRef> {
        // Safety: owner-only.
        unsafe { (*self.owner.get()).invoker.clone() }
    }

    /// Owner-only: gives access to a fiber-local slot, growing the slot
    /// vector if needed.
    pub(crate) fn with_fls_slot<R>(&self, index: usize, f: impl FnOnce(&mut usize) -> R) -> R {
        // Safety: owner-only; `f` receives the only live reference.
        let owner = unsafe { &mut *self.owner.get() };
        if index >= owner.fls.len() {
            let new_len = fls::slot_count().max(index + 1);
            owner.fls.resize(new_len, 0);
        }
        f(&mut owner.fls[index])
    }

    /// Owner-only. Handlers are invoked around every context switch out of /
    /// into this fiber, most recently pushed first.
    pub(crate) fn push_context_handlers(
        &self,
        on_out: Option<SwitchHandler>,
        on_in: Option<SwitchHandler>,
    ) {
        // Safety: owner-only.
        let owner = unsafe { &mut *self.owner.get() };
        owner.handlers.push(ContextSwitchHandlers { on_out, on_in });
    }

    /// Owner-only.
    pub(crate) fn pop_context_handlers(&self) {
        // Safety: owner-only.
        let owner = unsafe { &mut *self.owner.get() };
        owner
            .handlers
            .pop()
            .expect("pop_context_handlers without matching push");
    }

    /// Owner-only: invokes all out handlers.
    pub(crate) fn invoke_out_handlers(&self) {
        self.invoke_handlers(|handlers| &mut handlers.on_out);
    }

    /// Owner-only: invokes all in handlers.
    pub(crate) fn invoke_in_handlers(&self) {
        self.invoke_handlers(|handlers| &mut handlers.on_in);
    }

    fn invoke_handlers(
        &self,
        select: impl Fn(&mut ContextSwitchHandlers) -> &mut Option<SwitchHandler>,
    ) {
        // Detach the list while running the handlers: a handler may itself
        // push or pop handlers, and must not alias the list we iterate.
        let mut handlers = {
            // Safety: owner-only.
            let owner = unsafe { &mut *self.owner.get() };
            mem::take(&mut owner.handlers)
        };

        for entry in handlers.iter_mut().rev() {
            if let Some(handler) = select(entry) {
                handler();
            }
        }

        // Safety: owner-only.
        let owner = unsafe { &mut *self.owner.get() };
        let pushed_meanwhile = mem::replace(&mut owner.handlers, handlers);
        owner.handlers.extend(pushed_meanwhile);
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        let terminated = self.is_terminated();
        let owner = self.owner.get_mut();
        assert!(
            terminated || !owner.execution.started(),
            "fiber dropped while alive"
        );

        // Fiber-local storage destructors run at destruction, in slot order.
        for (index, slot) in owner.fls.iter().enumerate() {
            if *slot != 0 {
                fls::destruct(index, *slot);
            }
        }
    }
}

/// A cheap, clonable handle that cancels a specific fiber.
///
/// Holds only a weak reference: a canceler never keeps its fiber alive.
#[derive(Clone)]
pub struct Canceler {
    fiber: Weak<Fiber>,
}

assert_impl_all!(Canceler: Send, Sync);

// === impl Canceler ===

impl Canceler {
    /// Requests cancellation of the target fiber. A no-op once the fiber is
    /// gone; idempotent otherwise.
    pub fn cancel(&self) {
        if let Some(fiber) = self.fiber.upgrade() {
            fiber.cancel();
        }
    }
}

impl core::fmt::Debug for Canceler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let target = self.fiber.upgrade().map(|fiber| fiber.id());
        f.debug_struct("Canceler").field("fiber", &target).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::Promise;

    #[test]
    fn new_fiber_is_suspended_with_unique_id() {
        let a = Fiber::new(Box::new(|| {}), StackSize::Small);
        let b = Fiber::new(Box::new(|| {}), StackSize::Small);

        assert_eq!(a.state(), FiberState::Suspended);
        assert_ne!(a.id(), b.id());
        assert!(a.id().is_valid());
    }

    #[test]
    fn regenerate_id_changes_identity() {
        let fiber = Fiber::new(Box::new(|| {}), StackSize::Small);
        let before = fiber.id();
        let after = fiber.regenerate_id();
        assert_ne!(before, after);
        assert_eq!(fiber.id(), after);
    }

    #[test]
    fn cancel_is_one_shot_and_propagates_to_future() {
        let fiber = Fiber::new(Box::new(|| {}), StackSize::Small);
        let promise = Promise::<()>::new();
        let future = promise.future();

        assert!(fiber.try_set_sleeping(Some(future.as_awaitable())));
        fiber.cancel();
        fiber.cancel();

        assert!(fiber.is_canceled());
        assert!(future.is_canceled());
    }

    #[test]
    fn canceled_fiber_refuses_to_sleep() {
        let fiber = Fiber::new(Box::new(|| {}), StackSize::Small);
        fiber.cancel();
        assert!(!fiber.try_set_sleeping(None));
        assert_eq!(fiber.state(), FiberState::Suspended);
    }

    #[test]
    fn canceler_is_weak() {
        let fiber = Fiber::new(Box::new(|| {}), StackSize::Small);
        let canceler = fiber.canceler();
        assert!(fiber.is_cancelable());

        drop(fiber);
        // The fiber is gone; canceling must be a no-op, not a crash.
        canceler.cancel();
    }

    #[test]
    fn fls_slots_grow_on_demand() {
        let slot = crate::fls::reserve_slot(None);
        let fiber = Fiber::new(Box::new(|| {}), StackSize::Small);

        fiber.with_fls_slot(slot, |value| {
            assert_eq!(*value, 0);
            *value = 42;
        });
        fiber.with_fls_slot(slot, |value| assert_eq!(*value, 42));
    }
}
