// Copyright 2026 the spindle authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A fiber-based cooperative scheduling runtime.
//!
//! spindle executes many short, I/O-blocking units of work on a small bounded
//! pool of OS threads, while letting that work be written as ordinary
//! straight-line code: a callback running on a scheduler thread may
//! [`wait_for`] a [`Future`], which parks its fiber instead of blocking the
//! thread, and resumes once the future completes, possibly on a different
//! thread selected by an [`Invoker`].
//!
//! The building blocks:
//!
//! - [`ActionQueue`], [`ThreadPool`], [`FairShareActionQueue`]: scheduler
//!   threads to run callbacks on.
//! - [`Invoker`] wrappers: serialized, prioritized, bounded-concurrency and
//!   suspendable dispatch policies over any underlying invoker.
//! - [`wait_for`], [`yield_now`], [`switch_to`]: the blocking-style fiber
//!   API.
//! - [`Canceler`]: cooperative cancellation, observed by the canceled fiber
//!   at its next suspension point.

mod action_queue;
mod api;
mod error;
mod event_count;
mod fair_share;
mod fiber;
mod finalizer;
mod future;
mod invoker;
mod queue;
mod scheduler;
mod stack_pool;
mod thread_pool;

pub mod fls;
pub mod profiling;
pub mod shutdown;

pub use action_queue::ActionQueue;
pub use api::{
    ContextSwitchGuard, async_via, current_fiber_canceler, subscribe_context_switched, switch_to,
    unsubscribe_context_switched, wait_for, wait_for_via, with_fiber_local, yield_now,
};
pub use error::{FiberCanceled, FutureError};
pub use fair_share::FairShareActionQueue;
pub use fiber::{Canceler, FiberId, FiberState};
pub use finalizer::{finalizer_invoker, shutdown_finalizer_thread};
pub use future::{Awaitable, Completion, Future, Promise, void_future};
pub use invoker::{
    Callback, InvokePrioritized, Invoker, InvokerRef, PrioritizedInvokerRef, SuspendableInvoker,
    create_bounded_concurrency_invoker, create_fake_prioritized_invoker,
    create_fixed_priority_invoker, create_prioritized_invoker, create_serialized_invoker,
    create_suspendable_invoker, current_invoker, try_current_invoker,
};
pub use scheduler::{SchedulerThread, current_fiber_id, current_scheduler, try_current_scheduler};
pub use stack_pool::{StackSize, set_stack_pool_capacity, stack_pool_capacity};
pub use thread_pool::ThreadPool;
