// Copyright 2026 the spindle authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Scheduler threads: OS threads that multiplex fibers over a run queue and
//! an invoker queue.
//!
//! Each thread runs a two-level loop. The outer *thread-main* loop drives
//! context switches into fibers. The inner *fiber-main* loop runs inside a
//! reusable "idle" fiber and pumps the invoker queue while no user fiber is
//! ready. A fiber that parks in `wait_for` leaves its awaited future and
//! target invoker behind in the thread's scheduling state; the thread then
//! arranges for the fiber to be resumed (possibly elsewhere) once the future
//! completes.

use crate::error;
use crate::event_count::{EventCount, OneshotEvent};
use crate::fiber::{Fiber, FiberId, FiberState};
use crate::finalizer;
use crate::future::Awaitable;
use crate::invoker::{Callback, Invoker, InvokerRef, guarded_invoke};
use crate::profiling::{self, ThreadCounters};
use crate::queue::{EnqueuedAction, InvokerQueue, QueueImpl};
use crate::stack_pool::StackSize;
use core::cell::{Cell, RefCell, UnsafeCell};
use core::ptr;
use core::sync::atomic::{AtomicU64, Ordering};
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle, ThreadId};

// The first bit of the epoch records whether startup was performed, the
// second whether shutdown was requested. The remaining bits count "turns":
// one turn per retired idle fiber.
const STARTED_EPOCH_MASK: u64 = 0x1;
const SHUTDOWN_EPOCH_MASK: u64 = 0x2;
const TURN_SHIFT: u32 = 2;
const TURN_DELTA: u64 = 1 << TURN_SHIFT;

/// Outcome of one pump of the invoker queue.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum BeginExecuteResult {
    /// A callback was dequeued and ran to completion.
    Success,
    /// Nothing was queued; the caller may block on the event count.
    QueueEmpty,
    /// A callback was dequeued and the cancellation payload unwound it.
    Terminated,
}

/// The begin/end hook pair that distinguishes scheduler thread variants
/// (single queue, pool worker, fair share).
pub(crate) trait ThreadExecutor: Send + 'static {
    fn begin_execute(&mut self) -> BeginExecuteResult;
    fn end_execute(&mut self);
}

/// Runs a dequeued callback, translating the cancellation payload into
/// [`BeginExecuteResult::Terminated`]. Any other panic keeps unwinding and is
/// dealt with by the fiber trampoline.
pub(crate) fn run_callback(callback: Callback) -> BeginExecuteResult {
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(()) => BeginExecuteResult::Success,
        Err(payload) if error::is_canceled_payload(&payload) => BeginExecuteResult::Terminated,
        Err(payload) => resume_unwind(payload),
    }
}

/// Executor over a single invoker queue; used by action queues, pool workers
/// and the finalizer thread.
pub(crate) struct SingleQueueExecutor<Q: QueueImpl> {
    queue: Arc<InvokerQueue<Q>>,
    current_action: EnqueuedAction,
}

impl<Q: QueueImpl> SingleQueueExecutor<Q> {
    pub(crate) fn new(queue: Arc<InvokerQueue<Q>>) -> Self {
        Self {
            queue,
            current_action: EnqueuedAction::default(),
        }
    }
}

impl<Q: QueueImpl> ThreadExecutor for SingleQueueExecutor<Q> {
    fn begin_execute(&mut self) -> BeginExecuteResult {
        match self.queue.begin_execute(&mut self.current_action) {
            Some(callback) => run_callback(callback),
            None => BeginExecuteResult::QueueEmpty,
        }
    }

    fn end_execute(&mut self) {
        self.queue.end_execute(&mut self.current_action);
    }
}

/// State owned exclusively by the scheduler's own OS thread.
struct HomeState {
    run_queue: VecDeque<Arc<Fiber>>,
    idle_fiber: Option<Arc<Fiber>>,
    current_fiber: Option<Arc<Fiber>>,
    /// Scheduling state written by the currently running fiber just before it
    /// switches back to the scheduler.
    wait_for_awaitable: Option<Awaitable>,
    switch_to_invoker: Option<InvokerRef>,
    yield_to_target: Option<Arc<Fiber>>,
    stack_size: StackSize,
}

/// An OS thread driving fibers over a run queue and an invoker queue.
pub struct SchedulerThread {
    callback_event_count: Arc<EventCount>,
    thread_name: String,
    epoch: AtomicU64,
    thread_started_event: OneshotEvent,
    thread_shutdown_event: OneshotEvent,
    thread_id: spin::Mutex<Option<ThreadId>>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<ThreadCounters>,
    weak: Weak<SchedulerThread>,
    executor: UnsafeCell<Box<dyn ThreadExecutor>>,
    home: UnsafeCell<HomeState>,
}

// Safety: `home` and `executor` are only ever accessed from the scheduler's
// own OS thread (asserted by the owner-only contract on every accessor); the
// remaining fields are atomics, locks, or immutable.
unsafe impl Send for SchedulerThread {}
unsafe impl Sync for SchedulerThread {}

// === impl SchedulerThread ===

impl SchedulerThread {
    pub(crate) fn new(
        executor: Box<dyn ThreadExecutor>,
        callback_event_count: Arc<EventCount>,
        thread_name: impl Into<String>,
    ) -> Arc<Self> {
        let thread_name = thread_name.into();
        let counters = profiling::register_thread(profiling::thread_tags(&thread_name));
        Arc::new_cyclic(|weak| Self {
            callback_event_count,
            thread_name,
            epoch: AtomicU64::new(0),
            thread_started_event: OneshotEvent::new(),
            thread_shutdown_event: OneshotEvent::new(),
            thread_id: spin::Mutex::new(None),
            join_handle: Mutex::new(None),
            counters,
            weak: weak.clone(),
            executor: UnsafeCell::new(executor),
            home: UnsafeCell::new(HomeState {
                run_queue: VecDeque::new(),
                idle_fiber: None,
                current_fiber: None,
                wait_for_awaitable: None,
                switch_to_invoker: None,
                yield_to_target: None,
                stack_size: StackSize::Small,
            }),
        })
    }

    /// The name the OS thread was started with.
    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// The OS thread id, available once the thread has started.
    pub fn thread_id(&self) -> Option<ThreadId> {
        *self.thread_id.lock()
    }

    pub fn is_started(&self) -> bool {
        self.epoch.load(Ordering::Relaxed) & STARTED_EPOCH_MASK != 0
    }

    pub fn is_shutdown(&self) -> bool {
        self.epoch.load(Ordering::Relaxed) & SHUTDOWN_EPOCH_MASK != 0
    }

    /// Starts the OS thread. Exactly one caller performs the startup; every
    /// other caller (and repeated calls) block until startup completed.
    pub(crate) fn start(&self) {
        let mut already_done = false;
        let mut epoch;
        loop {
            epoch = self.epoch.load(Ordering::Acquire);
            if epoch & STARTED_EPOCH_MASK != 0 {
                // Startup already in progress.
                already_done = true;
                break;
            }
            // Acquire the startup lock.
            if self
                .epoch
                .compare_exchange(
                    epoch,
                    epoch | STARTED_EPOCH_MASK,
                    Ordering::Release,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                break;
            }
        }

        if !already_done {
            if epoch & SHUTDOWN_EPOCH_MASK == 0 {
                tracing::debug!(thread = %self.thread_name, "starting thread");

                let mut join_handle = self
                    .join_handle
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                let this = self.weak.upgrade().expect("scheduler thread vanished");
                let handle = thread::Builder::new()
                    .name(self.thread_name.clone())
                    .spawn(move || this.thread_main());
                match handle {
                    Ok(handle) => *join_handle = Some(handle),
                    Err(err) => {
                        eprintln!("error starting {} thread: {err}", self.thread_name);
                        std::process::exit(100);
                    }
                }
            } else {
                // Pretend that the thread was started and (immediately)
                // stopped.
                self.thread_started_event.notify();
            }
        }

        self.thread_started_event.wait();
    }

    /// Requests shutdown and waits for the thread to stop. Exactly one caller
    /// performs the teardown. A thread shutting *itself* down detaches
    /// instead of joining to avoid self-deadlock.
    pub(crate) fn shutdown(&self) {
        let mut already_done = false;
        let mut epoch;
        loop {
            epoch = self.epoch.load(Ordering::Acquire);
            if epoch & SHUTDOWN_EPOCH_MASK != 0 {
                // Shutdown requested; await.
                already_done = true;
                break;
            }
            if self
                .epoch
                .compare_exchange(
                    epoch,
                    epoch | SHUTDOWN_EPOCH_MASK,
                    Ordering::Release,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                break;
            }
        }

        if !already_done {
            if epoch & STARTED_EPOCH_MASK != 0 {
                // There is a tiny chance the thread is not fully started yet;
                // synchronize with startup before joining.
                self.thread_started_event.wait();

                tracing::debug!(thread = %self.thread_name, "stopping thread");

                self.callback_event_count.notify_all();

                let handle = self
                    .join_handle
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(handle) = handle {
                    if thread::current().id() == handle.thread().id() {
                        // Self-shutdown: detach, the thread finishes its loop
                        // on its own.
                        drop(handle);
                    } else {
                        let _ = handle.join();
                    }
                }
            }

            self.thread_shutdown_event.notify();
        }

        self.thread_shutdown_event.wait();
    }

    /// Runs `f` with the home state. Owner-thread only; the closure must not
    /// re-enter scheduler code or run user callbacks.
    fn with_home<R>(&self, f: impl FnOnce(&mut HomeState) -> R) -> R {
        // Safety: only the scheduler's own OS thread calls this, and the
        // borrow ends before control can reach another with_home call.
        f(unsafe { &mut *self.home.get() })
    }

    fn thread_main(self: Arc<Self>) {
        *self.thread_id.lock() = Some(thread::current().id());

        let _scheduler_guard = CurrentSchedulerGuard::set(Arc::clone(&self));

        tracing::debug!(thread = %self.thread_name, "thread started");
        self.thread_started_event.notify();

        while self.epoch.load(Ordering::Relaxed) & SHUTDOWN_EPOCH_MASK == 0
            || !self.with_home(|home| home.run_queue.is_empty())
        {
            self.thread_main_step();
        }

        self.with_home(|home| {
            debug_assert!(home.current_fiber.is_none());
            debug_assert!(home.idle_fiber.is_none());
            debug_assert!(home.run_queue.is_empty());
        });

        tracing::debug!(thread = %self.thread_name, "thread stopped");
    }

    fn thread_main_step(&self) {
        let fiber = self.with_home(|home| {
            assert!(home.current_fiber.is_none());

            if home.run_queue.is_empty() {
                // Spawn a new idle fiber to run the queue-pumping loop,
                // parameterized by the epoch at spawn time.
                assert!(home.idle_fiber.is_none());
                let spawned_epoch = self.epoch.load(Ordering::Relaxed);
                let this = self.weak.upgrade().expect("scheduler thread vanished");
                let idle_fiber = Fiber::new(
                    Box::new(move || this.fiber_main(spawned_epoch)),
                    home.stack_size,
                );
                home.idle_fiber = Some(Arc::clone(&idle_fiber));
                home.run_queue.push_back(idle_fiber);
            }

            let fiber = home
                .run_queue
                .pop_front()
                .expect("run queue empty after idle fiber spawn");
            home.current_fiber = Some(Arc::clone(&fiber));
            fiber
        });

        set_current_fiber(Some(&fiber));

        assert_eq!(fiber.state(), FiberState::Suspended);
        fiber.set_running();

        let _ = fiber.resume();

        set_current_fiber(None);

        // Classify what the fiber left behind. The fiber instance is released
        // below; only its id is kept for the end_execute log annotation.
        let (saved_fiber_id, to_reschedule) = self.with_home(|home| {
            let current = home
                .current_fiber
                .take()
                .expect("current fiber vanished during switch");
            let saved_fiber_id = current.id();

            let release_idle_fiber = |home: &mut HomeState, current: &Arc<Fiber>| {
                if home
                    .idle_fiber
                    .as_ref()
                    .is_some_and(|idle| Arc::ptr_eq(idle, current))
                {
                    // Advance the epoch: this (idle) fiber may be rescheduled
                    // elsewhere and can no longer pump our queue.
                    self.epoch.fetch_add(TURN_DELTA, Ordering::Relaxed);
                    home.idle_fiber = None;
                }
            };

            let to_reschedule = match current.state() {
                FiberState::Sleeping => {
                    release_idle_fiber(home, &current);
                    let awaitable = home.wait_for_awaitable.take();
                    let invoker = home
                        .switch_to_invoker
                        .take()
                        .expect("sleeping fiber left no target invoker");
                    Some((current, awaitable, invoker))
                }
                FiberState::Suspended => {
                    if let Some(target) = home.yield_to_target.take() {
                        // The fiber yielded directly to another: the caller
                        // continues right after the target.
                        home.run_queue.push_front(current);
                        home.run_queue.push_front(target);
                    } else {
                        home.run_queue.push_back(current);
                    }
                    None
                }
                FiberState::Terminated => {
                    release_idle_fiber(home, &current);
                    // We do not own this fiber anymore; forget about it.
                    drop(current);
                    None
                }
                FiberState::Running => unreachable!("fiber switched out while running"),
            };

            (saved_fiber_id, to_reschedule)
        });

        if let Some((fiber, awaitable, invoker)) = to_reschedule {
            reschedule(fiber, awaitable, invoker);
        }

        // Finish the sync part of the execution. The fiber instance is gone,
        // but end_execute may log; annotate those messages with the fiber id.
        set_current_fiber_id(saved_fiber_id);
        // Safety: owner-thread only; no fiber code runs inside end_execute.
        unsafe { (*self.executor.get()).end_execute() };
        set_current_fiber_id(FiberId::INVALID);

        // Check for a clear scheduling state.
        self.with_home(|home| {
            assert!(home.current_fiber.is_none());
            assert!(home.wait_for_awaitable.is_none());
            assert!(home.switch_to_invoker.is_none());
            assert!(home.yield_to_target.is_none());
        });
    }

    /// Body of the idle fiber.
    fn fiber_main(&self, spawned_epoch: u64) {
        {
            let created = self.counters.created_fibers.increment();
            let alive = self.counters.alive_fibers.add(1);
            tracing::trace!(thread = %self.thread_name, created, alive, "fiber started");
        }

        while self.fiber_main_step(spawned_epoch) {
            // Empty body.
        }

        {
            let alive = self.counters.alive_fibers.add(-1);
            tracing::trace!(thread = %self.thread_name, alive, "fiber finished");
        }
    }

    fn fiber_main_step(&self, spawned_epoch: u64) -> bool {
        // Call prepare_wait before checking the epoch, which may be modified
        // by a concurrently running shutdown() that updates the epoch and
        // then notifies all waiters.
        let cookie = self.callback_event_count.prepare_wait();

        let current_epoch = self.epoch.load(Ordering::Relaxed);
        if current_epoch & SHUTDOWN_EPOCH_MASK != 0 {
            self.callback_event_count.cancel_wait();
            return false;
        }

        // Safety: the executor is only touched from the thread currently
        // driving this scheduler's loop.
        let result = unsafe { (*self.executor.get()).begin_execute() };

        // We might get here after a long sleep, and the scheduler might have
        // spawned another event loop in the meantime. Examine the state
        // carefully: if the epoch advanced, this fiber migrated and the home
        // state now belongs to somebody else.
        let current_epoch = self.epoch.load(Ordering::Relaxed);

        // Make the matching call to end_execute unless it is already done in
        // thread_main_step. It is safe to call even if no action was actually
        // dequeued in begin_execute.
        if spawned_epoch == current_epoch {
            // Safety: epoch equality implies we are still the home thread.
            unsafe { (*self.executor.get()).end_execute() };
        }

        match result {
            BeginExecuteResult::QueueEmpty => {
                // If the fiber has yielded, just return control to the
                // scheduler.
                if spawned_epoch != current_epoch
                    || !self.with_home(|home| home.run_queue.is_empty())
                {
                    self.callback_event_count.cancel_wait();
                    return false;
                }
                // Actually await further notifications.
                self.callback_event_count.wait(cookie);
                true
            }
            BeginExecuteResult::Success => {
                // If someone called canceler() on the current fiber they have
                // the ability to cancel it at any moment; it cannot be
                // reused. If the fiber yielded at some point, it cannot be
                // reused either.
                if spawned_epoch != current_epoch
                    || self.with_home(|home| {
                        home.current_fiber
                            .as_ref()
                            .expect("no current fiber in fiber-main")
                            .is_cancelable()
                    })
                {
                    return false;
                }
                // Reuse the fiber but regenerate its id.
                let id = self.with_home(|home| {
                    home.current_fiber
                        .as_ref()
                        .expect("no current fiber in fiber-main")
                        .regenerate_id()
                });
                set_current_fiber_id(id);
                true
            }
            BeginExecuteResult::Terminated => false,
        }
    }

    /// Owner-only: yields control to `other`, placing the caller back at the
    /// front of the run queue. With no current fiber, simply schedules
    /// `other`.
    pub(crate) fn yield_to(&self, other: Arc<Fiber>) {
        let caller = self.with_home(|home| {
            let Some(caller) = home.current_fiber.as_ref().map(Arc::clone) else {
                assert_eq!(other.state(), FiberState::Suspended);
                home.run_queue.push_back(other);
                return None;
            };
            assert!(home.yield_to_target.is_none());
            home.yield_to_target = Some(other);
            Some(caller)
        });

        let Some(caller) = caller else { return };
        caller.set_suspended();
        switch_out_current(&caller);
    }

    /// Owner-only: parks the current fiber and reschedules it on `invoker`.
    pub(crate) fn switch_to(&self, invoker: InvokerRef) {
        let fiber = self.with_home(|home| {
            Arc::clone(
                home.current_fiber
                    .as_ref()
                    .expect("switch_to requires a fiber context"),
            )
        });

        fiber.unwind_if_canceled();

        if !fiber.try_set_sleeping(None) {
            error::raise_canceled();
        }

        self.with_home(|home| {
            assert!(home.switch_to_invoker.is_none());
            home.switch_to_invoker = Some(invoker);
        });

        switch_out_current(&fiber);
        // Cannot access `self` from this point: the fiber may have been
        // resumed by a different scheduler.
    }

    /// Owner-only: parks the current fiber until `awaitable` completes, then
    /// resumes it on `invoker`.
    pub(crate) fn wait_for(&self, awaitable: Awaitable, invoker: InvokerRef) {
        let fiber = self.with_home(|home| {
            Arc::clone(
                home.current_fiber
                    .as_ref()
                    .expect("wait_for requires a fiber context"),
            )
        });

        // Record the awaited future before touching any other state: a
        // concurrent cancel() either already makes this transition fail (and
        // we raise here, without parking) or finds the recorded future and
        // cancels it.
        if !fiber.try_set_sleeping(Some(awaitable.clone())) {
            error::raise_canceled();
        }

        self.with_home(|home| {
            assert!(home.wait_for_awaitable.is_none());
            assert!(home.switch_to_invoker.is_none());
            home.wait_for_awaitable = Some(awaitable);
            home.switch_to_invoker = Some(invoker);
        });

        switch_out_current(&fiber);
        // Cannot access `self` from this point: the fiber may have been
        // resumed by a different scheduler.
    }
}

/// The switch epilogue shared by every suspension point: out handlers fire,
/// the fiber leaves the thread, and on resume (possibly on another thread) in
/// handlers fire and pending cancellation is raised.
fn switch_out_current(fiber: &Arc<Fiber>) {
    fiber.invoke_out_handlers();
    fiber.switch_out();
    fiber.invoke_in_handlers();
    fiber.unwind_if_canceled();
}

/// Resumes a parked fiber on the current scheduler.
fn resume_fiber(fiber: Arc<Fiber>) {
    assert_eq!(fiber.state(), FiberState::Sleeping);
    fiber.set_suspended();

    current_scheduler().yield_to(fiber);
}

/// Fires a parked fiber's canceler and hands it to the finalizer thread so
/// the cancellation unwinds its stack there.
fn unwind_fiber(fiber: Arc<Fiber>) {
    fiber.canceler().cancel();

    finalizer::finalizer_invoker().invoke(Box::new(move || resume_fiber(fiber)));
}

/// Arranges for a sleeping fiber to be woken on `invoker`, either when
/// `awaitable` completes or (with no awaitable) right away. If the target
/// invoker is gone by then, the fiber is unwound through the finalizer
/// instead.
fn reschedule(fiber: Arc<Fiber>, awaitable: Option<Awaitable>, invoker: InvokerRef) {
    fiber.swap_current_invoker(Some(Arc::clone(&invoker)));

    // Initialize the canceler; who knows what might happen to this fiber?
    let _ = fiber.canceler();

    let resumer: Callback = {
        let fiber = Arc::clone(&fiber);
        Box::new(move || resume_fiber(fiber))
    };
    let unwinder: Callback = {
        let fiber = Arc::clone(&fiber);
        Box::new(move || unwind_fiber(fiber))
    };

    if let Some(awaitable) = awaitable {
        let target_fiber_id = fiber.id();
        awaitable.subscribe(Box::new(move || {
            tracing::debug!(%target_fiber_id, "waking up fiber");
            guarded_invoke(&invoker, resumer, unwinder);
        }));
    } else {
        guarded_invoke(&invoker, resumer, unwinder);
    }
}

thread_local! {
    static CURRENT_SCHEDULER: RefCell<Option<Arc<SchedulerThread>>> = const { RefCell::new(None) };
    static CURRENT_FIBER: Cell<*const Fiber> = const { Cell::new(ptr::null()) };
    static CURRENT_FIBER_ID: Cell<FiberId> = const { Cell::new(FiberId::INVALID) };
}

struct CurrentSchedulerGuard;

impl CurrentSchedulerGuard {
    fn set(scheduler: Arc<SchedulerThread>) -> Self {
        CURRENT_SCHEDULER.with(|slot| {
            let previous = slot.borrow_mut().replace(scheduler);
            debug_assert!(previous.is_none());
        });
        Self
    }
}

impl Drop for CurrentSchedulerGuard {
    fn drop(&mut self) {
        CURRENT_SCHEDULER.with(|slot| slot.borrow_mut().take());
    }
}

/// Returns the scheduler driving the current thread.
///
/// # Panics
///
/// Panics when called off a scheduler thread.
pub fn current_scheduler() -> Arc<SchedulerThread> {
    try_current_scheduler().expect("current_scheduler called off a scheduler thread")
}

/// Returns the scheduler driving the current thread, if any.
pub fn try_current_scheduler() -> Option<Arc<SchedulerThread>> {
    CURRENT_SCHEDULER.with(|slot| slot.borrow().clone())
}

/// Returns the id of the currently running fiber, or [`FiberId::INVALID`]
/// when not on a scheduler thread.
pub fn current_fiber_id() -> FiberId {
    CURRENT_FIBER_ID.with(Cell::get)
}

/// Runs `f` against the currently running fiber, if any.
pub(crate) fn with_current_fiber<R>(f: impl FnOnce(&Fiber) -> R) -> Option<R> {
    CURRENT_FIBER.with(|slot| {
        let fiber = slot.get();
        if fiber.is_null() {
            None
        } else {
            // Safety: the pointer is published only while the scheduler holds
            // a strong reference to the fiber, on this very thread.
            Some(f(unsafe { &*fiber }))
        }
    })
}

pub(crate) fn current_fiber() -> Option<Arc<Fiber>> {
    CURRENT_SCHEDULER.with(|slot| {
        let scheduler = slot.borrow();
        scheduler
            .as_ref()
            .and_then(|scheduler| scheduler.with_home(|home| home.current_fiber.clone()))
    })
}

fn set_current_fiber(fiber: Option<&Arc<Fiber>>) {
    match fiber {
        Some(fiber) => {
            CURRENT_FIBER.with(|slot| slot.set(Arc::as_ptr(fiber)));
            CURRENT_FIBER_ID.with(|slot| slot.set(fiber.id()));
        }
        None => {
            CURRENT_FIBER.with(|slot| slot.set(ptr::null()));
            CURRENT_FIBER_ID.with(|slot| slot.set(FiberId::INVALID));
        }
    }
}

pub(crate) fn set_current_fiber_id(id: FiberId) {
    CURRENT_FIBER_ID.with(|slot| slot.set(id));
}
