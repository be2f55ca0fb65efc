// Copyright 2026 the spindle authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The promise/future pair fibers park on.
//!
//! This is deliberately small: a one-shot shared state completing with
//! `Result<T, FutureError>`, inline subscriber callbacks, cooperative
//! cancellation, and a blocking `get` for plain OS threads. The scheduler
//! only ever sees the type-erased [`Awaitable`] view: subscribe, cancel,
//! is-set.

use crate::error::FutureError;
use core::cell::UnsafeCell;
use core::mem;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

/// What a future resolves to: the value, or the reason there is none.
pub type Completion<T> = Result<T, FutureError>;

type Subscriber<T> = Box<dyn FnOnce(&Completion<T>) + Send>;
type CancelHandler = Box<dyn FnOnce() + Send>;

struct Waiters<T> {
    subscribers: Vec<Subscriber<T>>,
    cancel_handlers: Vec<CancelHandler>,
}

struct SharedState<T> {
    /// Sticky completion flag; `value` is written exactly once, before this
    /// flips to true (with release ordering, under the waiters lock).
    complete: AtomicBool,
    canceled: AtomicBool,
    promises: AtomicUsize,
    value: UnsafeCell<Option<Completion<T>>>,
    waiters: Mutex<Waiters<T>>,
    cond: Condvar,
}

// Safety: `value` is written once under the waiters lock before `complete`
// is set, and only read (shared) afterwards.
unsafe impl<T: Send> Send for SharedState<T> {}
unsafe impl<T: Send> Sync for SharedState<T> {}

impl<T> SharedState<T> {
    fn new(promises: usize) -> Arc<Self> {
        Arc::new(Self {
            complete: AtomicBool::new(false),
            canceled: AtomicBool::new(false),
            promises: AtomicUsize::new(promises),
            value: UnsafeCell::new(None),
            waiters: Mutex::new(Waiters {
                subscribers: Vec::new(),
                cancel_handlers: Vec::new(),
            }),
            cond: Condvar::new(),
        })
    }

    fn lock_waiters(&self) -> std::sync::MutexGuard<'_, Waiters<T>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the completion value, if set.
    fn peek(&self) -> Option<&Completion<T>> {
        if self.complete.load(Ordering::Acquire) {
            // Safety: complete is sticky and the value is never written again.
            unsafe { (*self.value.get()).as_ref() }
        } else {
            None
        }
    }

    /// Completes the future. Returns false if it was already complete.
    /// Subscribers run inline, after the lock is released.
    fn complete(&self, result: Completion<T>) -> bool {
        let subscribers = {
            let mut waiters = self.lock_waiters();
            if self.complete.load(Ordering::Relaxed) {
                return false;
            }
            // Safety: guarded by the waiters lock and the complete flag.
            unsafe {
                *self.value.get() = Some(result);
            }
            self.complete.store(true, Ordering::Release);
            mem::take(&mut waiters.subscribers)
        };

        self.cond.notify_all();

        if !subscribers.is_empty() {
            let value = self.peek().expect("completed without a value");
            for subscriber in subscribers {
                subscriber(value);
            }
        }
        true
    }

    fn subscribe(&self, subscriber: Subscriber<T>) {
        let mut subscriber = Some(subscriber);
        {
            let mut waiters = self.lock_waiters();
            if !self.complete.load(Ordering::Relaxed) {
                waiters
                    .subscribers
                    .push(subscriber.take().expect("subscriber consumed"));
            }
        }
        // Already complete: fire inline without holding the lock.
        if let Some(subscriber) = subscriber {
            let value = self.peek().expect("completed without a value");
            subscriber(value);
        }
    }

    fn cancel(&self) {
        if self.canceled.swap(true, Ordering::AcqRel) {
            return;
        }
        let handlers = mem::take(&mut self.lock_waiters().cancel_handlers);
        if handlers.is_empty() {
            // Nobody on the producing side reacts to cancellation: complete
            // with an error so waiters wake up.
            self.complete(Err(FutureError::Canceled));
        } else {
            for handler in handlers {
                handler();
            }
        }
    }
}

/// The producing half of a one-shot future.
///
/// Clonable; dropping the last clone without setting a value completes the
/// future with [`FutureError::Abandoned`].
pub struct Promise<T> {
    state: Arc<SharedState<T>>,
}

// === impl Promise ===

impl<T: Send + 'static> Promise<T> {
    pub fn new() -> Self {
        Self {
            state: SharedState::new(1),
        }
    }

    /// Returns the consuming half.
    pub fn future(&self) -> Future<T> {
        Future {
            state: Arc::clone(&self.state),
        }
    }

    /// Sets the value.
    ///
    /// # Panics
    ///
    /// Panics if the future is already complete.
    pub fn set(&self, value: T) {
        assert!(self.try_set(value), "future is already complete");
    }

    /// Sets the value unless the future is already complete.
    pub fn try_set(&self, value: T) -> bool {
        self.state.complete(Ok(value))
    }

    /// Completes with an error unless the future is already complete.
    pub fn try_set_err(&self, error: FutureError) -> bool {
        self.state.complete(Err(error))
    }

    /// Registers a handler to run when the consuming side cancels. The
    /// presence of at least one handler makes cancellation the producer's
    /// responsibility: the future is then *not* auto-completed with
    /// [`FutureError::Canceled`].
    ///
    /// Runs the handler immediately if the future is already canceled.
    pub fn on_canceled(&self, handler: impl FnOnce() + Send + 'static) {
        let mut handler: Option<CancelHandler> = Some(Box::new(handler));
        {
            let mut waiters = self.state.lock_waiters();
            if !self.state.canceled.load(Ordering::Acquire) {
                waiters
                    .cancel_handlers
                    .push(handler.take().expect("handler consumed"));
            }
        }
        if let Some(handler) = handler {
            handler();
        }
    }

    /// Whether the consuming side requested cancellation.
    pub fn is_canceled(&self) -> bool {
        self.state.canceled.load(Ordering::Acquire)
    }
}

impl<T: Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        self.state.promises.fetch_add(1, Ordering::Relaxed);
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if self.state.promises.fetch_sub(1, Ordering::AcqRel) == 1
            && !self.state.complete.load(Ordering::Acquire)
        {
            // Last producer went away without a value.
            self.state.complete(Err(FutureError::Abandoned));
        }
    }
}

/// The consuming half of a one-shot future.
pub struct Future<T> {
    state: Arc<SharedState<T>>,
}

// === impl Future ===

impl<T: Send + 'static> Future<T> {
    /// An already-completed future.
    pub fn ready(value: T) -> Self {
        let promise = Promise::new();
        promise.set(value);
        promise.future()
    }

    /// Whether the future has completed (with a value or an error).
    pub fn is_set(&self) -> bool {
        self.state.complete.load(Ordering::Acquire)
    }

    /// Whether cancellation was requested.
    pub fn is_canceled(&self) -> bool {
        self.state.canceled.load(Ordering::Acquire)
    }

    /// Registers a callback invoked exactly once with the completion value,
    /// inline on the completing thread (immediately, if already complete).
    /// The callback must not block.
    pub fn subscribe(&self, subscriber: impl FnOnce(&Completion<T>) + Send + 'static) {
        self.state.subscribe(Box::new(subscriber));
    }

    /// Requests cancellation. Best effort: producers that registered an
    /// [`on_canceled`](Promise::on_canceled) handler decide how to complete;
    /// otherwise the future completes with [`FutureError::Canceled`].
    pub fn cancel(&self) {
        self.state.cancel();
    }

    /// Returns a clone of the completion value, if complete.
    pub fn try_get(&self) -> Option<Completion<T>>
    where
        T: Clone,
    {
        self.state.peek().cloned()
    }

    /// Blocks the calling OS thread until the future completes.
    ///
    /// Never call this from fiber context; park with
    /// [`wait_for`](crate::api::wait_for) instead.
    pub fn get(&self) -> Completion<T>
    where
        T: Clone,
    {
        let mut waiters = self.state.lock_waiters();
        while !self.state.complete.load(Ordering::Acquire) {
            waiters = self
                .state
                .cond
                .wait(waiters)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(waiters);
        self.state.peek().cloned().expect("completed without a value")
    }

    /// Blocks until the future completes or the timeout elapses. Returns
    /// whether the future completed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut waiters = self.state.lock_waiters();
        while !self.state.complete.load(Ordering::Acquire) {
            let now = Instant::now();
            let Some(remaining) = deadline.checked_duration_since(now).filter(|d| !d.is_zero())
            else {
                return false;
            };
            let (guard, _timeout_result) = self
                .state
                .cond
                .wait_timeout(waiters, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            waiters = guard;
        }
        true
    }

    /// The type-erased view the scheduler parks on.
    pub fn as_awaitable(&self) -> Awaitable {
        Awaitable {
            state: Arc::clone(&self.state) as Arc<dyn AwaitableState>,
        }
    }
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

/// The pre-completed void future; waiting on it forces exactly one round trip
/// through the scheduler.
pub fn void_future() -> Future<()> {
    static VOID: OnceLock<Future<()>> = OnceLock::new();
    VOID.get_or_init(|| Future::ready(())).clone()
}

trait AwaitableState: Send + Sync {
    fn subscribe_erased(&self, subscriber: Box<dyn FnOnce() + Send>);
    fn cancel_erased(&self);
    fn is_set_erased(&self) -> bool;
}

impl<T: Send + 'static> AwaitableState for SharedState<T> {
    fn subscribe_erased(&self, subscriber: Box<dyn FnOnce() + Send>) {
        self.subscribe(Box::new(move |_completion| subscriber()));
    }

    fn cancel_erased(&self) {
        self.cancel();
    }

    fn is_set_erased(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }
}

/// Type-erased handle to a future, as seen by the wait/suspend protocol.
#[derive(Clone)]
pub struct Awaitable {
    state: Arc<dyn AwaitableState>,
}

// === impl Awaitable ===

impl Awaitable {
    pub(crate) fn subscribe(&self, subscriber: Box<dyn FnOnce() + Send>) {
        self.state.subscribe_erased(subscriber);
    }

    pub(crate) fn cancel(&self) {
        self.state.cancel_erased();
    }

    pub(crate) fn is_set(&self) -> bool {
        self.state.is_set_erased()
    }
}

impl core::fmt::Debug for Awaitable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Awaitable")
            .field("is_set", &self.is_set())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn set_then_subscribe_fires_inline() {
        let promise = Promise::new();
        let future = promise.future();
        promise.set(7);

        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        future.subscribe(move |completion| {
            assert_eq!(*completion, Ok(7));
            fired2.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(fired.load(Ordering::Relaxed), 1);
        assert_eq!(future.try_get(), Some(Ok(7)));
    }

    #[test]
    fn subscribe_then_set_fires_once() {
        let promise = Promise::new();
        let future = promise.future();

        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        future.subscribe(move |_| {
            fired2.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(fired.load(Ordering::Relaxed), 0);

        promise.set(1);
        assert_eq!(fired.load(Ordering::Relaxed), 1);
        assert!(!promise.try_set(2));
    }

    #[test]
    fn abandoned_promise_completes_with_error() {
        let promise = Promise::<u32>::new();
        let future = promise.future();
        let extra = promise.clone();
        drop(promise);
        assert!(!future.is_set());
        drop(extra);
        assert_eq!(future.try_get(), Some(Err(FutureError::Abandoned)));
    }

    #[test]
    fn cancel_without_handler_completes() {
        let promise = Promise::<u32>::new();
        let future = promise.future();
        future.cancel();
        assert!(future.is_canceled());
        assert_eq!(future.try_get(), Some(Err(FutureError::Canceled)));
    }

    #[test]
    fn cancel_with_handler_defers_to_producer() {
        let promise = Promise::<u32>::new();
        let future = promise.future();
        let promise2 = promise.clone();
        promise.on_canceled(move || {
            promise2.try_set(42);
        });

        future.cancel();
        assert_eq!(future.try_get(), Some(Ok(42)));
    }

    #[test]
    fn blocking_get_across_threads() {
        let promise = Promise::new();
        let future = promise.future();

        let setter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            promise.set("done");
        });

        assert_eq!(future.get(), Ok("done"));
        setter.join().unwrap();
    }

    #[test]
    fn wait_timeout_on_pending() {
        let promise = Promise::<u32>::new();
        let future = promise.future();
        assert!(!future.wait_timeout(Duration::from_millis(20)));
        promise.set(1);
        assert!(future.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn void_future_is_set() {
        assert!(void_future().is_set());
        let awaitable = void_future().as_awaitable();
        assert!(awaitable.is_set());

        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        awaitable.subscribe(Box::new(move || {
            fired2.fetch_add(1, Ordering::Relaxed);
        }));
        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }
}
