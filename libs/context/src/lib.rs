//! Raw stack switching for the spindle runtime.
//!
//! This crate provides [`ExecutionContext`], a one-shot stackful execution
//! context with its own guard-paged stack. The scheduler switches into a
//! context with [`ExecutionContext::resume`]; code running inside it switches
//! back out through the [`Switcher`] handle passed to its entry closure. All
//! callee-saved registers plus the stack pointer are saved and restored on
//! every switch; nothing else is implied, which is what makes the switch
//! cheap.
//!
//! The switching machinery is heavily based off of [`corosensei`] by Amanieu
//! d'Antras, reduced to the payload-free protocol the runtime above needs:
//! contexts carry no yield or return values, scheduling state travels through
//! the runtime's own structures instead.
//!
//! Unwinding must never cross a switch: the entry closure is required to
//! catch anything that would otherwise unwind out of it. The assembly carries
//! no unwind metadata, only enough CFI for backtraces to walk from a context
//! stack into its parent.
//!
//! [`corosensei`]: https://github.com/Amanieu/corosensei

mod arch;
pub mod stack;
mod utils;

pub use crate::stack::{HostStack, MIN_STACK_SIZE, STACK_ALIGNMENT, Stack};

use crate::stack::StackPointer;
use crate::utils::EncodedValue;
use core::cell::Cell;
use core::ptr;
use std::mem::ManuallyDrop;

/// Outcome of [`ExecutionContext::resume`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resume {
    /// The context switched back out through its [`Switcher`] and can be
    /// resumed again.
    Suspended,

    /// The entry closure returned; the context is done and its stack can be
    /// reclaimed.
    Completed,
}

/// A suspended computation with its own stack.
pub struct ExecutionContext<S: Stack = HostStack> {
    /// Stack that the context is executing on.
    stack: ManuallyDrop<S>,
    /// Current stack pointer at which the suspended state is held. This is
    /// None when the context has completed execution.
    stack_ptr: Option<StackPointer>,
    /// Initial stack pointer value. This is used to detect whether a context
    /// has ever been resumed since it was created.
    ///
    /// This works because it is impossible for a context to revert back to
    /// its initial stack pointer: suspending requires pushing several values
    /// to the stack.
    initial_stack_ptr: StackPointer,
    /// Drops the entry closure stored on the stack if the context is
    /// discarded before its first resume.
    drop_fn: unsafe fn(ptr: *mut u8),
}

// Safety: a suspended context is inert data. The entry closure is required to
// be Send, and the runtime above guarantees that a context is only ever
// resumed by one thread at a time, so moving a suspended context between
// scheduler threads is sound as long as the code running inside it does not
// hold thread-affine state across a switch. That contract belongs to the
// runtime's suspension points and is documented there.
unsafe impl<S: Stack + Send> Send for ExecutionContext<S> {}

impl<S: Stack> ExecutionContext<S> {
    /// Creates a new context that will run `func` on `stack` when first
    /// resumed.
    ///
    /// The closure is stored at the top of the stack until the first resume.
    pub fn new<F>(stack: S, func: F) -> Self
    where
        F: FnOnce(&Switcher) + Send + 'static,
    {
        unsafe extern "C" fn context_entry<F>(
            _arg: EncodedValue,
            parent_link: &mut StackPointer,
            obj: *mut F,
        ) -> !
        where
            F: FnOnce(&Switcher),
        {
            // Safety: init_stack arranged for parent_link to point at the
            // parent link slot and obj at the closure written to the stack.
            unsafe {
                // The Switcher is a #[repr(transparent)] wrapper around the
                // parent link on the stack.
                let switcher = &*(ptr::from_mut(parent_link).cast::<Switcher>());

                debug_assert_eq!(obj as usize % align_of::<F>(), 0);
                let func = obj.read();

                func(switcher);

                // The entry closure returned normally: report completion to
                // whoever resumed us last. An unwind out of `func` would hit
                // the extern "C" boundary and abort, which is exactly the
                // contract stated in the crate docs.
                arch::switch_and_reset(0, switcher.stack_ptr.as_ptr())
            }
        }

        // Drop function to free the entry closure if the context never ran.
        unsafe fn drop_fn<F>(ptr: *mut u8) {
            // Safety: caller passes the address init_stack stored the closure
            // at, and only for a context that has never been resumed.
            unsafe { ptr::drop_in_place(ptr.cast::<F>()) }
        }

        // Safety: the stack is fresh and exclusively ours.
        let stack_ptr = unsafe { arch::init_stack(&stack, context_entry::<F>, func) };

        Self {
            stack: ManuallyDrop::new(stack),
            stack_ptr: Some(stack_ptr),
            initial_stack_ptr: stack_ptr,
            drop_fn: drop_fn::<F>,
        }
    }

    /// Switches into the context, running it until it either suspends or its
    /// entry closure returns.
    ///
    /// # Panics
    ///
    /// Panics if the context has already completed.
    pub fn resume(&mut self) -> Resume {
        let stack_ptr = self
            .stack_ptr
            .take()
            .expect("attempted to resume a completed execution context");

        // Safety: stack_ptr is the valid suspended state of this context and
        // we are the only ones resuming it.
        let (_ret, stack_ptr) = unsafe { arch::switch_and_link(0, stack_ptr, self.stack.top()) };

        self.stack_ptr = stack_ptr;
        if stack_ptr.is_some() {
            Resume::Suspended
        } else {
            Resume::Completed
        }
    }

    /// Returns whether this context has been resumed at least once.
    pub fn started(&self) -> bool {
        self.stack_ptr != Some(self.initial_stack_ptr)
    }

    /// Returns whether this context has finished executing.
    pub fn done(&self) -> bool {
        self.stack_ptr.is_none()
    }

    /// Reclaims the stack of a completed (or never-started) context.
    ///
    /// # Panics
    ///
    /// Panics if the context has started but not yet completed; a live stack
    /// cannot be reclaimed.
    pub fn into_stack(self) -> S {
        let mut this = ManuallyDrop::new(self);

        if let Some(stack_ptr) = this.stack_ptr.take() {
            assert_eq!(
                stack_ptr, this.initial_stack_ptr,
                "cannot reclaim the stack of a live execution context"
            );
            // Safety: the context never ran, so the entry closure is still
            // sitting on the stack where init_stack put it.
            unsafe { arch::drop_initial_obj(this.stack.top(), stack_ptr, this.drop_fn) };
        }

        // Safety: `this` is ManuallyDrop, the stack is moved out exactly once.
        unsafe { ManuallyDrop::take(&mut this.stack) }
    }
}

impl<S: Stack> Drop for ExecutionContext<S> {
    fn drop(&mut self) {
        if let Some(stack_ptr) = self.stack_ptr.take() {
            if stack_ptr == self.initial_stack_ptr {
                // Never started: free the entry closure stored on the stack.
                // Safety: see into_stack.
                unsafe { arch::drop_initial_obj(self.stack.top(), stack_ptr, self.drop_fn) };
            } else {
                // A suspended context cannot be unwound from the outside; the
                // frames on its stack would be leaked in place. The runtime
                // drives every fiber to termination, so getting here is a bug.
                eprintln!("dropped a live execution context; aborting");
                std::process::abort();
            }
        }

        // Safety: the stack is dropped exactly once, here.
        unsafe { ManuallyDrop::drop(&mut self.stack) }
    }
}

/// Handle through which code running inside an [`ExecutionContext`] switches
/// back out.
///
/// Internally this is just the parent link on the context's stack, which is
/// refreshed on every switch into the context.
#[repr(transparent)]
pub struct Switcher {
    stack_ptr: Cell<StackPointer>,
}

impl Switcher {
    /// Suspends the calling context, returning control to the caller of
    /// [`ExecutionContext::resume`]. Returns when the context is resumed
    /// again, possibly on a different thread.
    pub fn switch_out(&self) {
        // Safety: the parent link always holds the stack pointer of the
        // context that last resumed us.
        unsafe {
            arch::switch_yield(0, self.stack_ptr.as_ptr());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn small_stack() -> HostStack {
        HostStack::new(64 * 1024).expect("failed to allocate stack")
    }

    #[test]
    fn switch_roundtrip() {
        let steps = Arc::new(AtomicUsize::new(0));

        let mut ctx = ExecutionContext::new(small_stack(), {
            let steps = Arc::clone(&steps);
            move |switcher| {
                for _ in 0..5 {
                    steps.fetch_add(1, Ordering::Relaxed);
                    switcher.switch_out();
                }
            }
        });

        assert!(!ctx.started());
        for expected in 1..=5 {
            assert_eq!(ctx.resume(), Resume::Suspended);
            assert_eq!(steps.load(Ordering::Relaxed), expected);
        }
        assert_eq!(ctx.resume(), Resume::Completed);
        assert!(ctx.done());
    }

    #[test]
    fn resume_on_other_thread() {
        let mut ctx = ExecutionContext::new(small_stack(), |switcher| {
            switcher.switch_out();
        });
        assert_eq!(ctx.resume(), Resume::Suspended);

        // The suspended context may be picked up by a different thread.
        let handle = std::thread::spawn(move || {
            assert_eq!(ctx.resume(), Resume::Completed);
            ctx
        });
        let ctx = handle.join().unwrap();
        assert!(ctx.done());
    }

    #[test]
    fn unstarted_context_drops_closure() {
        let tracker = Arc::new(());

        let ctx = ExecutionContext::new(small_stack(), {
            let tracker = Arc::clone(&tracker);
            move |_switcher| {
                let _keep = tracker;
            }
        });

        assert_eq!(Arc::strong_count(&tracker), 2);
        drop(ctx);
        assert_eq!(Arc::strong_count(&tracker), 1);
    }

    #[test]
    fn into_stack_reclaims_completed() {
        let mut ctx = ExecutionContext::new(small_stack(), |_switcher| {});
        assert_eq!(ctx.resume(), Resume::Completed);
        let stack = ctx.into_stack();
        assert!(stack.usable_size() >= 64 * 1024);
    }
}
