// Copyright 2026 the spindle authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Per-size-class pooling of fiber stacks.
//!
//! Creating a guard-paged stack costs two system calls; fibers are created on
//! every scheduling round. Terminated fibers therefore return their stack to
//! a per-class pool, capped at a configurable number of idle stacks.

use context::{HostStack, Stack};
use core::sync::atomic::{AtomicUsize, Ordering};
use std::mem::ManuallyDrop;

/// Stack size classes available to fibers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StackSize {
    /// 256 KiB, the default for scheduler-spawned fibers.
    Small,
    /// 8 MiB, for work with deep recursion.
    Large,
}

impl StackSize {
    /// Usable bytes, excluding the guard page.
    pub const fn byte_size(self) -> usize {
        match self {
            StackSize::Small => 256 << 10,
            StackSize::Large => 8 << 20,
        }
    }

    const fn index(self) -> usize {
        match self {
            StackSize::Small => 0,
            StackSize::Large => 1,
        }
    }
}

struct Pool {
    idle: spin::Mutex<Vec<HostStack>>,
    capacity: AtomicUsize,
}

impl Pool {
    const fn new(capacity: usize) -> Self {
        Self {
            idle: spin::Mutex::new(Vec::new()),
            capacity: AtomicUsize::new(capacity),
        }
    }
}

static POOLS: [Pool; 2] = [Pool::new(1024), Pool::new(32)];

/// Returns the current limit on idle pooled stacks of the given class.
pub fn stack_pool_capacity(size: StackSize) -> usize {
    POOLS[size.index()].capacity.load(Ordering::Relaxed)
}

/// Sets the limit on idle pooled stacks of the given class, freeing any
/// excess immediately.
pub fn set_stack_pool_capacity(size: StackSize, capacity: usize) {
    let pool = &POOLS[size.index()];
    pool.capacity.store(capacity, Ordering::Relaxed);
    let excess = {
        let mut idle = pool.idle.lock();
        let split_at = idle.len().min(capacity);
        idle.split_off(split_at)
    };
    drop(excess);
}

/// A stack leased from the pool; returns itself on drop.
pub(crate) struct PooledStack {
    stack: ManuallyDrop<HostStack>,
    size: StackSize,
}

pub(crate) fn allocate(size: StackSize) -> PooledStack {
    if let Some(stack) = POOLS[size.index()].idle.lock().pop() {
        return PooledStack {
            stack: ManuallyDrop::new(stack),
            size,
        };
    }

    match HostStack::new(size.byte_size()) {
        Ok(stack) => PooledStack {
            stack: ManuallyDrop::new(stack),
            size,
        },
        Err(err) => {
            // Running out of address space for stacks is not survivable.
            panic!("failed to allocate a {size:?} fiber stack: {err}");
        }
    }
}

impl Drop for PooledStack {
    fn drop(&mut self) {
        // Safety: taken exactly once, here.
        let stack = unsafe { ManuallyDrop::take(&mut self.stack) };
        let pool = &POOLS[self.size.index()];
        let mut idle = pool.idle.lock();
        if idle.len() < pool.capacity.load(Ordering::Relaxed) {
            idle.push(stack);
        }
        // Over capacity: the stack is freed right here, with the lock held
        // only for the length check.
    }
}

unsafe impl Stack for PooledStack {
    fn top(&self) -> core::num::NonZeroUsize {
        self.stack.top()
    }

    fn bottom(&self) -> core::num::NonZeroUsize {
        self.stack.bottom()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Large stacks are only allocated here, so the pool is exclusively ours
    // even with tests running in parallel; fibers in other tests use Small.
    #[test]
    fn pool_recycles_and_respects_capacity() {
        let first = allocate(StackSize::Large);
        let top = first.top();
        drop(first);

        let second = allocate(StackSize::Large);
        assert_eq!(second.top(), top);

        let previous = stack_pool_capacity(StackSize::Large);
        set_stack_pool_capacity(StackSize::Large, 0);
        drop(second);
        assert!(POOLS[StackSize::Large.index()].idle.lock().is_empty());

        set_stack_pool_capacity(StackSize::Large, previous);
    }
}
