// Copyright 2026 the spindle authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Fiber-local storage.
//!
//! Slots are reserved once, process-wide, and indexed into every fiber's
//! private slot vector. A slot value is a bare `usize` (conventionally a
//! pointer); zero means "unset". A slot's destructor, if registered, runs for
//! every non-zero value when the owning fiber is destroyed, in slot order.

use spin::RwLock;

/// Destructor invoked with the slot value when a fiber is destroyed.
pub type SlotDtor = fn(usize);

static REGISTRY: RwLock<Vec<Option<SlotDtor>>> = RwLock::new(Vec::new());

/// Reserves a new fiber-local slot, optionally with a destructor.
///
/// Returns the slot index to pass to
/// [`with_fiber_local`](crate::api::with_fiber_local).
pub fn reserve_slot(dtor: Option<SlotDtor>) -> usize {
    let mut registry = REGISTRY.write();
    registry.push(dtor);
    registry.len() - 1
}

/// Number of slots reserved so far.
pub(crate) fn slot_count() -> usize {
    REGISTRY.read().len()
}

/// Runs the destructor registered for `index`, if any, on a non-zero value.
pub(crate) fn destruct(index: usize, value: usize) {
    debug_assert_ne!(value, 0);
    let dtor = REGISTRY.read().get(index).copied().flatten();
    if let Some(dtor) = dtor {
        dtor(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static DESTROYED: AtomicUsize = AtomicUsize::new(0);

    #[test]
    fn reserve_and_destruct() {
        let plain = reserve_slot(None);
        let tracked = reserve_slot(Some(|value| {
            DESTROYED.fetch_add(value, Ordering::Relaxed);
        }));
        assert!(tracked > plain);
        assert!(slot_count() > tracked);

        destruct(plain, 7);
        assert_eq!(DESTROYED.load(Ordering::Relaxed), 0);

        destruct(tracked, 7);
        assert_eq!(DESTROYED.load(Ordering::Relaxed), 7);
    }
}
