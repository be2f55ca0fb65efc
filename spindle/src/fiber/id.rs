// Copyright 2026 the spindle authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// An opaque ID that uniquely identifies a fiber for the lifetime of the
/// process.
///
/// # Notes
///
/// - A fiber that is reused across logically distinct work units regenerates
///   its id, so ids identify *work units*, not stacks.
/// - Ids are not sequential across threads and do not indicate spawn order.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct FiberId(u64);

impl FiberId {
    /// The sentinel id reported off fiber context.
    pub const INVALID: Self = Self(0);

    pub(crate) fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);

        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        Self(id)
    }

    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub(crate) fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns whether this is a real fiber id rather than the sentinel.
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}
