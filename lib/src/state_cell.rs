//! Boot-time-initialized shared state.
//!
//! Most OS-wide structures (window table, service structs) are written
//! from exactly one place at a time: registration happens during
//! single-threaded boot, and afterwards mutation is confined to the
//! scheduler core with short, non-reentrant accesses. `StateCell` wraps
//! that discipline so the rest of the tree does not grow `static mut`.

use core::cell::UnsafeCell;

pub struct StateCell<T> {
    inner: UnsafeCell<T>,
}

// SAFETY: callers uphold the single-writer discipline documented above;
// the cell itself only hands out scoped references.
unsafe impl<T: Send> Sync for StateCell<T> {}

impl<T> StateCell<T> {
    #[inline]
    pub const fn new(value: T) -> Self {
        Self {
            inner: UnsafeCell::new(value),
        }
    }

    /// Scoped shared access. Must not run concurrently with `with_mut`
    /// on another core; all users live on the scheduler core.
    #[inline]
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(unsafe { &*self.inner.get() })
    }

    /// Scoped exclusive access under the same confinement rule.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(unsafe { &mut *self.inner.get() })
    }
}
