//! The two locks the OS core is allowed to use.
//!
//! `HwSpinlock` models the SIO hardware spinlocks: a raw busy-wait lock
//! that is safe against the *other core* and takes a handful of cycles.
//! It must never raise the scheduler's interrupt mask — that could delay
//! the scanline DMA IRQ on the video core and tear the picture — so it
//! is exactly a CAS loop, nothing more. Hold times must be a few loads
//! and stores; the event bus is its only legitimate user.
//!
//! `SchedMutex` is the FreeRTOS-style "suspend the scheduler" critical
//! section for state shared between tasks on the scheduler core (PSRAM
//! free list, extfs table, process table). It is not IRQ-safe and must
//! not be held across anything that blocks.

use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::services;

pub struct HwSpinlock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: exclusive access is guaranteed by the CAS acquire below.
unsafe impl<T: Send> Send for HwSpinlock<T> {}
unsafe impl<T: Send> Sync for HwSpinlock<T> {}

pub struct HwSpinlockGuard<'a, T> {
    lock: &'a HwSpinlock<T>,
}

impl<T> HwSpinlock<T> {
    #[inline]
    pub const fn new(data: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    #[inline]
    pub fn lock(&self) -> HwSpinlockGuard<'_, T> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_loop();
        }
        HwSpinlockGuard { lock: self }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<HwSpinlockGuard<'_, T>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| HwSpinlockGuard { lock: self })
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl<'a, T> Deref for HwSpinlockGuard<'a, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for HwSpinlockGuard<'a, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for HwSpinlockGuard<'a, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// Scheduler-suspend mutex. All contending tasks run on the scheduler
/// core, so suspending the scheduler while the guard lives is enough for
/// exclusivity; the atomic flag only catches re-entrancy bugs.
pub struct SchedMutex<T> {
    held: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: exclusivity comes from scheduler suspension plus the held flag.
unsafe impl<T: Send> Send for SchedMutex<T> {}
unsafe impl<T: Send> Sync for SchedMutex<T> {}

pub struct SchedMutexGuard<'a, T> {
    lock: &'a SchedMutex<T>,
}

impl<T> SchedMutex<T> {
    #[inline]
    pub const fn new(data: T) -> Self {
        Self {
            held: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    #[inline]
    pub fn lock(&self) -> SchedMutexGuard<'_, T> {
        services::task::suspend_all();
        while self
            .held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_loop();
        }
        SchedMutexGuard { lock: self }
    }

    /// Run `f` with the data locked; the usual call shape for the short
    /// critical sections this lock is meant for.
    #[inline]
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }
}

impl<'a, T> Deref for SchedMutexGuard<'a, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for SchedMutexGuard<'a, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for SchedMutexGuard<'a, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
        services::task::resume_all();
    }
}
