//! Counting semaphore over task notifications.
//!
//! The input rings (terminal keyboard, stdin waiters) follow the classic
//! give-from-producer / take-from-consumer shape. The count lives in an
//! atomic; blocking goes through the scheduler's notify primitive so a
//! `take` suspends the calling task instead of spinning.

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::services::task;

pub struct Semaphore {
    count: AtomicU32,
    /// Task currently blocked in `take`, if any. One waiter is enough
    /// for the single-consumer rings this backs.
    waiter: AtomicUsize,
}

impl Semaphore {
    pub const fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
            waiter: AtomicUsize::new(0),
        }
    }

    /// Signal one unit; wakes the blocked consumer if present.
    pub fn give(&self) {
        self.count.fetch_add(1, Ordering::Release);
        let waiter = self.waiter.load(Ordering::Acquire);
        if waiter != 0 {
            task::notify_give(waiter);
        }
    }

    /// Take one unit, blocking until available.
    pub fn take(&self) {
        loop {
            if self.try_take() {
                return;
            }
            self.waiter.store(task::current(), Ordering::Release);
            // Re-check after publishing the waiter so a give that raced
            // the store is not lost.
            if self.try_take() {
                self.waiter.store(0, Ordering::Release);
                return;
            }
            task::notify_take(true);
            self.waiter.store(0, Ordering::Release);
        }
    }

    /// Non-blocking take; false when the count is zero.
    pub fn try_take(&self) -> bool {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
            .is_ok()
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}
