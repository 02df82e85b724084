#![no_std]

pub mod hash;
pub mod klog;
pub mod numfmt;
pub mod ring_buffer;
pub mod semaphore;
pub mod services;
pub mod spinlock;
pub mod state_cell;
pub mod string;
pub mod testing;

pub mod tests;

#[doc(hidden)]
pub use paste;

pub use hash::fnv1a32;
pub use klog::{KlogLevel, klog_get_level, klog_register_backend, klog_set_level};
pub use ring_buffer::RingBuffer;
pub use semaphore::Semaphore;
pub use spinlock::{HwSpinlock, HwSpinlockGuard, SchedMutex, SchedMutexGuard};
pub use state_cell::StateCell;
pub use string::bytes_as_str;
