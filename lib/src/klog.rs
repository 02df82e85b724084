//! Kernel logging.
//!
//! All diagnostics funnel through a single registered **backend**
//! function pointer. There is no always-present serial port on this
//! board, so until the UART driver registers itself during boot, log
//! lines are dropped. The backend receives the pre-formatted arguments
//! for one line and must append the trailing newline itself, under
//! whatever lock keeps lines from the two cores from interleaving.

use core::fmt;
use core::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KlogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl KlogLevel {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => KlogLevel::Error,
            1 => KlogLevel::Warn,
            2 => KlogLevel::Info,
            3 => KlogLevel::Debug,
            _ => KlogLevel::Trace,
        }
    }
}

static CURRENT_LEVEL: AtomicU8 = AtomicU8::new(KlogLevel::Info as u8);

pub type KlogBackend = fn(fmt::Arguments<'_>);

/// Stored as a raw pointer; null means "no backend yet, drop output".
static BACKEND: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

pub fn klog_register_backend(backend: KlogBackend) {
    BACKEND.store(backend as *mut (), Ordering::Release);
}

pub fn klog_set_level(level: KlogLevel) {
    CURRENT_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn klog_get_level() -> KlogLevel {
    KlogLevel::from_raw(CURRENT_LEVEL.load(Ordering::Relaxed))
}

#[inline]
pub fn klog_is_enabled(level: KlogLevel) -> bool {
    level as u8 <= CURRENT_LEVEL.load(Ordering::Relaxed)
}

#[doc(hidden)]
pub fn klog_dispatch(level: KlogLevel, args: fmt::Arguments<'_>) {
    if !klog_is_enabled(level) {
        return;
    }
    let raw = BACKEND.load(Ordering::Acquire);
    if raw.is_null() {
        return;
    }
    // SAFETY: only ever stored from a valid `KlogBackend` above.
    let backend: KlogBackend = unsafe { core::mem::transmute(raw) };
    backend(args);
}

#[macro_export]
macro_rules! klog_error {
    ($($arg:tt)*) => {
        $crate::klog::klog_dispatch($crate::klog::KlogLevel::Error, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_warn {
    ($($arg:tt)*) => {
        $crate::klog::klog_dispatch($crate::klog::KlogLevel::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_info {
    ($($arg:tt)*) => {
        $crate::klog::klog_dispatch($crate::klog::KlogLevel::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_debug {
    ($($arg:tt)*) => {
        $crate::klog::klog_dispatch($crate::klog::KlogLevel::Debug, format_args!($($arg)*))
    };
}
