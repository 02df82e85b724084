//! Signal numbers and per-process signal dispositions.

pub const SIGHUP: i32 = 1;
pub const SIGINT: i32 = 2;
pub const SIGQUIT: i32 = 3;
pub const SIGILL: i32 = 4;
pub const SIGABRT: i32 = 6;
pub const SIGKILL: i32 = 9;
pub const SIGUSR1: i32 = 10;
pub const SIGSEGV: i32 = 11;
pub const SIGUSR2: i32 = 12;
pub const SIGPIPE: i32 = 13;
pub const SIGALRM: i32 = 14;
pub const SIGTERM: i32 = 15;
pub const SIGCHLD: i32 = 17;
pub const SIGCONT: i32 = 18;
pub const SIGSTOP: i32 = 19;

/// Signals are tracked in a 32-bit pending/blocked mask.
pub const MAX_SIG: i32 = 32;

/// `sigprocmask(2)` operations.
pub const SIG_BLOCK: i32 = 0;
pub const SIG_UNBLOCK: i32 = 1;
pub const SIG_SETMASK: i32 = 2;

/// Disposition of one signal for one process.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[allow(unpredictable_function_pointer_comparisons)]
pub enum SigAction {
    /// Default action: terminate with exit code = signal number.
    #[default]
    Default,
    Ignore,
    /// Application handler loaded from the process image.
    Handler(fn(i32)),
}

#[inline]
pub const fn sig_bit(sig: i32) -> u32 {
    1u32 << sig
}

#[inline]
pub const fn sig_valid(sig: i32) -> bool {
    sig > 0 && sig < MAX_SIG
}
