//! Task-layer constants shared with the (external) cooperative scheduler.

/// Opaque handle to a scheduler task. The scheduler mints these; the OS
/// core only stores and compares them.
pub type TaskHandle = usize;

pub const TASK_NULL: TaskHandle = 0;

/// Applications and shells run at the top user priority; kernel service
/// tasks sit below so a spinning app cannot starve input or video.
pub const PRIORITY_MAX: u8 = 7;
pub const PRIORITY_COMPOSITOR: u8 = 6;
pub const PRIORITY_INPUT: u8 = 6;
pub const PRIORITY_IDLE: u8 = 0;

/// Default stack for spawned application tasks, in words.
pub const APP_TASK_STACK_WORDS: usize = 1024;

/// Thread-local storage slots. Slot 0 holds the current process context,
/// slot 1 the task's terminal; both are consulted by the console API
/// routing.
pub const TLS_SLOT_CTX: usize = 0;
pub const TLS_SLOT_TERMINAL: usize = 1;
pub const TLS_SLOT_COUNT: usize = 2;
