//! Registered kernel services.
//!
//! The cooperative scheduler, the monotonic clock and the board glue
//! (reboot, LED) are external collaborators. They are reached through
//! function-pointer structs registered once during boot, mirroring how
//! the scanline driver and keyboard sampler plug in elsewhere. Before
//! registration every entry degrades to a harmless default so pure
//! logic can run (and be tested) without hardware.

use crate::state_cell::StateCell;

/// Task entry point: receives the opaque argument passed to `spawn`.
pub type TaskEntry = fn(usize);

#[derive(Clone, Copy)]
pub struct TaskServices {
    pub spawn: fn(TaskEntry, usize, u8, &'static str) -> usize,
    pub exit_current: fn() -> !,
    pub yield_now: fn(),
    pub sleep_ms: fn(u32),
    /// Scheduler suspension pair backing `SchedMutex`.
    pub suspend_all: fn(),
    pub resume_all: fn(),
    /// Direct-to-task notification counter (give/take), the blocking
    /// primitive behind wait, semaphores and exit notification.
    pub notify_give: fn(usize),
    pub notify_take: fn(bool) -> u32,
    pub current: fn() -> usize,
    pub tls_get: fn(usize) -> *mut (),
    pub tls_set: fn(usize, *mut ()),
}

fn default_spawn(_entry: TaskEntry, _arg: usize, _priority: u8, _name: &'static str) -> usize {
    0
}

fn default_exit() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

fn default_unit() {}
fn default_sleep(_ms: u32) {}
fn default_give(_task: usize) {}
fn default_take(_block: bool) -> u32 {
    0
}
fn default_current() -> usize {
    0
}

// The default TLS store backs single-task operation (early boot, host
// tests): one slot set, shared by whatever calls in.
struct TlsSlots([*mut (); 4]);

// SAFETY: the fallback store only exists while a single task runs.
unsafe impl Send for TlsSlots {}

static FALLBACK_TLS: StateCell<TlsSlots> = StateCell::new(TlsSlots([core::ptr::null_mut(); 4]));

fn default_tls_get(slot: usize) -> *mut () {
    FALLBACK_TLS.with(|t| {
        if slot < t.0.len() {
            t.0[slot]
        } else {
            core::ptr::null_mut()
        }
    })
}

fn default_tls_set(slot: usize, ptr: *mut ()) {
    FALLBACK_TLS.with_mut(|t| {
        if slot < t.0.len() {
            t.0[slot] = ptr;
        }
    });
}

const DEFAULT_TASK_SERVICES: TaskServices = TaskServices {
    spawn: default_spawn,
    exit_current: default_exit,
    yield_now: default_unit,
    sleep_ms: default_sleep,
    suspend_all: default_unit,
    resume_all: default_unit,
    notify_give: default_give,
    notify_take: default_take,
    current: default_current,
    tls_get: default_tls_get,
    tls_set: default_tls_set,
};

static TASK_SERVICES: StateCell<TaskServices> = StateCell::new(DEFAULT_TASK_SERVICES);

pub fn register_task_services(services: TaskServices) {
    TASK_SERVICES.with_mut(|t| *t = services);
}

pub mod task {
    use super::{TASK_SERVICES, TaskEntry};

    #[inline]
    pub fn spawn(entry: TaskEntry, arg: usize, priority: u8, name: &'static str) -> usize {
        TASK_SERVICES.with(|t| (t.spawn)(entry, arg, priority, name))
    }

    #[inline]
    pub fn exit_current() -> ! {
        TASK_SERVICES.with(|t| t.exit_current)()
    }

    #[inline]
    pub fn yield_now() {
        TASK_SERVICES.with(|t| (t.yield_now)())
    }

    #[inline]
    pub fn sleep_ms(ms: u32) {
        TASK_SERVICES.with(|t| (t.sleep_ms)(ms))
    }

    #[inline]
    pub fn suspend_all() {
        TASK_SERVICES.with(|t| (t.suspend_all)())
    }

    #[inline]
    pub fn resume_all() {
        TASK_SERVICES.with(|t| (t.resume_all)())
    }

    #[inline]
    pub fn notify_give(task: usize) {
        TASK_SERVICES.with(|t| (t.notify_give)(task))
    }

    #[inline]
    pub fn notify_take(block: bool) -> u32 {
        TASK_SERVICES.with(|t| (t.notify_take)(block))
    }

    #[inline]
    pub fn current() -> usize {
        TASK_SERVICES.with(|t| (t.current)())
    }

    #[inline]
    pub fn tls_get(slot: usize) -> *mut () {
        TASK_SERVICES.with(|t| (t.tls_get)(slot))
    }

    #[inline]
    pub fn tls_set(slot: usize, ptr: *mut ()) {
        TASK_SERVICES.with(|t| (t.tls_set)(slot, ptr))
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
pub struct ClockServices {
    pub uptime_ms: fn() -> u64,
}

fn default_uptime() -> u64 {
    0
}

static CLOCK_SERVICES: StateCell<ClockServices> = StateCell::new(ClockServices {
    uptime_ms: default_uptime,
});

pub fn register_clock(services: ClockServices) {
    CLOCK_SERVICES.with_mut(|c| *c = services);
}

#[inline]
pub fn clock_ms() -> u64 {
    CLOCK_SERVICES.with(|c| (c.uptime_ms)())
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
pub struct BoardServices {
    pub reboot: fn() -> !,
    pub led: fn(bool),
}

fn default_reboot() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

fn default_led(_on: bool) {}

static BOARD_SERVICES: StateCell<BoardServices> = StateCell::new(BoardServices {
    reboot: default_reboot,
    led: default_led,
});

pub fn register_board(services: BoardServices) {
    BOARD_SERVICES.with_mut(|b| *b = services);
}

#[inline]
pub fn board_reboot() -> ! {
    BOARD_SERVICES.with(|b| b.reboot)()
}

#[inline]
pub fn board_led(on: bool) {
    BOARD_SERVICES.with(|b| (b.led)(on))
}
