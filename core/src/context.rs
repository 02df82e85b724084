//! Process contexts and the pid table.
//!
//! A context is the unit of execution: argv, environment, descriptor
//! tables, tracked allocations, signal state, identity, loader state
//! and lifecycle stage. Contexts live in the pid table as raw boxes;
//! the owning task mutates its context freely, cross-task traffic
//! (signals, stage, exit code) goes through atomics, and table shape
//! changes take the table lock.

use alloc::borrow::ToOwned;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI32, AtomicU8, AtomicU32, Ordering};

use rookos_abi::fs::DEFAULT_UMASK;
use rookos_abi::signal::{MAX_SIG, SigAction};
use rookos_abi::task::TaskHandle;
use rookos_abi::window::{HWND_NULL, Hwnd};
use rookos_lib::SchedMutex;
use rookos_lib::services::task;
use rookos_mm::CtxAllocations;

use rookos_fs::{DirTable, FdTable};

use crate::elf::LoadedImage;

/// Lifecycle stage of a context.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    Initial = 0,
    /// The shell (or a chaining app) prepared argv for the next run.
    Prepared = 1,
    Found = 2,
    Valid = 3,
    Load = 4,
    Executed = 5,
    Invalidated = 6,
    /// Termination requested but not yet acted on.
    Sigterm = 7,
    Zombie = 8,
}

impl Stage {
    fn from_raw(raw: u8) -> Stage {
        match raw {
            1 => Stage::Prepared,
            2 => Stage::Found,
            3 => Stage::Valid,
            4 => Stage::Load,
            5 => Stage::Executed,
            6 => Stage::Invalidated,
            7 => Stage::Sigterm,
            8 => Stage::Zombie,
            _ => Stage::Initial,
        }
    }
}

pub struct Context {
    pub argv: Vec<String>,
    pub orig_cmd: String,
    /// Ordered key→value environment; keys unique and case-sensitive.
    pub env: Vec<(String, String)>,

    pub fd_table: FdTable,
    pub dir_table: DirTable,
    pub allocs: CtxAllocations,
    pub umask: u32,

    // Signal state. `sig_pending` is written by `kill` from other
    // tasks, hence atomic.
    pub sig_pending: AtomicU32,
    pub sig_blocked: u32,
    pub sig_handlers: [SigAction; MAX_SIG as usize],

    // Identity.
    pub pid: i32,
    pub ppid: i32,
    pub pgid: i32,
    pub sid: i32,
    pub uid: i32,
    pub euid: i32,
    pub gid: i32,
    pub egid: i32,
    pub ctty: bool,

    /// Loader state for the currently executing image.
    pub image: Option<LoadedImage>,

    pub task: TaskHandle,
    pub parent_task: TaskHandle,
    pub detached: bool,

    stage: AtomicU8,
    ret_code: AtomicI32,

    /// Pipeline neighbors (pids; 0 = none).
    pub prev_pid: i32,
    pub next_pid: i32,

    /// Owning terminal's window handle.
    pub term: Hwnd,
}

// SAFETY: contexts are owned by their task; the fields touched across
// tasks are atomics, and table membership is guarded by the pid lock.
unsafe impl Send for Context {}

impl Context {
    pub fn new() -> Self {
        Self {
            argv: Vec::new(),
            orig_cmd: String::new(),
            env: Vec::new(),
            fd_table: FdTable::with_std(),
            dir_table: DirTable::new(),
            allocs: CtxAllocations::new(),
            umask: DEFAULT_UMASK,
            sig_pending: AtomicU32::new(0),
            sig_blocked: 0,
            sig_handlers: [SigAction::Default; MAX_SIG as usize],
            pid: 0,
            ppid: 0,
            pgid: 0,
            sid: 0,
            uid: 0,
            euid: 0,
            gid: 0,
            egid: 0,
            ctty: false,
            image: None,
            task: 0,
            parent_task: 0,
            detached: false,
            stage: AtomicU8::new(Stage::Initial as u8),
            ret_code: AtomicI32::new(0),
            prev_pid: 0,
            next_pid: 0,
            term: HWND_NULL,
        }
    }

    #[inline]
    pub fn stage(&self) -> Stage {
        Stage::from_raw(self.stage.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_stage(&self, stage: Stage) {
        self.stage.store(stage as u8, Ordering::Release);
    }

    #[inline]
    pub fn ret_code(&self) -> i32 {
        self.ret_code.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_ret_code(&self, code: i32) {
        self.ret_code.store(code, Ordering::Release);
    }

    pub fn getenv(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn setenv(&mut self, key: &str, value: &str) {
        match self.env.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_owned(),
            None => self.env.push((key.to_owned(), value.to_owned())),
        }
    }

    pub fn cwd(&self) -> &str {
        match self.getenv("CD") {
            Some(cd) if !cd.is_empty() => cd,
            _ => "/",
        }
    }

    /// Release everything the context holds ahead of the zombie parking
    /// spot: descriptors, directory streams, tracked allocations, the
    /// loaded image.
    pub fn release_resources(&mut self) {
        let volume = rookos_fs::fat::volume();
        self.fd_table.close_all(volume);
        self.allocs.free_all();
        self.image = None;
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Pid table
// ---------------------------------------------------------------------------

struct PidTable {
    /// Index = pid; slot 0 unused. Entries are `Box::into_raw` boxes.
    slots: Vec<*mut Context>,
}

// SAFETY: raw pointers guarded by the SchedMutex around table shape;
// per-context access rules are documented on `Context`.
unsafe impl Send for PidTable {}

static PIDS: SchedMutex<PidTable> = SchedMutex::new(PidTable { slots: Vec::new() });

/// Insert a context, assigning the first free pid (append when dense).
/// Returns the assigned pid; the table owns the box until `remove_ctx`.
pub fn insert_ctx(mut ctx: Box<Context>) -> i32 {
    PIDS.with(|t| {
        if t.slots.is_empty() {
            t.slots.push(core::ptr::null_mut()); // pid 0 reserved
        }
        let hole = t
            .slots
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, s)| s.is_null())
            .map(|(i, _)| i);
        match hole {
            Some(i) => {
                ctx.pid = i as i32;
                t.slots[i] = Box::into_raw(ctx);
                i as i32
            }
            None => {
                let pid = t.slots.len() as i32;
                ctx.pid = pid;
                t.slots.push(Box::into_raw(ctx));
                pid
            }
        }
    })
}

/// Run `f` with the context for `pid`, if present.
pub fn with_ctx<R>(pid: i32, f: impl FnOnce(&mut Context) -> R) -> Option<R> {
    let ptr = PIDS.with(|t| {
        usize::try_from(pid)
            .ok()
            .and_then(|i| t.slots.get(i).copied())
            .filter(|p| !p.is_null())
    })?;
    // SAFETY: the pointer stays valid until remove_ctx; removal only
    // happens from the reaping parent or the owner itself.
    Some(f(unsafe { &mut *ptr }))
}

/// Iterate the live contexts (table lock held for the walk).
pub fn for_each_ctx(mut f: impl FnMut(&mut Context)) {
    let ptrs: Vec<*mut Context> = PIDS.with(|t| {
        t.slots
            .iter()
            .copied()
            .filter(|p| !p.is_null())
            .collect()
    });
    for ptr in ptrs {
        // SAFETY: see with_ctx.
        f(unsafe { &mut *ptr });
    }
}

/// Remove and drop the context for `pid`. Clears its pid slot, so
/// `pids[pid]` is absent afterwards.
pub fn remove_ctx(pid: i32) -> bool {
    let ptr = PIDS.with(|t| {
        let idx = usize::try_from(pid).ok()?;
        let slot = t.slots.get_mut(idx)?;
        if slot.is_null() {
            return None;
        }
        Some(core::mem::replace(slot, core::ptr::null_mut()))
    });
    match ptr {
        Some(ptr) => {
            // SAFETY: the slot was emptied under the lock; we hold the
            // only remaining pointer.
            let mut ctx = unsafe { Box::from_raw(ptr) };
            ctx.release_resources();
            true
        }
        None => false,
    }
}

/// Re-install the shell's context in its pid slot after an exec cycle
/// zeroed it (the legacy "repair" step in the command loop).
pub fn restore_ctx_slot(pid: i32, ctx: *mut Context) {
    PIDS.with(|t| {
        let idx = pid as usize;
        while t.slots.len() <= idx {
            t.slots.push(core::ptr::null_mut());
        }
        t.slots[idx] = ctx;
    });
}

/// Number of live contexts (diagnostics).
pub fn ctx_count() -> usize {
    PIDS.with(|t| t.slots.iter().filter(|p| !p.is_null()).count())
}

/// Test hook: clear the whole table, dropping every context.
pub fn reset_for_tests() {
    let ptrs: Vec<*mut Context> = PIDS.with(|t| {
        let out = t.slots.iter().copied().filter(|p| !p.is_null()).collect();
        t.slots.clear();
        out
    });
    for ptr in ptrs {
        // SAFETY: slots were cleared under the lock.
        drop(unsafe { Box::from_raw(ptr) });
    }
}

// ---------------------------------------------------------------------------
// Current context via task-local storage
// ---------------------------------------------------------------------------

use rookos_abi::task::TLS_SLOT_CTX;

pub fn set_current_ctx(ctx: *mut Context) {
    task::tls_set(TLS_SLOT_CTX, ctx as *mut ());
}

/// The calling task's context, from TLS slot 0.
#[allow(clippy::mut_from_ref)]
pub fn current_ctx() -> Option<&'static mut Context> {
    let ptr = task::tls_get(TLS_SLOT_CTX) as *mut Context;
    if ptr.is_null() {
        None
    } else {
        // SAFETY: the pointer was installed by the task itself and
        // stays valid for the task's lifetime.
        Some(unsafe { &mut *ptr })
    }
}
