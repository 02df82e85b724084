//! Process runtime: spawn, exec, wait, signals.
//!
//! There is no fork. New processes come from `posix_spawn` (new context
//! + new max-priority task) or from the shell's in-task exec path,
//! which replaces the current context's image without creating a task.
//! Signals are delivered synchronously at waitpoints; nothing preempts
//! executing application code.

use alloc::borrow::ToOwned;
use alloc::boxed::Box;
use alloc::ffi::CString;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use rookos_abi::errno::{self, Errno};
use rookos_abi::fs::OpenFlags;
use rookos_abi::signal::{self, SigAction, sig_bit, sig_valid};
use rookos_abi::syscall::{M_API_VERSION, MIN_API_VERSION};
use rookos_abi::task::PRIORITY_MAX;
use rookos_abi::window::Hwnd;
use rookos_lib::services::task;
use rookos_lib::{StateCell, klog_debug, klog_info};

use rookos_fs::fat;
use rookos_fs::fileio;

use crate::context::{
    Context, Stage, current_ctx, insert_ctx, remove_ctx, set_current_ctx, with_ctx,
};
use crate::elf;
use crate::posix;

// Application entry-point shapes (Thumb-2 soft-float ABI).
type ReqVerFn = unsafe extern "C" fn() -> i32;
type InitFn = unsafe extern "C" fn() -> *mut core::ffi::c_void;
type MainFn = unsafe extern "C" fn(i32, *const *const u8) -> i32;
type FiniFn = unsafe extern "C" fn(*mut core::ffi::c_void);
type SigFn = unsafe extern "C" fn(i32);

/// The running image's `signal` entry, when `main` is live. Only one
/// in-progress signal target is supported.
static ACTIVE_SIGNAL_FN: AtomicUsize = AtomicUsize::new(0);

/// Hook the terminal layer registers so spawned tasks inherit their
/// context's terminal binding.
static TERM_BINDER: StateCell<Option<fn(Hwnd)>> = StateCell::new(None);

pub fn register_term_binder(binder: fn(Hwnd)) {
    TERM_BINDER.with_mut(|b| *b = Some(binder));
}

fn bind_terminal(term: Hwnd) {
    if let Some(binder) = TERM_BINDER.with(|b| *b) {
        binder(term);
    }
}

// ---------------------------------------------------------------------------
// Context preparation
// ---------------------------------------------------------------------------

/// Build a child context: argv copied, stdio and environment inherited,
/// descriptors cloned minus `FD_CLOEXEC`, identity derived from the
/// parent.
pub fn prep_ctx(parent: Option<&Context>, path: &str, argv: &[&str], envp: Option<&[&str]>) -> Box<Context> {
    let mut child = Box::new(Context::new());

    child.argv = argv.iter().map(|a| (*a).to_owned()).collect();
    child.orig_cmd = path.to_owned();

    match envp {
        Some(envp) => {
            for entry in envp {
                if let Some(eq) = entry.find('=') {
                    child.env.push((entry[..eq].to_owned(), entry[eq + 1..].to_owned()));
                }
            }
        }
        None => {
            if let Some(parent) = parent {
                child.env = parent.env.clone();
            }
        }
    }

    if let Some(parent) = parent {
        child.fd_table = parent.fd_table.clone_for_spawn();
        child.parent_task = parent.task;
        child.ppid = parent.pid;
        child.pgid = parent.pgid;
        child.sid = parent.sid;
        child.uid = parent.uid;
        child.euid = parent.euid;
        child.gid = parent.gid;
        child.egid = parent.egid;
        child.term = parent.term;
        child.umask = parent.umask;
    } else {
        child.ppid = 1; // adopted by init
        child.sid = -1;
    }

    child.set_stage(Stage::Found);
    child
}

// ---------------------------------------------------------------------------
// posix_spawn
// ---------------------------------------------------------------------------

/// File actions applied in the child between FD inheritance and first
/// instruction.
pub enum FileAction {
    Open {
        path: String,
        flags: OpenFlags,
        mode: u32,
        fd: i32,
    },
    Close {
        fd: i32,
    },
    Dup2 {
        src: i32,
        dst: i32,
    },
}

pub const SPAWN_RESETIDS: u32 = 1 << 0;
pub const SPAWN_SETPGROUP: u32 = 1 << 1;
pub const SPAWN_SETSID: u32 = 1 << 2;

#[derive(Default)]
pub struct SpawnAttr {
    pub flags: u32,
    pub pgroup: i32,
}

fn apply_file_actions(child: &mut Context, actions: &[FileAction]) -> Result<(), Errno> {
    let volume = fat::volume();
    for action in actions {
        match action {
            FileAction::Open { path, flags, mode, fd } => {
                let vol = volume.ok_or(errno::ENODEV)?;
                let resolved = posix::resolve_in(child, rookos_abi::fs::AT_FDCWD, path, true)?;
                let got = fileio::openat(
                    &mut child.fd_table,
                    vol,
                    &resolved,
                    *flags,
                    *mode,
                    child.umask,
                )?;
                if got != *fd {
                    fileio::dup2(&mut child.fd_table, volume, got, *fd)?;
                    fileio::close(&mut child.fd_table, volume, got)?;
                }
            }
            FileAction::Close { fd } => {
                fileio::close(&mut child.fd_table, volume, *fd)?;
            }
            FileAction::Dup2 { src, dst } => {
                fileio::dup2(&mut child.fd_table, volume, *src, *dst)?;
            }
        }
    }
    Ok(())
}

fn apply_spawn_attr(child: &mut Context, attr: &SpawnAttr) -> Result<(), Errno> {
    if attr.flags & SPAWN_RESETIDS != 0 {
        child.uid = child.euid;
        child.gid = child.egid;
    }
    if attr.flags & SPAWN_SETPGROUP != 0 {
        child.pgid = if attr.pgroup == 0 { child.pid } else { attr.pgroup };
    }
    if attr.flags & SPAWN_SETSID != 0 {
        if child.pid == child.pgid {
            return Err(errno::EPERM);
        }
        child.sid = child.pid;
        child.pgid = child.pid;
        child.ctty = false;
    }
    Ok(())
}

/// Spawn a new process from the ELF at `path`.
pub fn posix_spawn(
    path: &str,
    actions: &[FileAction],
    attr: &SpawnAttr,
    argv: &[&str],
    envp: Option<&[&str]>,
) -> Result<i32, Errno> {
    if argv.is_empty() {
        return Err(errno::EFAULT);
    }
    let volume = fat::volume().ok_or(errno::ENODEV)?;
    let parent = current_ctx();
    let resolved = match parent.as_deref() {
        Some(p) => posix::resolve_in(p, rookos_abi::fs::AT_FDCWD, path, true)?,
        None => path.to_owned(),
    };
    if !matches!(volume.stat(&resolved), Ok(_)) {
        return Err(errno::ENOENT);
    }

    let child = prep_ctx(parent.as_deref(), &resolved, argv, envp);
    let pid = insert_ctx(child);
    // Re-borrow through the table for the remaining setup.
    let load_result = with_ctx(pid, |child| -> Result<(), Errno> {
        match elf::load(volume, &child.orig_cmd) {
            Ok(image) => {
                child.image = Some(image);
                child.set_stage(Stage::Load);
            }
            Err(e) => {
                klog_info!("spawn: load '{}' failed: {}", child.orig_cmd, e);
                child.set_stage(Stage::Invalidated);
                return Err(errno::EFAULT);
            }
        }
        apply_file_actions(child, actions)?;
        apply_spawn_attr(child, attr)
    })
    .unwrap_or(Err(errno::ESRCH));

    if let Err(e) = load_result {
        remove_ctx(pid);
        return Err(e);
    }

    let handle = task::spawn(process_task_entry, pid as usize, PRIORITY_MAX, "app");
    let _ = with_ctx(pid, |child| child.task = handle);
    Ok(pid)
}

fn process_task_entry(arg: usize) {
    let pid = arg as i32;
    let ctx_ptr = with_ctx(pid, |ctx| {
        ctx.task = task::current();
        ctx as *mut Context
    });
    let Some(ctx_ptr) = ctx_ptr else {
        task::exit_current();
    };
    set_current_ctx(ctx_ptr);
    // SAFETY: the context stays in the table until the parent reaps it.
    let ctx = unsafe { &mut *ctx_ptr };
    bind_terminal(ctx.term);
    if ctx.sid <= 0 {
        let _ = setsid();
    }
    deliver_signals(ctx);
    exec_sync(ctx);
    ctx.release_resources();
    ctx.set_stage(Stage::Zombie);
    if ctx.parent_task != 0 {
        task::notify_give(ctx.parent_task);
    } else {
        let ppid = ctx.ppid;
        if let Some(parent_task) = with_ctx(ppid, |p| p.task) {
            task::notify_give(parent_task);
        }
    }
    task::exit_current();
}

// ---------------------------------------------------------------------------
// Execution protocol
// ---------------------------------------------------------------------------

/// Run the loaded image in the calling task: API-version handshake,
/// `_init`, `main(argc, argv)`, `_fini`. The return value of `main`
/// becomes the context's exit code.
pub fn exec_sync(ctx: &mut Context) {
    let Some(image) = ctx.image.as_ref() else {
        ctx.set_ret_code(-1);
        return;
    };
    let (req_ver_fn, init_fn, main_fn, fini_fn, sig_fn) = (
        image.req_ver_fn,
        image.init_fn,
        image.main_fn,
        image.fini_fn,
        image.sig_fn,
    );

    let required = if req_ver_fn != 0 {
        // SAFETY: the loader resolved this address from the image.
        unsafe { core::mem::transmute::<usize, ReqVerFn>(req_ver_fn)() }
    } else {
        MIN_API_VERSION
    };
    if required > M_API_VERSION {
        klog_info!(
            "'{}' requires M-API {} > provided {}",
            ctx.orig_cmd,
            required,
            M_API_VERSION
        );
        ctx.set_ret_code(-2);
        return;
    }
    if required < MIN_API_VERSION {
        klog_info!(
            "'{}' uses M-API {} < minimum {}",
            ctx.orig_cmd,
            required,
            MIN_API_VERSION
        );
        ctx.set_ret_code(-3);
        return;
    }

    let fini_arg = if init_fn != 0 {
        // SAFETY: as above.
        unsafe { core::mem::transmute::<usize, InitFn>(init_fn)() }
    } else {
        core::ptr::null_mut()
    };

    // Keep NUL-terminated argv storage alive across main.
    let c_args: Vec<CString> = ctx
        .argv
        .iter()
        .map(|a| CString::new(a.as_str()).unwrap_or_default())
        .collect();
    let mut arg_ptrs: Vec<*const u8> = c_args.iter().map(|c| c.as_ptr() as *const u8).collect();
    arg_ptrs.push(core::ptr::null());

    ACTIVE_SIGNAL_FN.store(sig_fn, Ordering::Release);
    let code = if main_fn != 0 {
        // SAFETY: as above.
        unsafe {
            core::mem::transmute::<usize, MainFn>(main_fn)(
                c_args.len() as i32,
                arg_ptrs.as_ptr(),
            )
        }
    } else {
        -3
    };
    ACTIVE_SIGNAL_FN.store(0, Ordering::Release);

    if fini_fn != 0 {
        // SAFETY: as above.
        unsafe { core::mem::transmute::<usize, FiniFn>(fini_fn)(fini_arg) };
    }
    ctx.set_ret_code(code);
    ctx.set_stage(Stage::Executed);
}

/// Early termination from the exit primitive: `_fini` runs, the parent
/// is notified, the task dies.
pub fn exit(status: i32) -> ! {
    if let Some(ctx) = current_ctx() {
        if let Some(image) = ctx.image.as_ref() {
            if image.fini_fn != 0 {
                // SAFETY: loader-resolved entry; `_init`'s context was
                // already consumed on the normal path, pass null here.
                unsafe {
                    core::mem::transmute::<usize, FiniFn>(image.fini_fn)(core::ptr::null_mut())
                };
            }
        }
        ctx.set_ret_code(status);
        ctx.release_resources();
        ctx.set_stage(Stage::Zombie);
        if ctx.parent_task != 0 {
            task::notify_give(ctx.parent_task);
        } else {
            // Detached: nobody will reap it, clean up here.
            let pid = ctx.pid;
            set_current_ctx(core::ptr::null_mut());
            remove_ctx(pid);
        }
    }
    task::exit_current()
}

/// In-place exec: replace the current context's image and run it in
/// the same task. The stage goes `Load -> Executed` with no new task.
pub fn execve(path: &str, argv: &[&str], envp: Option<&[&str]>) -> Result<i32, Errno> {
    let volume = fat::volume().ok_or(errno::ENODEV)?;
    let ctx = current_ctx().ok_or(errno::ESRCH)?;
    let resolved = posix::resolve_in(ctx, rookos_abi::fs::AT_FDCWD, path, true)?;

    // Command history, kept per shell in $TEMP.
    if let Some(temp) = ctx.getenv("TEMP").map(|t| t.to_owned()) {
        let history = {
            let mut h = temp;
            h.push_str("/.cmd_history");
            h
        };
        let _ = append_history(volume, &history, &resolved);
    }

    ctx.argv = argv.iter().map(|a| (*a).to_string()).collect();
    ctx.orig_cmd = resolved.clone();
    if let Some(envp) = envp {
        ctx.env.clear();
        for entry in envp {
            if let Some(eq) = entry.find('=') {
                ctx.env.push((entry[..eq].to_owned(), entry[eq + 1..].to_owned()));
            }
        }
    }
    ctx.fd_table.close_cloexec(Some(volume));

    match elf::load(volume, &resolved) {
        Ok(image) => {
            ctx.image = Some(image);
            ctx.set_stage(Stage::Load);
        }
        Err(e) => {
            klog_info!("exec: load '{}' failed: {}", resolved, e);
            ctx.set_stage(Stage::Invalidated);
            return Err(errno::EFAULT);
        }
    }

    deliver_signals(ctx);
    exec_sync(ctx);
    deliver_signals(ctx);
    Ok(ctx.ret_code())
}

fn append_history(
    volume: &dyn fat::FatVolume,
    history_path: &str,
    line: &str,
) -> Result<(), Errno> {
    use rookos_fs::fat::open_mode;
    let file = volume
        .open(history_path, open_mode::FA_OPEN_ALWAYS | open_mode::FA_WRITE)
        .map_err(fat::fat_to_errno)?;
    let end = volume.size(file).map_err(fat::fat_to_errno)?;
    let mut data: Vec<u8> = line.as_bytes().to_vec();
    data.push(b'\n');
    let _ = volume.write(file, end, &data);
    volume.close(file).map_err(fat::fat_to_errno)
}

// ---------------------------------------------------------------------------
// wait / kill / signals
// ---------------------------------------------------------------------------

pub const WNOHANG: i32 = 1;

enum WaitMode {
    Pid(i32),
    OwnPgid,
    Any,
    Pgid(#[allow(dead_code)] i32),
}

fn wait_mode(pid: i32, own_pgid: i32) -> (WaitMode, i32) {
    if pid > 0 {
        (WaitMode::Pid(pid), 0)
    } else if pid == 0 {
        (WaitMode::OwnPgid, own_pgid)
    } else if pid == -1 {
        (WaitMode::Any, 0)
    } else {
        (WaitMode::Pgid(-pid), -pid)
    }
}

fn wait_matches(mode: &WaitMode, target_pgid: i32, child: &Context) -> bool {
    match mode {
        WaitMode::Pid(p) => child.pid == *p,
        WaitMode::OwnPgid | WaitMode::Pgid(_) => child.pgid == target_pgid,
        WaitMode::Any => true,
    }
}

/// Wait for a child transition to zombie and reap it. Returns the
/// child's pid and its encoded status (exit code in the high byte).
pub fn waitpid(pid: i32, options: i32) -> Result<(i32, i32), Errno> {
    let me = current_ctx().ok_or(errno::ESRCH)?;
    deliver_signals(me);
    let my_pid = me.pid;
    let (mode, target_pgid) = wait_mode(pid, me.pgid);

    loop {
        let mut found_zombie: Option<(i32, i32)> = None;
        let mut has_child = false;
        crate::context::for_each_ctx(|c| {
            if c.ppid != my_pid || !wait_matches(&mode, target_pgid, c) {
                return;
            }
            has_child = true;
            if found_zombie.is_none() && c.stage() == Stage::Zombie {
                found_zombie = Some((c.pid, (c.ret_code() & 0xFF) << 8));
            }
        });

        if let Some((child_pid, status)) = found_zombie {
            remove_ctx(child_pid);
            return Ok((child_pid, status));
        }
        if !has_child {
            return Err(errno::ECHILD);
        }
        if options & WNOHANG != 0 {
            return Ok((0, 0));
        }

        deliver_signals(me);
        task::notify_take(true);
        deliver_signals(me);
    }
}

/// Send `sig` to the processes selected by `pid` (the four POSIX
/// addressing modes). Sets the pending bit and pokes the task.
pub fn kill(pid: i32, sig: i32) -> Result<(), Errno> {
    if !sig_valid(sig) {
        return Err(errno::EINVAL);
    }
    let me = current_ctx().ok_or(errno::ESRCH)?;
    let (mode, target_pgid) = wait_mode(pid, me.pgid);

    let mut delivered = false;
    crate::context::for_each_ctx(|c| {
        let matches = match &mode {
            WaitMode::Pid(p) => c.pid == *p,
            WaitMode::OwnPgid | WaitMode::Pgid(_) => c.pgid == target_pgid,
            WaitMode::Any => true,
        };
        if !matches || (delivered && matches!(mode, WaitMode::Pid(_))) {
            return;
        }
        c.sig_pending.fetch_or(sig_bit(sig), Ordering::AcqRel);
        if sig == signal::SIGTERM {
            c.set_stage(Stage::Sigterm);
        }
        if c.task != 0 {
            task::notify_give(c.task);
        }
        delivered = true;
    });

    if delivered { Ok(()) } else { Err(errno::ESRCH) }
}

pub fn raise(sig: i32) -> Result<(), Errno> {
    let pid = current_ctx().map(|c| c.pid).ok_or(errno::ESRCH)?;
    kill(pid, sig)
}

/// Install a handler. `SIGKILL` can never be caught.
pub fn signal(sig: i32, action: SigAction) -> Result<SigAction, Errno> {
    if !sig_valid(sig) || sig == signal::SIGKILL {
        return Err(errno::EINVAL);
    }
    let ctx = current_ctx().ok_or(errno::ESRCH)?;
    let old = ctx.sig_handlers[sig as usize];
    ctx.sig_handlers[sig as usize] = action;
    Ok(old)
}

pub fn sigprocmask(how: i32, set: Option<u32>, old: Option<&mut u32>) -> Result<(), Errno> {
    let ctx = current_ctx().ok_or(errno::ESRCH)?;
    if let Some(old) = old {
        *old = ctx.sig_blocked;
    }
    let Some(set) = set else {
        return Ok(());
    };
    match how {
        signal::SIG_BLOCK => ctx.sig_blocked |= set,
        signal::SIG_UNBLOCK => ctx.sig_blocked &= !set,
        signal::SIG_SETMASK => ctx.sig_blocked = set,
        _ => return Err(errno::EINVAL),
    }
    // SIGKILL is unblockable.
    ctx.sig_blocked &= !sig_bit(signal::SIGKILL);
    Ok(())
}

/// Synchronous delivery at a waitpoint: run handlers for each pending,
/// non-blocked signal. The default action terminates the process with
/// exit code = signal number.
pub fn deliver_signals(ctx: &mut Context) {
    let pending = ctx.sig_pending.load(Ordering::Acquire) & !ctx.sig_blocked;
    if pending == 0 {
        return;
    }

    for sig in 1..signal::MAX_SIG {
        if pending & sig_bit(sig) == 0 {
            continue;
        }
        ctx.sig_pending.fetch_and(!sig_bit(sig), Ordering::AcqRel);

        let action = if sig == signal::SIGKILL {
            SigAction::Default
        } else {
            ctx.sig_handlers[sig as usize]
        };
        match action {
            SigAction::Ignore => continue,
            SigAction::Handler(h) => h(sig),
            SigAction::Default => {
                klog_debug!("pid {}: signal {} default action", ctx.pid, sig);
                ctx.set_ret_code(sig);
                ctx.release_resources();
                ctx.set_stage(Stage::Zombie);
                if ctx.parent_task != 0 {
                    task::notify_give(ctx.parent_task);
                }
                task::exit_current();
            }
        }
    }
}

/// Deliver to the running image's `signal` entry, when one is active.
pub fn deliver_to_active_image(sig: i32) -> bool {
    let addr = ACTIVE_SIGNAL_FN.load(Ordering::Acquire);
    if addr == 0 {
        return false;
    }
    // SAFETY: set only while `main` is running, from loader-resolved
    // addresses.
    unsafe { core::mem::transmute::<usize, SigFn>(addr)(sig) };
    true
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

pub fn getpid() -> i32 {
    current_ctx().map(|c| c.pid).unwrap_or(0)
}

pub fn getppid() -> i32 {
    current_ctx().map(|c| c.ppid).unwrap_or(0)
}

pub fn getpgid(pid: i32) -> Result<i32, Errno> {
    if pid == 0 {
        return current_ctx().map(|c| c.pgid).ok_or(errno::ESRCH);
    }
    with_ctx(pid, |c| c.pgid).ok_or(errno::ESRCH)
}

pub fn setpgid(pid: i32, pgid: i32) -> Result<(), Errno> {
    if pgid < 0 {
        return Err(errno::EINVAL);
    }
    let me = current_ctx().ok_or(errno::ESRCH)?;
    let target = if pid == 0 { me.pid } else { pid };
    let value = if pgid == 0 { target } else { pgid };
    with_ctx(target, |c| c.pgid = value).ok_or(errno::ESRCH)
}

pub fn getsid(pid: i32) -> Result<i32, Errno> {
    if pid == 0 {
        return current_ctx().map(|c| c.sid).ok_or(errno::ESRCH);
    }
    with_ctx(pid, |c| c.sid).ok_or(errno::ESRCH)
}

/// Open a new session with the caller as leader. Fails for a process
/// that is already a group leader.
pub fn setsid() -> Result<i32, Errno> {
    let ctx = current_ctx().ok_or(errno::ESRCH)?;
    if ctx.pid == ctx.pgid {
        return Err(errno::EPERM);
    }
    ctx.sid = ctx.pid;
    ctx.pgid = ctx.pid;
    ctx.ctty = false;
    Ok(ctx.sid)
}
