//! System-call dispatch table.
//!
//! Loaded applications reach the OS through a function-pointer table
//! that the linker pins at the end of the RAM-visible flash region;
//! each application shim indexes it by a compile-time slot constant
//! from `rookos_abi::syscall`. Slots are append-only: a published slot
//! number never changes meaning, removal is a breaking change.
//!
//! Subsystems own their slots: this module installs the process and
//! file services at boot, the window/terminal layer installs its own
//! when it comes up.

use alloc::vec::Vec;
use core::ffi::{c_char, c_int};

use rookos_abi::fs::UserStat;
use rookos_abi::signal::SigAction;
use rookos_abi::syscall::{self as slots, SYS_TABLE_LEN};
use rookos_lib::{StateCell, klog_warn};

#[repr(C, align(16))]
struct SysTable([usize; SYS_TABLE_LEN]);

// The linker script pins this section at the end of the RAM-visible
// flash region; the symbol name is part of the board contract.
#[unsafe(no_mangle)]
#[unsafe(link_section = ".sys_table")]
static SYS_TABLE: StateCell<SysTable> = StateCell::new(SysTable([0; SYS_TABLE_LEN]));

/// Install a service. Re-registering a live slot with a different
/// address is almost certainly a slot-numbering bug, so it is refused.
pub fn sys_table_register(slot: usize, addr: usize) {
    SYS_TABLE.with_mut(|t| {
        if slot >= SYS_TABLE_LEN {
            klog_warn!("sys_table: slot {} out of range", slot);
            return;
        }
        if t.0[slot] != 0 && t.0[slot] != addr {
            klog_warn!("sys_table: slot {} already bound", slot);
            return;
        }
        t.0[slot] = addr;
    });
}

pub fn sys_table_get(slot: usize) -> usize {
    SYS_TABLE.with(|t| if slot < SYS_TABLE_LEN { t.0[slot] } else { 0 })
}

/// Base address handed to the loader/linker glue.
pub fn sys_table_ptr() -> *const usize {
    SYS_TABLE.with(|t| t.0.as_ptr())
}

// ---------------------------------------------------------------------------
// C-ABI shims for the core-owned slots
// ---------------------------------------------------------------------------

unsafe fn cstr<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: callers pass NUL-terminated strings per the ABI.
    unsafe { core::ffi::CStr::from_ptr(ptr) }.to_str().ok()
}

const MAX_ARG_VEC: usize = 32;

/// Collect a NUL-terminated pointer array (argv/envp shape). A null
/// array reads as empty; an unterminated or over-long one as `None`.
unsafe fn cstr_vec<'a>(array: *const *const c_char) -> Option<Vec<&'a str>> {
    let mut out = Vec::new();
    if array.is_null() {
        return Some(out);
    }
    for i in 0..=MAX_ARG_VEC {
        // SAFETY: the array is NUL-terminated per the ABI; the walk is
        // bounded regardless.
        let entry = unsafe { *array.add(i) };
        if entry.is_null() {
            return Some(out);
        }
        out.push(unsafe { cstr(entry) }?);
    }
    None
}

fn errno_ret(e: rookos_abi::errno::Errno) -> c_int {
    -e
}

extern "C" fn sys_malloc(size: usize) -> *mut u8 {
    match crate::context::current_ctx() {
        Some(ctx) => ctx.allocs.alloc(size),
        None => core::ptr::null_mut(),
    }
}

extern "C" fn sys_calloc(count: usize, size: usize) -> *mut u8 {
    match crate::context::current_ctx() {
        Some(ctx) => ctx.allocs.calloc(count, size),
        None => core::ptr::null_mut(),
    }
}

extern "C" fn sys_realloc(ptr: *mut u8, size: usize) -> *mut u8 {
    match crate::context::current_ctx() {
        Some(ctx) => ctx.allocs.realloc(ptr, size),
        None => core::ptr::null_mut(),
    }
}

extern "C" fn sys_free(ptr: *mut u8) {
    if let Some(ctx) = crate::context::current_ctx() {
        ctx.allocs.free(ptr);
    }
}

extern "C" fn sys_openat(dirfd: c_int, path: *const c_char, flags: u32, mode: u32) -> c_int {
    let Some(path) = (unsafe { cstr(path) }) else {
        return errno_ret(rookos_abi::errno::EFAULT);
    };
    let flags = rookos_abi::fs::OpenFlags::from_bits_truncate(flags);
    match crate::posix::openat(dirfd, path, flags, mode) {
        Ok(fd) => fd,
        Err(e) => errno_ret(e),
    }
}

extern "C" fn sys_close(fd: c_int) -> c_int {
    match crate::posix::close(fd) {
        Ok(()) => 0,
        Err(e) => errno_ret(e),
    }
}

extern "C" fn sys_read(fd: c_int, buf: *mut u8, len: usize) -> isize {
    if buf.is_null() {
        return errno_ret(rookos_abi::errno::EFAULT) as isize;
    }
    // SAFETY: the application owns buf for len bytes per the ABI.
    let slice = unsafe { core::slice::from_raw_parts_mut(buf, len) };
    match crate::posix::read(fd, slice) {
        Ok(n) => n as isize,
        Err(e) => errno_ret(e) as isize,
    }
}

extern "C" fn sys_write(fd: c_int, buf: *const u8, len: usize) -> isize {
    if buf.is_null() {
        return errno_ret(rookos_abi::errno::EFAULT) as isize;
    }
    // SAFETY: as in sys_read.
    let slice = unsafe { core::slice::from_raw_parts(buf, len) };
    match crate::posix::write(fd, slice) {
        Ok(n) => n as isize,
        Err(e) => errno_ret(e) as isize,
    }
}

extern "C" fn sys_lseek(fd: c_int, offset: i64, whence: c_int) -> i64 {
    match crate::posix::lseek(fd, offset, whence) {
        Ok(pos) => pos,
        Err(e) => errno_ret(e) as i64,
    }
}

extern "C" fn sys_dup(fd: c_int) -> c_int {
    match crate::posix::dup(fd) {
        Ok(fd) => fd,
        Err(e) => errno_ret(e),
    }
}

extern "C" fn sys_dup2(oldfd: c_int, newfd: c_int) -> c_int {
    match crate::posix::dup2(oldfd, newfd) {
        Ok(fd) => fd,
        Err(e) => errno_ret(e),
    }
}

extern "C" fn sys_getpid() -> c_int {
    crate::process::getpid()
}

extern "C" fn sys_getppid() -> c_int {
    crate::process::getppid()
}

extern "C" fn sys_waitpid(pid: c_int, status: *mut c_int, options: c_int) -> c_int {
    match crate::process::waitpid(pid, options) {
        Ok((child, st)) => {
            if !status.is_null() {
                // SAFETY: caller-owned out pointer per the ABI.
                unsafe { *status = st };
            }
            child
        }
        Err(e) => errno_ret(e),
    }
}

extern "C" fn sys_kill(pid: c_int, sig: c_int) -> c_int {
    match crate::process::kill(pid, sig) {
        Ok(()) => 0,
        Err(e) => errno_ret(e),
    }
}

extern "C" fn sys_exit(status: c_int) -> ! {
    crate::process::exit(status)
}

extern "C" fn sys_getenv(key: *const c_char, out: *mut u8, cap: usize) -> c_int {
    let Some(key) = (unsafe { cstr(key) }) else {
        return errno_ret(rookos_abi::errno::EFAULT);
    };
    let Some(value) = crate::posix::getenv(key) else {
        return errno_ret(rookos_abi::errno::ENOENT);
    };
    if out.is_null() || cap == 0 {
        return value.len() as c_int;
    }
    let n = value.len().min(cap - 1);
    // SAFETY: caller-owned out buffer of cap bytes per the ABI.
    unsafe {
        core::ptr::copy_nonoverlapping(value.as_ptr(), out, n);
        *out.add(n) = 0;
    }
    n as c_int
}

extern "C" fn sys_umask(mask: u32) -> u32 {
    crate::posix::umask(mask)
}

extern "C" fn sys_chdir(path: *const c_char) -> c_int {
    let Some(path) = (unsafe { cstr(path) }) else {
        return errno_ret(rookos_abi::errno::EFAULT);
    };
    match crate::posix::chdir(path) {
        Ok(()) => 0,
        Err(e) => errno_ret(e),
    }
}

extern "C" fn sys_getcwd(out: *mut u8, cap: usize) -> c_int {
    let Ok(cwd) = crate::posix::getcwd() else {
        return errno_ret(rookos_abi::errno::ESRCH);
    };
    if out.is_null() || cap <= cwd.len() {
        return errno_ret(rookos_abi::errno::ERANGE);
    }
    // SAFETY: caller-owned out buffer of cap bytes per the ABI.
    unsafe {
        core::ptr::copy_nonoverlapping(cwd.as_ptr(), out, cwd.len());
        *out.add(cwd.len()) = 0;
    }
    cwd.len() as c_int
}

extern "C" fn sys_fcntl(fd: c_int, cmd: c_int, arg: u32) -> c_int {
    match crate::posix::fcntl(fd, cmd, arg) {
        Ok(v) => v,
        Err(e) => errno_ret(e),
    }
}

extern "C" fn sys_fstatat(
    dirfd: c_int,
    path: *const c_char,
    out: *mut UserStat,
    flags: u32,
) -> c_int {
    let Some(path) = (unsafe { cstr(path) }) else {
        return errno_ret(rookos_abi::errno::EFAULT);
    };
    if out.is_null() {
        return errno_ret(rookos_abi::errno::EFAULT);
    }
    match crate::posix::fstatat(dirfd, path, flags) {
        Ok(st) => {
            // SAFETY: caller-owned out pointer per the ABI.
            unsafe {
                *out = UserStat {
                    mode: st.mode,
                    nlink: st.nlink,
                    size: st.size,
                    mtime: st.mtime,
                };
            }
            0
        }
        Err(e) => errno_ret(e),
    }
}

extern "C" fn sys_unlinkat(dirfd: c_int, path: *const c_char, flags: u32) -> c_int {
    let Some(path) = (unsafe { cstr(path) }) else {
        return errno_ret(rookos_abi::errno::EFAULT);
    };
    match crate::posix::unlinkat(dirfd, path, flags) {
        Ok(()) => 0,
        Err(e) => errno_ret(e),
    }
}

extern "C" fn sys_mkdirat(dirfd: c_int, path: *const c_char, mode: u32) -> c_int {
    let Some(path) = (unsafe { cstr(path) }) else {
        return errno_ret(rookos_abi::errno::EFAULT);
    };
    match crate::posix::mkdirat(dirfd, path, mode) {
        Ok(()) => 0,
        Err(e) => errno_ret(e),
    }
}

extern "C" fn sys_renameat(
    olddirfd: c_int,
    old: *const c_char,
    newdirfd: c_int,
    new: *const c_char,
) -> c_int {
    let (Some(old), Some(new)) = (unsafe { cstr(old) }, unsafe { cstr(new) }) else {
        return errno_ret(rookos_abi::errno::EFAULT);
    };
    match crate::posix::renameat(olddirfd, old, newdirfd, new) {
        Ok(()) => 0,
        Err(e) => errno_ret(e),
    }
}

extern "C" fn sys_linkat(
    olddirfd: c_int,
    existing: *const c_char,
    newdirfd: c_int,
    linkpath: *const c_char,
    _flags: u32,
) -> c_int {
    let (Some(existing), Some(linkpath)) =
        (unsafe { cstr(existing) }, unsafe { cstr(linkpath) })
    else {
        return errno_ret(rookos_abi::errno::EFAULT);
    };
    match crate::posix::linkat(olddirfd, existing, newdirfd, linkpath) {
        Ok(()) => 0,
        Err(e) => errno_ret(e),
    }
}

extern "C" fn sys_symlinkat(target: *const c_char, dirfd: c_int, linkpath: *const c_char) -> c_int {
    let (Some(target), Some(linkpath)) = (unsafe { cstr(target) }, unsafe { cstr(linkpath) })
    else {
        return errno_ret(rookos_abi::errno::EFAULT);
    };
    match crate::posix::symlinkat(target, dirfd, linkpath) {
        Ok(()) => 0,
        Err(e) => errno_ret(e),
    }
}

extern "C" fn sys_readlinkat(dirfd: c_int, path: *const c_char, out: *mut u8, cap: usize) -> isize {
    let Some(path) = (unsafe { cstr(path) }) else {
        return errno_ret(rookos_abi::errno::EFAULT) as isize;
    };
    if out.is_null() || cap == 0 {
        return errno_ret(rookos_abi::errno::EFAULT) as isize;
    }
    match crate::posix::readlinkat(dirfd, path) {
        Ok(target) => {
            let n = target.len().min(cap);
            // SAFETY: caller-owned out buffer of cap bytes per the ABI.
            unsafe { core::ptr::copy_nonoverlapping(target.as_ptr(), out, n) };
            n as isize
        }
        Err(e) => errno_ret(e) as isize,
    }
}

extern "C" fn sys_pipe(out: *mut c_int) -> c_int {
    if out.is_null() {
        return errno_ret(rookos_abi::errno::EFAULT);
    }
    match crate::posix::pipe() {
        Ok((read_fd, write_fd)) => {
            // SAFETY: caller-owned two-element array per the ABI.
            unsafe {
                *out = read_fd;
                *out.add(1) = write_fd;
            }
            0
        }
        Err(e) => errno_ret(e),
    }
}

extern "C" fn sys_spawn(
    path: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    let Some(path) = (unsafe { cstr(path) }) else {
        return errno_ret(rookos_abi::errno::EFAULT);
    };
    let Some(argv) = (unsafe { cstr_vec(argv) }) else {
        return errno_ret(rookos_abi::errno::EFAULT);
    };
    let envp = if envp.is_null() {
        None
    } else {
        match unsafe { cstr_vec(envp) } {
            Some(v) => Some(v),
            None => return errno_ret(rookos_abi::errno::EFAULT),
        }
    };
    match crate::process::posix_spawn(
        path,
        &[],
        &crate::process::SpawnAttr::default(),
        &argv,
        envp.as_deref(),
    ) {
        Ok(pid) => pid,
        Err(e) => errno_ret(e),
    }
}

/// In-place exec; returns the exit code of the replacement image, or a
/// negative errno when the image never ran.
extern "C" fn sys_execve(
    path: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    let Some(path) = (unsafe { cstr(path) }) else {
        return errno_ret(rookos_abi::errno::EFAULT);
    };
    let Some(argv) = (unsafe { cstr_vec(argv) }) else {
        return errno_ret(rookos_abi::errno::EFAULT);
    };
    let envp = if envp.is_null() {
        None
    } else {
        match unsafe { cstr_vec(envp) } {
            Some(v) => Some(v),
            None => return errno_ret(rookos_abi::errno::EFAULT),
        }
    };
    match crate::process::execve(path, &argv, envp.as_deref()) {
        Ok(code) => code,
        Err(e) => errno_ret(e),
    }
}

// Handler sentinels of the classic signal() contract.
const SIG_DFL_ADDR: usize = 0;
const SIG_IGN_ADDR: usize = 1;
const SIG_ERR_ADDR: usize = usize::MAX;

extern "C" fn sys_signal(sig: c_int, handler: usize) -> usize {
    let action = match handler {
        SIG_DFL_ADDR => SigAction::Default,
        SIG_IGN_ADDR => SigAction::Ignore,
        // SAFETY: application shims are generated against the handler
        // ABI; the address comes from the loaded image.
        addr => SigAction::Handler(unsafe { core::mem::transmute::<usize, fn(i32)>(addr) }),
    };
    match crate::process::signal(sig, action) {
        Ok(SigAction::Default) => SIG_DFL_ADDR,
        Ok(SigAction::Ignore) => SIG_IGN_ADDR,
        Ok(SigAction::Handler(f)) => f as usize,
        Err(_) => SIG_ERR_ADDR,
    }
}

extern "C" fn sys_sigprocmask(how: c_int, set: *const u32, old: *mut u32) -> c_int {
    // SAFETY: caller-owned mask pointers per the ABI.
    let set = if set.is_null() {
        None
    } else {
        Some(unsafe { *set })
    };
    let mut old_mask = 0u32;
    let old_ref = if old.is_null() {
        None
    } else {
        Some(&mut old_mask)
    };
    match crate::process::sigprocmask(how, set, old_ref) {
        Ok(()) => {
            if !old.is_null() {
                // SAFETY: as above.
                unsafe { *old = old_mask };
            }
            0
        }
        Err(e) => errno_ret(e),
    }
}

extern "C" fn sys_setpgid(pid: c_int, pgid: c_int) -> c_int {
    match crate::process::setpgid(pid, pgid) {
        Ok(()) => 0,
        Err(e) => errno_ret(e),
    }
}

extern "C" fn sys_getpgid(pid: c_int) -> c_int {
    match crate::process::getpgid(pid) {
        Ok(pgid) => pgid,
        Err(e) => errno_ret(e),
    }
}

extern "C" fn sys_setsid() -> c_int {
    match crate::process::setsid() {
        Ok(sid) => sid,
        Err(e) => errno_ret(e),
    }
}

/// Install the core-owned slots. Called once at boot, before any
/// application can run.
pub fn sys_table_init_core() {
    sys_table_register(slots::SYS_MALLOC, sys_malloc as *const () as usize);
    sys_table_register(slots::SYS_CALLOC, sys_calloc as *const () as usize);
    sys_table_register(slots::SYS_REALLOC, sys_realloc as *const () as usize);
    sys_table_register(slots::SYS_FREE, sys_free as *const () as usize);
    sys_table_register(slots::SYS_OPENAT, sys_openat as *const () as usize);
    sys_table_register(slots::SYS_CLOSE, sys_close as *const () as usize);
    sys_table_register(slots::SYS_READ, sys_read as *const () as usize);
    sys_table_register(slots::SYS_WRITE, sys_write as *const () as usize);
    sys_table_register(slots::SYS_LSEEK, sys_lseek as *const () as usize);
    sys_table_register(slots::SYS_FSTATAT, sys_fstatat as *const () as usize);
    sys_table_register(slots::SYS_UNLINKAT, sys_unlinkat as *const () as usize);
    sys_table_register(slots::SYS_MKDIRAT, sys_mkdirat as *const () as usize);
    sys_table_register(slots::SYS_RENAMEAT, sys_renameat as *const () as usize);
    sys_table_register(slots::SYS_LINKAT, sys_linkat as *const () as usize);
    sys_table_register(slots::SYS_SYMLINKAT, sys_symlinkat as *const () as usize);
    sys_table_register(slots::SYS_READLINKAT, sys_readlinkat as *const () as usize);
    sys_table_register(slots::SYS_DUP, sys_dup as *const () as usize);
    sys_table_register(slots::SYS_DUP2, sys_dup2 as *const () as usize);
    sys_table_register(slots::SYS_FCNTL, sys_fcntl as *const () as usize);
    sys_table_register(slots::SYS_SPAWN, sys_spawn as *const () as usize);
    sys_table_register(slots::SYS_EXECVE, sys_execve as *const () as usize);
    sys_table_register(slots::SYS_GETPID, sys_getpid as *const () as usize);
    sys_table_register(slots::SYS_GETPPID, sys_getppid as *const () as usize);
    sys_table_register(slots::SYS_WAITPID, sys_waitpid as *const () as usize);
    sys_table_register(slots::SYS_KILL, sys_kill as *const () as usize);
    sys_table_register(slots::SYS_SIGNAL, sys_signal as *const () as usize);
    sys_table_register(slots::SYS_SIGPROCMASK, sys_sigprocmask as *const () as usize);
    sys_table_register(slots::SYS_SETPGID, sys_setpgid as *const () as usize);
    sys_table_register(slots::SYS_GETPGID, sys_getpgid as *const () as usize);
    sys_table_register(slots::SYS_SETSID, sys_setsid as *const () as usize);
    sys_table_register(slots::SYS_EXIT, sys_exit as *const () as usize);
    sys_table_register(slots::SYS_GETENV, sys_getenv as *const () as usize);
    sys_table_register(slots::SYS_UMASK, sys_umask as *const () as usize);
    sys_table_register(slots::SYS_CHDIR, sys_chdir as *const () as usize);
    sys_table_register(slots::SYS_GETCWD, sys_getcwd as *const () as usize);
    sys_table_register(slots::SYS_PIPE, sys_pipe as *const () as usize);
}
