//! Context-facing POSIX wrappers.
//!
//! Thin layer between the syscall surface and the context-free file
//! primitives: looks up the calling task's context, resolves paths
//! against its cwd or an open directory, and routes the table/volume
//! arguments through.

use alloc::borrow::ToOwned;
use alloc::string::String;

use rookos_abi::errno::{self, Errno};
use rookos_abi::fs::{AT_FDCWD, AT_SYMLINK_NOFOLLOW, DEFAULT_UMASK, OpenFlags, S_IFCHR, S_IFIFO};

use rookos_fs::fat::{self, FatDirEntry, FatVolume};
use rookos_fs::path::realpathat;
use rookos_fs::{extfs, fileio};

use crate::context::{Context, current_ctx};

fn volume() -> Result<&'static dyn FatVolume, Errno> {
    let vol = fat::volume().ok_or(errno::ENODEV)?;
    // The sidecar is loaded once per boot, on first FS access.
    extfs::load(vol).map_err(fat::fat_to_errno)?;
    Ok(vol)
}

fn ctx() -> Result<&'static mut Context, Errno> {
    current_ctx().ok_or(errno::ESRCH)
}

/// Resolve `path` relative to `ctx`'s cwd (for `AT_FDCWD`) or an open
/// directory, with sidecar-aware link substitution.
pub fn resolve_in(
    ctx: &Context,
    dirfd: i32,
    path: &str,
    follow_final: bool,
) -> Result<String, Errno> {
    let vol = volume()?;
    let base = if dirfd == AT_FDCWD {
        ctx.cwd().to_owned()
    } else {
        ctx.dir_table.dirname(dirfd)?.to_owned()
    };
    let mut lookup = fileio::link_lookup(vol);
    realpathat(&base, path, follow_final, &mut lookup)
}

pub fn realpath(path: &str) -> Result<String, Errno> {
    let ctx = ctx()?;
    resolve_in(ctx, AT_FDCWD, path, true)
}

// ---------------------------------------------------------------------------
// Descriptor operations
// ---------------------------------------------------------------------------

pub fn openat(dirfd: i32, path: &str, flags: OpenFlags, mode: u32) -> Result<i32, Errno> {
    let vol = volume()?;
    let ctx = ctx()?;
    let resolved = resolve_in(ctx, dirfd, path, true)?;
    fileio::openat(&mut ctx.fd_table, vol, &resolved, flags, mode, ctx.umask)
}

pub fn close(fd: i32) -> Result<(), Errno> {
    let ctx = ctx()?;
    fileio::close(&mut ctx.fd_table, fat::volume(), fd)
}

pub fn read(fd: i32, buf: &mut [u8]) -> Result<usize, Errno> {
    let vol = volume()?;
    let ctx = ctx()?;
    fileio::read(&mut ctx.fd_table, vol, fd, buf)
}

pub fn write(fd: i32, buf: &[u8]) -> Result<usize, Errno> {
    let vol = volume()?;
    let ctx = ctx()?;
    fileio::write(&mut ctx.fd_table, vol, fd, buf)
}

pub fn lseek(fd: i32, offset: i64, whence: i32) -> Result<i64, Errno> {
    let vol = volume()?;
    let ctx = ctx()?;
    fileio::lseek(&mut ctx.fd_table, vol, fd, offset, whence)
}

pub fn dup(fd: i32) -> Result<i32, Errno> {
    let ctx = ctx()?;
    fileio::dup(&mut ctx.fd_table, fd)
}

pub fn dup2(oldfd: i32, newfd: i32) -> Result<i32, Errno> {
    let ctx = ctx()?;
    fileio::dup2(&mut ctx.fd_table, fat::volume(), oldfd, newfd)
}

pub fn dup3(oldfd: i32, newfd: i32, cloexec: bool) -> Result<i32, Errno> {
    let ctx = ctx()?;
    fileio::dup3(&mut ctx.fd_table, fat::volume(), oldfd, newfd, cloexec)
}

pub fn fcntl(fd: i32, cmd: i32, arg: u32) -> Result<i32, Errno> {
    let ctx = ctx()?;
    fileio::fcntl(&mut ctx.fd_table, fd, cmd, arg)
}

/// Anonymous pipe in the calling context's table.
pub fn pipe() -> Result<(i32, i32), Errno> {
    let ctx = ctx()?;
    fileio::pipe(&mut ctx.fd_table)
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

pub fn stat(path: &str) -> Result<fileio::StatBuf, Errno> {
    let vol = volume()?;
    let ctx = ctx()?;
    let resolved = resolve_in(ctx, AT_FDCWD, path, true)?;
    fileio::stat_path(vol, &resolved)
}

pub fn lstat(path: &str) -> Result<fileio::StatBuf, Errno> {
    let vol = volume()?;
    let ctx = ctx()?;
    let resolved = resolve_in(ctx, AT_FDCWD, path, false)?;
    fileio::lstat_path(vol, &resolved)
}

pub fn fstat(fd: i32) -> Result<fileio::StatBuf, Errno> {
    let ctx = ctx()?;
    let path = ctx.fd_table.path_of(fd)?;
    if path == "(console)" {
        return Ok(fileio::StatBuf {
            mode: S_IFCHR | 0o666,
            size: 0,
            mtime: 0,
            nlink: 1,
        });
    }
    if path == "(pipe)" {
        return Ok(fileio::StatBuf {
            mode: S_IFIFO | 0o666,
            size: 0,
            mtime: 0,
            nlink: 1,
        });
    }
    let vol = volume()?;
    fileio::stat_path(vol, &path)
}

/// `fstatat`: dirfd-relative stat with the symlink-follow flag.
pub fn fstatat(dirfd: i32, path: &str, flags: u32) -> Result<fileio::StatBuf, Errno> {
    let vol = volume()?;
    let ctx = ctx()?;
    let follow = flags & AT_SYMLINK_NOFOLLOW == 0;
    let resolved = resolve_in(ctx, dirfd, path, follow)?;
    if follow {
        fileio::stat_path(vol, &resolved)
    } else {
        fileio::lstat_path(vol, &resolved)
    }
}

pub fn access(path: &str) -> Result<(), Errno> {
    let vol = volume()?;
    let ctx = ctx()?;
    let resolved = resolve_in(ctx, AT_FDCWD, path, true)?;
    fileio::access(vol, &resolved)
}

// ---------------------------------------------------------------------------
// Namespace
// ---------------------------------------------------------------------------

pub fn unlinkat(dirfd: i32, path: &str, flags: u32) -> Result<(), Errno> {
    let vol = volume()?;
    let ctx = ctx()?;
    let resolved = resolve_in(ctx, dirfd, path, false)?;
    fileio::unlinkat(vol, &resolved, flags)
}

pub fn symlinkat(target: &str, dirfd: i32, linkpath: &str) -> Result<(), Errno> {
    let vol = volume()?;
    let ctx = ctx()?;
    let resolved = resolve_in(ctx, dirfd, linkpath, false)?;
    fileio::symlinkat(vol, target, &resolved)
}

pub fn linkat(olddirfd: i32, existing: &str, newdirfd: i32, linkpath: &str) -> Result<(), Errno> {
    let vol = volume()?;
    let ctx = ctx()?;
    let resolved_old = resolve_in(ctx, olddirfd, existing, true)?;
    let resolved_new = resolve_in(ctx, newdirfd, linkpath, false)?;
    fileio::linkat(vol, &resolved_old, &resolved_new)
}

pub fn readlinkat(dirfd: i32, path: &str) -> Result<String, Errno> {
    let vol = volume()?;
    let ctx = ctx()?;
    let resolved = resolve_in(ctx, dirfd, path, false)?;
    fileio::readlinkat(vol, &resolved)
}

pub fn mkdirat(dirfd: i32, path: &str, mode: u32) -> Result<(), Errno> {
    let vol = volume()?;
    let ctx = ctx()?;
    let resolved = resolve_in(ctx, dirfd, path, true)?;
    fileio::mkdirat(vol, &resolved, mode)
}

pub fn renameat(olddirfd: i32, from: &str, newdirfd: i32, to: &str) -> Result<(), Errno> {
    let vol = volume()?;
    let ctx = ctx()?;
    let resolved_from = resolve_in(ctx, olddirfd, from, false)?;
    let resolved_to = resolve_in(ctx, newdirfd, to, false)?;
    fileio::renameat(vol, &resolved_from, &resolved_to)
}

pub fn chmodat(dirfd: i32, path: &str, mode: u32) -> Result<(), Errno> {
    let vol = volume()?;
    let ctx = ctx()?;
    let resolved = resolve_in(ctx, dirfd, path, true)?;
    fileio::chmodat(vol, &resolved, mode)
}

// ---------------------------------------------------------------------------
// Working directory, umask, environment
// ---------------------------------------------------------------------------

pub fn getcwd() -> Result<String, Errno> {
    Ok(ctx()?.cwd().to_owned())
}

pub fn chdir(path: &str) -> Result<(), Errno> {
    let vol = volume()?;
    let ctx = ctx()?;
    let resolved = resolve_in(ctx, AT_FDCWD, path, true)?;
    let st = fileio::stat_path(vol, &resolved)?;
    if st.mode & rookos_abi::fs::S_IFMT != rookos_abi::fs::S_IFDIR {
        return Err(errno::ENOTDIR);
    }
    ctx.setenv("CD", &resolved);
    Ok(())
}

pub fn umask(mask: u32) -> u32 {
    match current_ctx() {
        Some(ctx) => {
            let old = ctx.umask;
            ctx.umask = mask & 0o777;
            old
        }
        None => DEFAULT_UMASK,
    }
}

pub fn getenv(key: &str) -> Option<String> {
    current_ctx().and_then(|c| c.getenv(key).map(|v| v.to_owned()))
}

pub fn setenv(key: &str, value: &str) -> Result<(), Errno> {
    ctx()?.setenv(key, value);
    Ok(())
}

// ---------------------------------------------------------------------------
// Directory streams
// ---------------------------------------------------------------------------

pub fn opendir(path: &str) -> Result<i32, Errno> {
    let vol = volume()?;
    let ctx = ctx()?;
    let resolved = resolve_in(ctx, AT_FDCWD, path, true)?;
    ctx.dir_table.open(vol, &resolved)
}

pub fn readdir(dirfd: i32) -> Result<Option<FatDirEntry>, Errno> {
    ctx()?.dir_table.read(dirfd)
}

pub fn rewinddir(dirfd: i32) -> Result<(), Errno> {
    ctx()?.dir_table.rewind(dirfd)
}

pub fn closedir(dirfd: i32) -> Result<(), Errno> {
    ctx()?.dir_table.close(dirfd)
}
