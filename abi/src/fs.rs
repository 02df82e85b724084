//! File-layer ABI: open flags, descriptor flags, mode bits, seek and
//! `*at` constants, sidecar record tags.

use bitflags::bitflags;

bitflags! {
    /// `open(2)`-style flags. Access mode uses the two low bits so the
    /// usual `O_RDONLY`/`O_WRONLY`/`O_RDWR` comparisons work.
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const WRONLY    = 1 << 0;
        const RDWR      = 1 << 1;
        const CREAT     = 1 << 6;
        const EXCL      = 1 << 7;
        const TRUNC     = 1 << 9;
        const APPEND    = 1 << 10;
        const NONBLOCK  = 1 << 11;
        const DIRECTORY = 1 << 16;
        const CLOEXEC   = 1 << 19;
    }
}

pub const O_RDONLY: OpenFlags = OpenFlags::empty();

impl OpenFlags {
    #[inline]
    pub const fn readable(self) -> bool {
        !self.contains(OpenFlags::WRONLY) || self.contains(OpenFlags::RDWR)
    }

    #[inline]
    pub const fn writable(self) -> bool {
        self.contains(OpenFlags::WRONLY) || self.contains(OpenFlags::RDWR)
    }
}

/// Per-descriptor flag: close this descriptor across exec/spawn.
pub const FD_CLOEXEC: u32 = 1;

/// `fcntl(2)` commands.
pub const F_DUPFD: i32 = 0;
pub const F_GETFD: i32 = 1;
pub const F_SETFD: i32 = 2;
pub const F_GETFL: i32 = 3;
pub const F_SETFL: i32 = 4;

/// `*at` dirfd sentinel and lookup flags.
pub const AT_FDCWD: i32 = -100;
pub const AT_SYMLINK_NOFOLLOW: u32 = 0x100;
pub const AT_REMOVEDIR: u32 = 0x200;
pub const AT_SYMLINK_FOLLOW: u32 = 0x400;

/// POSIX mode bits stored in the extfs sidecar.
pub const S_IFMT: u32 = 0o170000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;

#[inline]
pub const fn s_isdir(mode: u32) -> bool {
    mode & S_IFMT == S_IFDIR
}

#[inline]
pub const fn s_islnk(mode: u32) -> bool {
    mode & S_IFMT == S_IFLNK
}

pub const SEEK_SET: i32 = 0;
pub const SEEK_CUR: i32 = 1;
pub const SEEK_END: i32 = 2;

pub const DEFAULT_UMASK: u32 = 0o022;

/// Sidecar record tags, also used as marker bytes at the start of the
/// FAT file body for hardlinks and symlinks.
pub const SIDECAR_ORIGINAL: u8 = b'O';
pub const SIDECAR_HARDLINK: u8 = b'H';
pub const SIDECAR_SYMLINK: u8 = b'S';

/// Absolute path of the sidecar table on the volume.
pub const EXTFS_PATH: &str = "/.extfs";

/// `stat` result as applications receive it through the syscall table.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct UserStat {
    pub mode: u32,
    pub nlink: u32,
    pub size: u64,
    pub mtime: u64,
}
