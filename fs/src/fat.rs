//! Boundary to the FAT driver.
//!
//! The SD/SPI block driver and the FAT implementation itself live
//! outside this tree; they plug in as a [`FatVolume`] registered at
//! boot. The error codes mirror the driver's result set and are mapped
//! to POSIX errno at the file-layer boundary.

use alloc::string::String;
use bitflags::bitflags;

use rookos_abi::errno::{self, Errno};
use rookos_lib::StateCell;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FatError {
    DiskErr,
    IntErr,
    NotReady,
    NoFile,
    NoPath,
    InvalidName,
    Denied,
    Exist,
    InvalidObject,
    WriteProtected,
    NotEnabled,
    NoFilesystem,
    Timeout,
    Locked,
    NotEnoughCore,
    TooManyOpenFiles,
    InvalidParameter,
}

pub type FatResult<T> = Result<T, FatError>;

/// Fixed driver-error to errno table.
pub fn fat_to_errno(err: FatError) -> Errno {
    match err {
        FatError::DiskErr | FatError::IntErr => errno::EIO,
        FatError::NotReady | FatError::NotEnabled | FatError::NoFilesystem => errno::ENODEV,
        FatError::NoFile | FatError::NoPath => errno::ENOENT,
        FatError::InvalidName => errno::EINVAL,
        FatError::Denied | FatError::WriteProtected => errno::EACCES,
        FatError::Exist => errno::EEXIST,
        FatError::InvalidObject => errno::EBADF,
        FatError::Timeout => errno::EBUSY,
        FatError::Locked => errno::EBUSY,
        FatError::NotEnoughCore => errno::ENOMEM,
        FatError::TooManyOpenFiles => errno::EMFILE,
        FatError::InvalidParameter => errno::EINVAL,
    }
}

bitflags! {
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct FatAttr: u8 {
        const RDO = 0x01;
        const HID = 0x02;
        const SYS = 0x04;
        const DIR = 0x10;
        const ARC = 0x20;
    }
}

/// Open-mode bits, matching the driver's `f_open` flags.
pub mod open_mode {
    pub const FA_READ: u8 = 0x01;
    pub const FA_WRITE: u8 = 0x02;
    pub const FA_OPEN_EXISTING: u8 = 0x00;
    pub const FA_CREATE_NEW: u8 = 0x04;
    pub const FA_CREATE_ALWAYS: u8 = 0x08;
    pub const FA_OPEN_ALWAYS: u8 = 0x10;
}

#[derive(Clone, Debug, Default)]
pub struct FatStat {
    pub size: u32,
    pub attr: FatAttr,
    /// FAT-packed date: bits 15-9 year since 1980, 8-5 month, 4-0 day.
    pub date: u16,
    /// FAT-packed time: bits 15-11 hour, 10-5 minute, 4-0 second/2.
    pub time: u16,
}

#[derive(Clone, Debug)]
pub struct FatDirEntry {
    pub name: String,
    pub size: u32,
    pub attr: FatAttr,
}

/// Driver handle to an open file.
pub type FileId = u32;

/// The FAT driver surface the OS core needs. Offsets are explicit so
/// the shared-position bookkeeping stays in the file layer.
pub trait FatVolume: Send + Sync {
    fn open(&self, path: &str, mode: u8) -> FatResult<FileId>;
    fn close(&self, file: FileId) -> FatResult<()>;
    fn read(&self, file: FileId, pos: u32, buf: &mut [u8]) -> FatResult<usize>;
    fn write(&self, file: FileId, pos: u32, buf: &[u8]) -> FatResult<usize>;
    fn truncate(&self, file: FileId, len: u32) -> FatResult<()>;
    fn size(&self, file: FileId) -> FatResult<u32>;
    fn sync(&self, file: FileId) -> FatResult<()>;
    fn stat(&self, path: &str) -> FatResult<FatStat>;
    fn read_dir(&self, path: &str, cb: &mut dyn FnMut(&FatDirEntry)) -> FatResult<()>;
    fn mkdir(&self, path: &str) -> FatResult<()>;
    fn unlink(&self, path: &str) -> FatResult<()>;
    fn rename(&self, from: &str, to: &str) -> FatResult<()>;
}

struct VolumeState {
    volume: Option<&'static dyn FatVolume>,
    mount_hook: Option<fn() -> bool>,
    mounted: bool,
}

static VOLUME: StateCell<VolumeState> = StateCell::new(VolumeState {
    volume: None,
    mount_hook: None,
    mounted: false,
});

/// Register the mounted volume. Boot-time only.
pub fn register_volume(volume: &'static dyn FatVolume) {
    VOLUME.with_mut(|v| {
        v.volume = Some(volume);
        v.mounted = true;
    });
}

/// Hook used by the `mount` builtin to retry an SD mount.
pub fn register_mount_hook(hook: fn() -> bool) {
    VOLUME.with_mut(|v| v.mount_hook = Some(hook));
}

pub fn volume() -> Option<&'static dyn FatVolume> {
    VOLUME.with(|v| if v.mounted { v.volume } else { None })
}

pub fn is_mounted() -> bool {
    VOLUME.with(|v| v.mounted && v.volume.is_some())
}

/// Retry the mount through the registered hook.
pub fn try_mount() -> bool {
    let hook = VOLUME.with(|v| v.mount_hook);
    let ok = match hook {
        Some(h) => h(),
        None => false,
    };
    if ok {
        VOLUME.with_mut(|v| v.mounted = true);
    }
    ok
}

/// Decode a FAT date/time pair to a Unix timestamp (UTC, no DST).
pub fn fat_datetime_to_unix(fdate: u16, ftime: u16) -> u64 {
    let year = ((fdate >> 9) & 0x7F) as u64 + 1980;
    let month = (((fdate >> 5) & 0x0F) as u64).clamp(1, 12);
    let day = ((fdate & 0x1F) as u64).max(1);
    let hour = ((ftime >> 11) & 0x1F) as u64;
    let minute = ((ftime >> 5) & 0x3F) as u64;
    let second = ((ftime & 0x1F) as u64) * 2;

    const DAYS_IN_MONTH: [u64; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let is_leap = |y: u64| (y % 4 == 0 && y % 100 != 0) || y % 400 == 0;

    let mut days: u64 = 0;
    for y in 1970..year {
        days += if is_leap(y) { 366 } else { 365 };
    }
    for m in 1..month {
        days += DAYS_IN_MONTH[(m - 1) as usize];
        if m == 2 && is_leap(year) {
            days += 1;
        }
    }
    days += day - 1;

    ((days * 24 + hour) * 60 + minute) * 60 + second
}
