//! Per-context file-descriptor table and the POSIX file operations.
//!
//! Descriptors 0/1/2 are console sentinels wired to the owning terminal
//! through registered console hooks. Real files share an open-file
//! object (path, driver handle, status flags, file position) between
//! every descriptor duplicated from the same open; the last close
//! releases the driver handle. Anonymous pipes are fixed FIFO slots the
//! shell dup2's over stdin/stdout to connect pipeline stages.

use alloc::borrow::ToOwned;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;

use rookos_abi::errno::{self, Errno};
use rookos_abi::fs::{
    self as absfs, FD_CLOEXEC, OpenFlags, S_IFDIR, S_IFREG, SIDECAR_HARDLINK, SIDECAR_SYMLINK,
};
use rookos_lib::services::task;
use rookos_lib::{SchedMutex, StateCell};

use crate::extfs::{self, SidecarHit};
use crate::fat::{FatDirEntry, FatVolume, FileId, fat_datetime_to_unix, fat_to_errno, open_mode};

pub const FD_TABLE_MAX: usize = 32;
pub const DIR_TABLE_MAX: usize = 8;

// ---------------------------------------------------------------------------
// Console hooks
// ---------------------------------------------------------------------------

/// Terminal routing for the console sentinels. The terminal subsystem
/// registers these; reads and writes on fds 0-2 go through them to the
/// current task's terminal.
#[derive(Clone, Copy)]
pub struct ConsoleOps {
    pub write: fn(&[u8]),
    pub getch: fn() -> u8,
    pub getch_now: fn() -> Option<u8>,
}

fn default_console_write(_buf: &[u8]) {}
fn default_getch() -> u8 {
    b'\n'
}
fn default_getch_now() -> Option<u8> {
    None
}

static CONSOLE: StateCell<ConsoleOps> = StateCell::new(ConsoleOps {
    write: default_console_write,
    getch: default_getch,
    getch_now: default_getch_now,
});

pub fn register_console(ops: ConsoleOps) {
    CONSOLE.with_mut(|c| *c = ops);
}

fn console() -> ConsoleOps {
    CONSOLE.with(|c| *c)
}

// ---------------------------------------------------------------------------
// Descriptor table
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StdStream {
    Stdin,
    Stdout,
    Stderr,
}

/// Open-file description shared by duplicated descriptors: the file
/// position and status flags are deliberately common property.
pub struct OpenFile {
    pub id: FileId,
    pub path: String,
    pub pos: u64,
    pub status_flags: OpenFlags,
    pub mode: u32,
    pub ctime: u64,
}

pub enum FdKind {
    Console(StdStream),
    File(Rc<RefCell<OpenFile>>),
    Pipe { id: u32, read_end: bool },
}

impl Clone for FdKind {
    fn clone(&self) -> Self {
        match self {
            FdKind::Console(s) => FdKind::Console(*s),
            FdKind::File(f) => FdKind::File(Rc::clone(f)),
            FdKind::Pipe { id, read_end } => {
                pipe_add_ref(*id, *read_end);
                FdKind::Pipe {
                    id: *id,
                    read_end: *read_end,
                }
            }
        }
    }
}

// Pipe end references are counted in the slot, not through `Rc`, so
// the balance to `Clone` lives here: every dropped entry releases its
// end, wherever the entry dies (close, dup2 overwrite, table drop).
impl Drop for FdKind {
    fn drop(&mut self) {
        if let FdKind::Pipe { id, read_end } = self {
            pipe_release(*id, *read_end);
        }
    }
}

#[derive(Clone)]
pub struct FdEntry {
    pub kind: FdKind,
    /// Descriptor-level flags (`FD_CLOEXEC`); never shared by dup.
    pub fd_flags: u32,
    /// Status flags for console sentinels and pipe ends (files keep
    /// theirs on the shared object).
    pub local_flags: OpenFlags,
}

#[derive(Default)]
pub struct FdTable {
    entries: Vec<Option<FdEntry>>,
}

// SAFETY: descriptor tables are only touched from the scheduler core;
// cross-context sharing happens via explicit spawn-time cloning there.
unsafe impl Send for FdTable {}

impl FdTable {
    /// Fresh table with the three console sentinels.
    pub fn with_std() -> Self {
        let mut entries: Vec<Option<FdEntry>> = Vec::new();
        for stream in [StdStream::Stdin, StdStream::Stdout, StdStream::Stderr] {
            entries.push(Some(FdEntry {
                kind: FdKind::Console(stream),
                fd_flags: 0,
                local_flags: OpenFlags::empty(),
            }));
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    fn get(&self, fd: i32) -> Result<&FdEntry, Errno> {
        usize::try_from(fd)
            .ok()
            .and_then(|i| self.entries.get(i))
            .and_then(Option::as_ref)
            .ok_or(errno::EBADF)
    }

    fn get_mut(&mut self, fd: i32) -> Result<&mut FdEntry, Errno> {
        usize::try_from(fd)
            .ok()
            .and_then(|i| self.entries.get_mut(i))
            .and_then(Option::as_mut)
            .ok_or(errno::EBADF)
    }

    /// First hole at or after `min`, extending the table when needed.
    fn first_free(&mut self, min: usize) -> Result<usize, Errno> {
        for i in min..self.entries.len() {
            if self.entries[i].is_none() {
                return Ok(i);
            }
        }
        if self.entries.len() >= FD_TABLE_MAX {
            return Err(errno::EMFILE);
        }
        while self.entries.len() < min {
            if self.entries.len() >= FD_TABLE_MAX {
                return Err(errno::EMFILE);
            }
            self.entries.push(None);
        }
        self.entries.push(None);
        Ok(self.entries.len() - 1)
    }

    fn install(&mut self, idx: usize, entry: FdEntry) {
        while self.entries.len() <= idx {
            self.entries.push(None);
        }
        self.entries[idx] = Some(entry);
    }

    /// Path recorded for a descriptor (used by `fstat` and diagnostics).
    pub fn path_of(&self, fd: i32) -> Result<String, Errno> {
        match &self.get(fd)?.kind {
            FdKind::Console(_) => Ok("(console)".to_owned()),
            FdKind::File(f) => Ok(f.borrow().path.clone()),
            FdKind::Pipe { .. } => Ok("(pipe)".to_owned()),
        }
    }

    /// Spawn-time inheritance: clone every entry not marked
    /// `FD_CLOEXEC` (those become holes), sharing the open-file
    /// objects.
    pub fn clone_for_spawn(&self) -> FdTable {
        let entries = self
            .entries
            .iter()
            .map(|slot| match slot {
                Some(entry) if entry.fd_flags & FD_CLOEXEC == 0 => Some(entry.clone()),
                _ => None,
            })
            .collect();
        FdTable { entries }
    }

    /// Exec-time sweep: close every descriptor marked `FD_CLOEXEC`.
    pub fn close_cloexec(&mut self, volume: Option<&dyn FatVolume>) {
        for i in 0..self.entries.len() {
            let is_cloexec = self.entries[i]
                .as_ref()
                .is_some_and(|e| e.fd_flags & FD_CLOEXEC != 0);
            if is_cloexec {
                let _ = close_entry(self.entries[i].take(), volume);
            }
        }
    }

    /// Drop every descriptor (context teardown).
    pub fn close_all(&mut self, volume: Option<&dyn FatVolume>) {
        for slot in self.entries.iter_mut() {
            let _ = close_entry(slot.take(), volume);
        }
        self.entries.clear();
    }

    /// Reference count of the open-file object behind `fd` (test hook).
    pub fn file_refs(&self, fd: i32) -> Result<usize, Errno> {
        match &self.get(fd)?.kind {
            FdKind::File(f) => Ok(Rc::strong_count(f)),
            _ => Err(errno::EBADF),
        }
    }
}

fn close_entry(entry: Option<FdEntry>, volume: Option<&dyn FatVolume>) -> Result<(), Errno> {
    let Some(entry) = entry else {
        return Err(errno::EBADF);
    };
    if let FdKind::File(file) = &entry.kind {
        // Last descriptor referencing the object closes the driver
        // handle. Pipe ends release through the entry's drop below.
        if Rc::strong_count(file) == 1 {
            let id = file.borrow().id;
            if let Some(vol) = volume {
                vol.close(id).map_err(fat_to_errno)?;
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Anonymous pipes
// ---------------------------------------------------------------------------

pub const PIPE_BUFFER_SIZE: usize = 4096;
const MAX_PIPES: usize = 8;

struct PipeSlot {
    valid: bool,
    read_pos: usize,
    len: usize,
    readers: u16,
    writers: u16,
    buffer: [u8; PIPE_BUFFER_SIZE],
}

impl PipeSlot {
    const fn new() -> Self {
        Self {
            valid: false,
            read_pos: 0,
            len: 0,
            readers: 0,
            writers: 0,
            buffer: [0; PIPE_BUFFER_SIZE],
        }
    }
}

const EMPTY_PIPE: PipeSlot = PipeSlot::new();

struct PipeState {
    slots: [PipeSlot; MAX_PIPES],
}

static PIPE_STATE: SchedMutex<PipeState> = SchedMutex::new(PipeState {
    slots: [EMPTY_PIPE; MAX_PIPES],
});

fn pipe_add_ref(id: u32, read_end: bool) {
    PIPE_STATE.with(|p| {
        if let Some(slot) = p.slots.get_mut(id as usize) {
            if slot.valid {
                if read_end {
                    slot.readers += 1;
                } else {
                    slot.writers += 1;
                }
            }
        }
    });
}

fn pipe_release(id: u32, read_end: bool) {
    PIPE_STATE.with(|p| {
        if let Some(slot) = p.slots.get_mut(id as usize) {
            if !slot.valid {
                return;
            }
            if read_end {
                slot.readers = slot.readers.saturating_sub(1);
            } else {
                slot.writers = slot.writers.saturating_sub(1);
            }
            if slot.readers == 0 && slot.writers == 0 {
                slot.valid = false;
                slot.len = 0;
            }
        }
    });
}

fn pipe_drop_slot(id: u32) {
    PIPE_STATE.with(|p| {
        if let Some(slot) = p.slots.get_mut(id as usize) {
            slot.valid = false;
        }
    });
}

/// Create an anonymous pipe: returns `(read_fd, write_fd)` in this
/// table. The shell's pipeline uses these with spawn-time `dup2`
/// actions to chain one stage's stdout into the next stage's stdin.
pub fn pipe(table: &mut FdTable) -> Result<(i32, i32), Errno> {
    let id = PIPE_STATE
        .with(|p| {
            for (i, slot) in p.slots.iter_mut().enumerate() {
                if !slot.valid {
                    slot.valid = true;
                    slot.read_pos = 0;
                    slot.len = 0;
                    slot.readers = 1;
                    slot.writers = 1;
                    return Some(i as u32);
                }
            }
            None
        })
        .ok_or(errno::ENFILE)?;

    let read_fd = match table.first_free(0) {
        Ok(fd) => fd,
        Err(e) => {
            pipe_drop_slot(id);
            return Err(e);
        }
    };
    table.install(
        read_fd,
        FdEntry {
            kind: FdKind::Pipe { id, read_end: true },
            fd_flags: 0,
            local_flags: OpenFlags::empty(),
        },
    );
    let write_fd = match table.first_free(0) {
        Ok(fd) => fd,
        Err(e) => {
            table.entries[read_fd] = None;
            pipe_drop_slot(id);
            return Err(e);
        }
    };
    table.install(
        write_fd,
        FdEntry {
            kind: FdKind::Pipe { id, read_end: false },
            fd_flags: 0,
            local_flags: OpenFlags::empty(),
        },
    );
    Ok((read_fd as i32, write_fd as i32))
}

/// Read from a pipe. Data drains first; an empty pipe with no writers
/// left is end-of-file. A blocking read yields to the scheduler until
/// the producer catches up.
fn pipe_read(id: u32, nonblock: bool, buf: &mut [u8]) -> Result<usize, Errno> {
    if buf.is_empty() {
        return Ok(0);
    }
    loop {
        let outcome = PIPE_STATE.with(|p| {
            let slot = p
                .slots
                .get_mut(id as usize)
                .filter(|s| s.valid)
                .ok_or(errno::EBADF)?;
            if slot.len > 0 {
                let n = buf.len().min(slot.len);
                for out in buf.iter_mut().take(n) {
                    *out = slot.buffer[slot.read_pos];
                    slot.read_pos = (slot.read_pos + 1) % PIPE_BUFFER_SIZE;
                }
                slot.len -= n;
                Ok::<Option<usize>, Errno>(Some(n))
            } else if slot.writers == 0 {
                Ok(Some(0))
            } else {
                Ok(None)
            }
        })?;
        match outcome {
            Some(n) => return Ok(n),
            None if nonblock => return Err(errno::EAGAIN),
            None => task::yield_now(),
        }
    }
}

/// Write into a pipe. Fails with `EPIPE` when no reader remains; a full
/// buffer yields to the scheduler until the consumer drains it.
fn pipe_write(id: u32, buf: &[u8]) -> Result<usize, Errno> {
    if buf.is_empty() {
        return Ok(0);
    }
    loop {
        let outcome = PIPE_STATE.with(|p| {
            let slot = p
                .slots
                .get_mut(id as usize)
                .filter(|s| s.valid)
                .ok_or(errno::EBADF)?;
            if slot.readers == 0 {
                return Err(errno::EPIPE);
            }
            let space = PIPE_BUFFER_SIZE - slot.len;
            if space == 0 {
                return Ok(None);
            }
            let n = buf.len().min(space);
            let mut write_pos = (slot.read_pos + slot.len) % PIPE_BUFFER_SIZE;
            for &b in buf.iter().take(n) {
                slot.buffer[write_pos] = b;
                write_pos = (write_pos + 1) % PIPE_BUFFER_SIZE;
            }
            slot.len += n;
            Ok(Some(n))
        })?;
        match outcome {
            Some(n) => return Ok(n),
            None => task::yield_now(),
        }
    }
}

// ---------------------------------------------------------------------------
// POSIX operations
// ---------------------------------------------------------------------------

fn stat_exists(volume: &dyn FatVolume, path: &str) -> bool {
    path == "/" || volume.stat(path).is_ok()
}

/// Open an already-resolved absolute path into the table.
pub fn openat(
    table: &mut FdTable,
    volume: &dyn FatVolume,
    abs_path: &str,
    flags: OpenFlags,
    mode: u32,
    umask: u32,
) -> Result<i32, Errno> {
    let existed = stat_exists(volume, abs_path);
    if existed {
        if flags.contains(OpenFlags::CREAT | OpenFlags::EXCL) {
            return Err(errno::EEXIST);
        }
        if let Ok(st) = volume.stat(abs_path) {
            if st.attr.contains(crate::fat::FatAttr::DIR) {
                return Err(errno::EISDIR);
            }
        }
    } else if !flags.contains(OpenFlags::CREAT) {
        return Err(errno::ENOENT);
    }
    if flags.contains(OpenFlags::DIRECTORY) {
        return Err(errno::ENOTDIR);
    }

    let mut fat_mode = 0u8;
    if flags.readable() {
        fat_mode |= open_mode::FA_READ;
    }
    if flags.writable() {
        fat_mode |= open_mode::FA_WRITE;
    }
    if flags.contains(OpenFlags::CREAT) {
        fat_mode |= if flags.contains(OpenFlags::EXCL) {
            open_mode::FA_CREATE_NEW
        } else if flags.contains(OpenFlags::TRUNC) {
            open_mode::FA_CREATE_ALWAYS
        } else {
            open_mode::FA_OPEN_ALWAYS
        };
        // Creation always needs write access at the driver level.
        fat_mode |= open_mode::FA_WRITE;
    }

    let id = volume.open(abs_path, fat_mode).map_err(fat_to_errno)?;

    if existed && flags.contains(OpenFlags::TRUNC) && flags.writable() {
        volume.truncate(id, 0).map_err(fat_to_errno)?;
    }

    let stat = volume.stat(abs_path).ok();
    let ctime = stat
        .as_ref()
        .map(|s| fat_datetime_to_unix(s.date, s.time))
        .unwrap_or(0);

    let effective_mode = if !existed {
        let m = S_IFREG | (mode & 0o777 & !umask);
        // Newly created files get an `O` sidecar record carrying their
        // POSIX mode.
        extfs::add_original(volume, abs_path, m).map_err(fat_to_errno)?;
        m
    } else {
        match extfs::lookup(abs_path) {
            Some(SidecarHit::Original { mode }) => mode,
            _ => S_IFREG | 0o777,
        }
    };

    let fd = table.first_free(0)?;
    let mut fd_flags = 0;
    if flags.contains(OpenFlags::CLOEXEC) {
        fd_flags |= FD_CLOEXEC;
    }
    table.install(
        fd,
        FdEntry {
            kind: FdKind::File(Rc::new(RefCell::new(OpenFile {
                id,
                path: abs_path.to_owned(),
                pos: 0,
                status_flags: flags & (OpenFlags::APPEND | OpenFlags::NONBLOCK),
                mode: effective_mode,
                ctime,
            }))),
            fd_flags,
            local_flags: OpenFlags::empty(),
        },
    );
    Ok(fd as i32)
}

pub fn close(table: &mut FdTable, volume: Option<&dyn FatVolume>, fd: i32) -> Result<(), Errno> {
    let idx = usize::try_from(fd).map_err(|_| errno::EBADF)?;
    if idx >= table.entries.len() {
        return Err(errno::EBADF);
    }
    close_entry(table.entries[idx].take(), volume)
}

fn read_console(flags: OpenFlags, buf: &mut [u8]) -> Result<usize, Errno> {
    let ops = console();
    if buf.is_empty() {
        return Ok(0);
    }
    if flags.contains(OpenFlags::NONBLOCK) {
        return match (ops.getch_now)() {
            Some(c) => {
                buf[0] = c;
                Ok(1)
            }
            None => Err(errno::EAGAIN),
        };
    }
    // Line mode: accumulate until newline or the buffer fills.
    let mut n = 0;
    loop {
        let mut c = (ops.getch)();
        if c == b'\r' {
            c = b'\n';
        }
        buf[n] = c;
        n += 1;
        if c == b'\n' || n == buf.len() {
            return Ok(n);
        }
    }
}

pub fn read(
    table: &mut FdTable,
    volume: &dyn FatVolume,
    fd: i32,
    buf: &mut [u8],
) -> Result<usize, Errno> {
    let entry = table.get(fd)?;
    match &entry.kind {
        FdKind::Console(StdStream::Stdin) => read_console(entry.local_flags, buf),
        FdKind::Console(_) => Err(errno::EBADF),
        FdKind::Pipe { id, read_end } => {
            if !*read_end {
                return Err(errno::EBADF);
            }
            let nonblock = entry.local_flags.contains(OpenFlags::NONBLOCK);
            pipe_read(*id, nonblock, buf)
        }
        FdKind::File(file) => {
            let mut f = file.borrow_mut();
            let n = volume
                .read(f.id, f.pos as u32, buf)
                .map_err(fat_to_errno)?;
            f.pos += n as u64;
            Ok(n)
        }
    }
}

pub fn write(
    table: &mut FdTable,
    volume: &dyn FatVolume,
    fd: i32,
    buf: &[u8],
) -> Result<usize, Errno> {
    let entry = table.get(fd)?;
    match &entry.kind {
        FdKind::Console(StdStream::Stdin) => Err(errno::EBADF),
        FdKind::Console(_) => {
            (console().write)(buf);
            Ok(buf.len())
        }
        FdKind::Pipe { id, read_end } => {
            if *read_end {
                return Err(errno::EBADF);
            }
            pipe_write(*id, buf)
        }
        FdKind::File(file) => {
            let mut f = file.borrow_mut();
            if f.status_flags.contains(OpenFlags::APPEND) {
                f.pos = volume.size(f.id).map_err(fat_to_errno)? as u64;
            }
            let n = volume
                .write(f.id, f.pos as u32, buf)
                .map_err(fat_to_errno)?;
            f.pos += n as u64;
            Ok(n)
        }
    }
}

pub fn lseek(
    table: &mut FdTable,
    volume: &dyn FatVolume,
    fd: i32,
    offset: i64,
    whence: i32,
) -> Result<i64, Errno> {
    let entry = table.get(fd)?;
    let FdKind::File(file) = &entry.kind else {
        return Err(errno::EINVAL);
    };
    let mut f = file.borrow_mut();
    let base: i64 = match whence {
        absfs::SEEK_SET => 0,
        absfs::SEEK_CUR => f.pos as i64,
        absfs::SEEK_END => volume.size(f.id).map_err(fat_to_errno)? as i64,
        _ => return Err(errno::EINVAL),
    };
    let target = base.checked_add(offset).ok_or(errno::EINVAL)?;
    if target < 0 {
        return Err(errno::EINVAL);
    }
    f.pos = target as u64;
    Ok(target)
}

pub fn dup(table: &mut FdTable, fd: i32) -> Result<i32, Errno> {
    dup_from(table, fd, 0)
}

fn dup_from(table: &mut FdTable, fd: i32, min: usize) -> Result<i32, Errno> {
    let mut entry = table.get(fd)?.clone();
    // POSIX: the duplicate does not inherit FD_CLOEXEC.
    entry.fd_flags &= !FD_CLOEXEC;
    let new = table.first_free(min)?;
    table.install(new, entry);
    Ok(new as i32)
}

pub fn dup2(
    table: &mut FdTable,
    volume: Option<&dyn FatVolume>,
    oldfd: i32,
    newfd: i32,
) -> Result<i32, Errno> {
    dup3(table, volume, oldfd, newfd, false)
}

pub fn dup3(
    table: &mut FdTable,
    volume: Option<&dyn FatVolume>,
    oldfd: i32,
    newfd: i32,
    cloexec: bool,
) -> Result<i32, Errno> {
    let new_idx = usize::try_from(newfd).map_err(|_| errno::EBADF)?;
    if new_idx >= FD_TABLE_MAX {
        return Err(errno::EBADF);
    }
    let mut entry = table.get(oldfd)?.clone();
    entry.fd_flags = if cloexec { FD_CLOEXEC } else { 0 };
    if oldfd == newfd {
        return if cloexec { Err(errno::EINVAL) } else { Ok(newfd) };
    }
    if new_idx < table.entries.len() {
        let _ = close_entry(table.entries[new_idx].take(), volume);
    }
    table.install(new_idx, entry);
    Ok(newfd)
}

pub fn fcntl(table: &mut FdTable, fd: i32, cmd: i32, arg: u32) -> Result<i32, Errno> {
    match cmd {
        absfs::F_DUPFD => dup_from(table, fd, arg as usize),
        absfs::F_GETFD => Ok(table.get(fd)?.fd_flags as i32),
        absfs::F_SETFD => {
            table.get_mut(fd)?.fd_flags = arg & FD_CLOEXEC;
            Ok(0)
        }
        absfs::F_GETFL => {
            let entry = table.get(fd)?;
            let flags = match &entry.kind {
                FdKind::File(f) => f.borrow().status_flags,
                _ => entry.local_flags,
            };
            Ok(flags.bits() as i32)
        }
        absfs::F_SETFL => {
            let settable = OpenFlags::APPEND | OpenFlags::NONBLOCK;
            let requested = OpenFlags::from_bits_truncate(arg) & settable;
            let entry = table.get_mut(fd)?;
            match &entry.kind {
                FdKind::File(f) => f.borrow_mut().status_flags = requested,
                _ => entry.local_flags = requested,
            }
            Ok(0)
        }
        _ => Err(errno::EINVAL),
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatBuf {
    pub mode: u32,
    pub size: u64,
    pub mtime: u64,
    pub nlink: u32,
}

/// `stat` on a fully-resolved (symlinks followed) absolute path.
pub fn stat_path(volume: &dyn FatVolume, abs_path: &str) -> Result<StatBuf, Errno> {
    if abs_path == "/" {
        return Ok(StatBuf {
            mode: S_IFDIR | 0o777,
            size: 0,
            mtime: 0,
            nlink: 1,
        });
    }
    let st = volume.stat(abs_path).map_err(fat_to_errno)?;
    let mode = if st.attr.contains(crate::fat::FatAttr::DIR) {
        S_IFDIR | 0o777
    } else {
        match extfs::lookup(abs_path) {
            Some(SidecarHit::Original { mode }) => mode,
            _ => S_IFREG | 0o777,
        }
    };
    Ok(StatBuf {
        mode,
        size: st.size as u64,
        mtime: fat_datetime_to_unix(st.date, st.time),
        nlink: 1,
    })
}

/// `lstat`: the final component is not followed, so a sidecar symlink
/// reports itself.
pub fn lstat_path(volume: &dyn FatVolume, abs_path: &str) -> Result<StatBuf, Errno> {
    if let Some(SidecarHit::Symlink { mode }) = extfs::lookup(abs_path) {
        let st = volume.stat(abs_path).map_err(fat_to_errno)?;
        // Body is the marker byte plus the target text.
        return Ok(StatBuf {
            mode,
            size: (st.size as u64).saturating_sub(1),
            mtime: fat_datetime_to_unix(st.date, st.time),
            nlink: 1,
        });
    }
    stat_path(volume, abs_path)
}

// ---------------------------------------------------------------------------
// Namespace operations
// ---------------------------------------------------------------------------

/// Remove a name. An `O` original with live hardlinks promotes the
/// first link: the FAT body is renamed onto the link's name and the
/// sidecar rewritten, so the content survives under the link path.
pub fn unlinkat(volume: &dyn FatVolume, abs_path: &str, flags: u32) -> Result<(), Errno> {
    let st = volume.stat(abs_path).map_err(fat_to_errno)?;
    let is_dir = st.attr.contains(crate::fat::FatAttr::DIR);
    if is_dir != (flags & absfs::AT_REMOVEDIR != 0) {
        return Err(if is_dir { errno::EISDIR } else { errno::ENOTDIR });
    }

    let outcome = extfs::unlink(volume, abs_path).map_err(fat_to_errno)?;
    match outcome.promoted {
        Some(promoted) => {
            // Drop the link's marker body, then move the content onto
            // the link's name.
            volume.unlink(&promoted).map_err(fat_to_errno)?;
            volume.rename(abs_path, &promoted).map_err(fat_to_errno)?;
            extfs::flush(volume).map_err(fat_to_errno)?;
            Ok(())
        }
        None => volume.unlink(abs_path).map_err(fat_to_errno),
    }
}

/// Create a symlink at `linkpath` (resolved, must not exist) pointing
/// at `target` (stored verbatim).
pub fn symlinkat(volume: &dyn FatVolume, target: &str, linkpath: &str) -> Result<(), Errno> {
    if stat_exists(volume, linkpath) {
        return Err(errno::EEXIST);
    }
    let id = volume
        .open(linkpath, open_mode::FA_CREATE_NEW | open_mode::FA_WRITE)
        .map_err(fat_to_errno)?;
    let mut body = alloc::vec![SIDECAR_SYMLINK];
    body.extend_from_slice(target.as_bytes());
    volume.write(id, 0, &body).map_err(fat_to_errno)?;
    volume.close(id).map_err(fat_to_errno)?;
    extfs::add_symlink(volume, linkpath).map_err(fat_to_errno)
}

/// Create a hardlink at `linkpath` to the resolved `existing` path.
pub fn linkat(volume: &dyn FatVolume, existing: &str, linkpath: &str) -> Result<(), Errno> {
    if !stat_exists(volume, existing) {
        return Err(errno::ENOENT);
    }
    if stat_exists(volume, linkpath) {
        return Err(errno::EEXIST);
    }
    let target_mode = match extfs::lookup(existing) {
        Some(SidecarHit::Original { mode }) => mode,
        Some(_) => return Err(errno::EINVAL),
        None => S_IFREG | 0o777,
    };
    let id = volume
        .open(linkpath, open_mode::FA_CREATE_NEW | open_mode::FA_WRITE)
        .map_err(fat_to_errno)?;
    let mut body = alloc::vec![SIDECAR_HARDLINK];
    body.extend_from_slice(existing.as_bytes());
    volume.write(id, 0, &body).map_err(fat_to_errno)?;
    volume.close(id).map_err(fat_to_errno)?;
    extfs::add_hardlink(volume, linkpath, existing, target_mode).map_err(fat_to_errno)
}

/// Read a symlink's target. `abs_path` must be resolved without
/// following the final component.
pub fn readlinkat(volume: &dyn FatVolume, abs_path: &str) -> Result<String, Errno> {
    if !extfs::is_symlink(abs_path) {
        return Err(errno::EINVAL);
    }
    let id = volume
        .open(abs_path, open_mode::FA_READ)
        .map_err(fat_to_errno)?;
    let size = volume.size(id).map_err(fat_to_errno)? as usize;
    let mut body = alloc::vec![0u8; size];
    let n = volume.read(id, 0, &mut body).map_err(fat_to_errno)?;
    volume.close(id).map_err(fat_to_errno)?;
    if n == 0 || body[0] != SIDECAR_SYMLINK {
        return Err(errno::EIO);
    }
    String::from_utf8(body[1..n].to_vec()).map_err(|_| errno::EIO)
}

pub fn mkdirat(volume: &dyn FatVolume, abs_path: &str, _mode: u32) -> Result<(), Errno> {
    volume.mkdir(abs_path).map_err(fat_to_errno)
}

pub fn renameat(volume: &dyn FatVolume, from: &str, to: &str) -> Result<(), Errno> {
    volume.rename(from, to).map_err(fat_to_errno)?;
    extfs::rename(volume, from, to).map_err(fat_to_errno)
}

/// Update (or create) the sidecar mode record for a path.
pub fn chmodat(volume: &dyn FatVolume, abs_path: &str, mode: u32) -> Result<(), Errno> {
    let st = stat_path(volume, abs_path)?;
    let new_mode = (st.mode & absfs::S_IFMT) | (mode & 0o7777);
    if st.mode & absfs::S_IFMT == S_IFDIR {
        // FAT directories carry no sidecar record.
        return Ok(());
    }
    extfs::add_original(volume, abs_path, new_mode).map_err(fat_to_errno)
}

pub fn access(volume: &dyn FatVolume, abs_path: &str) -> Result<(), Errno> {
    // Single-user system: existence is permission.
    stat_path(volume, abs_path).map(|_| ())
}

// ---------------------------------------------------------------------------
// Directory streams
// ---------------------------------------------------------------------------

pub struct DirStream {
    pub path: String,
    entries: Vec<FatDirEntry>,
    pos: usize,
}

#[derive(Default)]
pub struct DirTable {
    streams: Vec<Option<DirStream>>,
}

impl DirTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, volume: &dyn FatVolume, abs_path: &str) -> Result<i32, Errno> {
        let mut entries = Vec::new();
        volume
            .read_dir(abs_path, &mut |e| entries.push(e.clone()))
            .map_err(fat_to_errno)?;
        let stream = DirStream {
            path: abs_path.to_owned(),
            entries,
            pos: 0,
        };
        for (i, slot) in self.streams.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(stream);
                return Ok(i as i32);
            }
        }
        if self.streams.len() >= DIR_TABLE_MAX {
            return Err(errno::EMFILE);
        }
        self.streams.push(Some(stream));
        Ok((self.streams.len() - 1) as i32)
    }

    pub fn read(&mut self, dirfd: i32) -> Result<Option<FatDirEntry>, Errno> {
        let stream = usize::try_from(dirfd)
            .ok()
            .and_then(|i| self.streams.get_mut(i))
            .and_then(Option::as_mut)
            .ok_or(errno::EBADF)?;
        if stream.pos >= stream.entries.len() {
            return Ok(None);
        }
        let entry = stream.entries[stream.pos].clone();
        stream.pos += 1;
        Ok(Some(entry))
    }

    pub fn rewind(&mut self, dirfd: i32) -> Result<(), Errno> {
        let stream = usize::try_from(dirfd)
            .ok()
            .and_then(|i| self.streams.get_mut(i))
            .and_then(Option::as_mut)
            .ok_or(errno::EBADF)?;
        stream.pos = 0;
        Ok(())
    }

    pub fn close(&mut self, dirfd: i32) -> Result<(), Errno> {
        let slot = usize::try_from(dirfd)
            .ok()
            .and_then(|i| self.streams.get_mut(i))
            .ok_or(errno::EBADF)?;
        if slot.take().is_none() {
            return Err(errno::EBADF);
        }
        Ok(())
    }

    /// Directory name backing a dirfd, for `realpathat`.
    pub fn dirname(&self, dirfd: i32) -> Result<&str, Errno> {
        usize::try_from(dirfd)
            .ok()
            .and_then(|i| self.streams.get(i))
            .and_then(Option::as_ref)
            .map(|s| s.path.as_str())
            .ok_or(errno::EBADF)
    }
}

/// Sidecar-aware lookup closure for `realpathat`: hardlinks substitute
/// the target path, symlink bodies are read from the volume.
pub fn link_lookup<'a>(
    volume: &'a dyn FatVolume,
) -> impl FnMut(&str, bool) -> Option<crate::path::PathSub> + 'a {
    move |abs: &str, _is_final: bool| match extfs::lookup(abs) {
        Some(SidecarHit::Hardlink { target }) => Some(crate::path::PathSub::Hardlink(target)),
        Some(SidecarHit::Symlink { .. }) => readlinkat(volume, abs)
            .ok()
            .map(crate::path::PathSub::Symlink),
        _ => None,
    }
}
