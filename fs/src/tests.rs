use core::ffi::c_int;

use alloc::borrow::ToOwned;
use alloc::string::String;

use rookos_abi::errno;
use rookos_abi::fs::{AT_REMOVEDIR, OpenFlags, S_IFLNK, S_IFMT, S_IFREG, SIDECAR_ORIGINAL};
use rookos_lib::define_test_suite;

use crate::extfs;
use crate::fat::{FatVolume, open_mode};
use crate::fileio::{self, FdTable};
use crate::path::{PathSub, realpathat};
use crate::ramfat::RamFat;

fn fresh_volume() -> RamFat {
    extfs::reset_for_tests();
    RamFat::new()
}

fn write_file(vol: &dyn FatVolume, path: &str, data: &[u8]) -> bool {
    let Ok(id) = vol.open(path, open_mode::FA_CREATE_ALWAYS | open_mode::FA_WRITE) else {
        return false;
    };
    let ok = vol.write(id, 0, data).is_ok();
    vol.close(id).is_ok() && ok
}

fn read_file(vol: &dyn FatVolume, path: &str) -> Option<alloc::vec::Vec<u8>> {
    let id = vol.open(path, open_mode::FA_READ).ok()?;
    let size = vol.size(id).ok()? as usize;
    let mut buf = alloc::vec![0u8; size];
    let n = vol.read(id, 0, &mut buf).ok()?;
    vol.close(id).ok()?;
    buf.truncate(n);
    Some(buf)
}

// ---------------------------------------------------------------------------
// Sidecar
// ---------------------------------------------------------------------------

pub fn test_extfs_roundtrip_byte_identical() -> c_int {
    let vol = fresh_volume();
    if extfs::load(&vol).is_err() {
        return -1;
    }
    if !write_file(&vol, "/a.txt", b"hello") || !write_file(&vol, "/b.txt", b"there") {
        return -1;
    }
    if extfs::add_original(&vol, "/a.txt", S_IFREG | 0o644).is_err() {
        return -1;
    }
    if extfs::add_hardlink(&vol, "/b.lnk", "/b.txt", S_IFREG | 0o600).is_err() {
        return -1;
    }
    if extfs::add_symlink(&vol, "/c.sym").is_err() {
        return -1;
    }

    // Loading the file, mutating zero records and flushing must
    // reproduce byte-identical content.
    let before = match read_file(&vol, "/.extfs") {
        Some(d) => d,
        None => return -1,
    };
    let parsed = match extfs::parse(&before) {
        Some(p) => p,
        None => return -1,
    };
    if extfs::serialize(&parsed) != before {
        return -1;
    }

    extfs::reset_for_tests();
    if extfs::load(&vol).is_err() || extfs::flush(&vol).is_err() {
        return -1;
    }
    let after = match read_file(&vol, "/.extfs") {
        Some(d) => d,
        None => return -1,
    };
    if before != after {
        return -1;
    }
    0
}

pub fn test_extfs_unlink_promotes_hardlink() -> c_int {
    let vol = fresh_volume();
    if extfs::load(&vol).is_err() {
        return -1;
    }
    if !write_file(&vol, "/data", b"payload") {
        return -1;
    }
    if extfs::add_original(&vol, "/data", S_IFREG | 0o640).is_err() {
        return -1;
    }
    if fileio::linkat(&vol, "/data", "/alias").is_err() {
        return -1;
    }
    if fileio::linkat(&vol, "/data", "/alias2").is_err() {
        return -1;
    }

    if fileio::unlinkat(&vol, "/data", 0).is_err() {
        return -1;
    }

    // The first link was promoted: content now lives under /alias with
    // the original's mode, and /alias2 points at /alias.
    if read_file(&vol, "/alias").as_deref() != Some(b"payload".as_ref()) {
        return -1;
    }
    match extfs::lookup("/alias") {
        Some(extfs::SidecarHit::Original { mode }) if mode == S_IFREG | 0o640 => {}
        _ => return -1,
    }
    match extfs::lookup("/alias2") {
        Some(extfs::SidecarHit::Hardlink { target }) if target == "/alias" => {}
        _ => return -1,
    }
    if vol.stat("/data").is_ok() {
        return -1;
    }
    0
}

pub fn test_symlink_roundtrip() -> c_int {
    let vol = fresh_volume();
    if extfs::load(&vol).is_err() {
        return -1;
    }
    if !write_file(&vol, "/real", b"content!") {
        return -1;
    }
    if extfs::add_original(&vol, "/real", S_IFREG | 0o644).is_err() {
        return -1;
    }
    if fileio::symlinkat(&vol, "/real", "/lnk").is_err() {
        return -1;
    }

    // stat with follow resolves to /real's attributes.
    let mut lookup = fileio::link_lookup(&vol);
    let followed = match realpathat("/", "/lnk", true, &mut lookup) {
        Ok(p) => p,
        Err(_) => return -1,
    };
    drop(lookup);
    if followed != "/real" {
        return -1;
    }
    let st = match fileio::stat_path(&vol, &followed) {
        Ok(st) => st,
        Err(_) => return -1,
    };
    if st.mode != S_IFREG | 0o644 || st.size != 8 {
        return -1;
    }

    // lstat reports the link itself with the body's length.
    let lst = match fileio::lstat_path(&vol, "/lnk") {
        Ok(st) => st,
        Err(_) => return -1,
    };
    if lst.mode & S_IFMT != S_IFLNK || lst.size != "/real".len() as u64 {
        return -1;
    }

    // Deleting the target makes follow-opens fail with ENOENT.
    if fileio::unlinkat(&vol, "/real", 0).is_err() {
        return -1;
    }
    let mut lookup = fileio::link_lookup(&vol);
    let resolved = realpathat("/", "/lnk", true, &mut lookup);
    drop(lookup);
    let Ok(resolved) = resolved else { return -1 };
    if fileio::stat_path(&vol, &resolved) != Err(errno::ENOENT) {
        return -1;
    }
    0
}

// ---------------------------------------------------------------------------
// Path resolution
// ---------------------------------------------------------------------------

pub fn test_realpath_dot_and_dotdot() -> c_int {
    let mut none = |_: &str, _: bool| -> Option<PathSub> { None };
    if realpathat("/usr/local", "../bin/./tool", true, &mut none) != Ok("/usr/bin/tool".to_owned())
    {
        return -1;
    }
    if realpathat("/", "..", true, &mut none) != Ok("/".to_owned()) {
        return -1;
    }
    if realpathat("/a", "/x/y/z", true, &mut none) != Ok("/x/y/z".to_owned()) {
        return -1;
    }
    0
}

pub fn test_realpath_symlink_loop_limit() -> c_int {
    // /loop -> /loop: must terminate with ELOOP.
    let mut looping = |abs: &str, _final: bool| -> Option<PathSub> {
        if abs == "/loop" {
            Some(PathSub::Symlink("/loop".to_owned()))
        } else {
            None
        }
    };
    match realpathat("/", "/loop", true, &mut looping) {
        Err(e) if e == errno::ELOOP => 0,
        _ => -1,
    }
}

pub fn test_realpath_hardlink_restart() -> c_int {
    // /dir is a hardlink to /other; /dir/file resolves under /other.
    let mut lookup = |abs: &str, _final: bool| -> Option<PathSub> {
        if abs == "/dir" {
            Some(PathSub::Hardlink("/other".to_owned()))
        } else {
            None
        }
    };
    if realpathat("/", "/dir/file", true, &mut lookup) != Ok("/other/file".to_owned()) {
        return -1;
    }
    0
}

pub fn test_realpath_relative_symlink() -> c_int {
    // /a/b -> "c" resolves to /a/c.
    let mut lookup = |abs: &str, _final: bool| -> Option<PathSub> {
        if abs == "/a/b" {
            Some(PathSub::Symlink("c".to_owned()))
        } else {
            None
        }
    };
    if realpathat("/", "/a/b", true, &mut lookup) != Ok("/a/c".to_owned()) {
        return -1;
    }
    0
}

pub fn test_realpath_nofollow_final() -> c_int {
    let mut lookup = |abs: &str, _final: bool| -> Option<PathSub> {
        if abs == "/lnk" {
            Some(PathSub::Symlink("/real".to_owned()))
        } else {
            None
        }
    };
    if realpathat("/", "/lnk", false, &mut lookup) != Ok("/lnk".to_owned()) {
        return -1;
    }
    0
}

pub fn test_realpath_path_too_long() -> c_int {
    let mut none = |_: &str, _: bool| -> Option<PathSub> { None };
    let long = {
        let mut s = String::from("/");
        for _ in 0..80 {
            s.push_str("abcdefgh/");
        }
        s
    };
    match realpathat("/", &long, true, &mut none) {
        Err(e) if e == errno::ENAMETOOLONG => 0,
        _ => -1,
    }
}

// ---------------------------------------------------------------------------
// Descriptor table
// ---------------------------------------------------------------------------

pub fn test_fd_open_close_reuses_hole() -> c_int {
    let vol = fresh_volume();
    if !write_file(&vol, "/f", b"x") {
        return -1;
    }
    let mut table = FdTable::with_std();
    let len_before = {
        let fd = match fileio::openat(&mut table, &vol, "/f", rookos_abi::fs::O_RDONLY, 0, 0o22)
        {
            Ok(fd) => fd,
            Err(_) => return -1,
        };
        if fd != 3 {
            return -1;
        }
        let len = table.len();
        if fileio::close(&mut table, Some(&vol), fd).is_err() {
            return -1;
        }
        len
    };
    // Reopening reuses the hole: table length unchanged.
    let fd = match fileio::openat(&mut table, &vol, "/f", rookos_abi::fs::O_RDONLY, 0, 0o22) {
        Ok(fd) => fd,
        Err(_) => return -1,
    };
    if fd != 3 || table.len() != len_before {
        return -1;
    }
    0
}

pub fn test_fd_dup_shares_offset_and_refcount() -> c_int {
    let vol = fresh_volume();
    if !write_file(&vol, "/f", b"abcdef") {
        return -1;
    }
    let mut table = FdTable::with_std();
    let fd = match fileio::openat(&mut table, &vol, "/f", rookos_abi::fs::O_RDONLY, 0, 0o22) {
        Ok(fd) => fd,
        Err(_) => return -1,
    };
    let refs_before = table.file_refs(fd).unwrap_or(0);
    let dup = match fileio::dup(&mut table, fd) {
        Ok(d) => d,
        Err(_) => return -1,
    };
    if table.file_refs(fd) != Ok(refs_before + 1) {
        return -1;
    }

    // Shared position: read via fd advances dup's view too.
    let mut buf = [0u8; 3];
    if fileio::read(&mut table, &vol, fd, &mut buf) != Ok(3) || &buf != b"abc" {
        return -1;
    }
    if fileio::read(&mut table, &vol, dup, &mut buf) != Ok(3) || &buf != b"def" {
        return -1;
    }

    // dup + close restores the ref count.
    if fileio::close(&mut table, Some(&vol), dup).is_err() {
        return -1;
    }
    if table.file_refs(fd) != Ok(refs_before) {
        return -1;
    }
    0
}

pub fn test_fd_cloexec_inheritance() -> c_int {
    let vol = fresh_volume();
    if !write_file(&vol, "/keep", b"k") || !write_file(&vol, "/drop", b"d") {
        return -1;
    }
    let mut table = FdTable::with_std();
    let keep = fileio::openat(&mut table, &vol, "/keep", rookos_abi::fs::O_RDONLY, 0, 0o22);
    let drop_fd = fileio::openat(
        &mut table,
        &vol,
        "/drop",
        rookos_abi::fs::O_RDONLY | OpenFlags::CLOEXEC,
        0,
        0o22,
    );
    let (Ok(keep), Ok(drop_fd)) = (keep, drop_fd) else {
        return -1;
    };

    let child = table.clone_for_spawn();
    // Inherited entry shares the file object; CLOEXEC entry is a hole.
    if child.path_of(keep) != Ok("/keep".to_owned()) {
        return -1;
    }
    if child.path_of(drop_fd).is_ok() {
        return -1;
    }
    if table.file_refs(keep) != Ok(2) {
        return -1;
    }
    0
}

pub fn test_open_truth_table() -> c_int {
    let vol = fresh_volume();
    let mut table = FdTable::with_std();
    if !write_file(&vol, "/exists", b"12345") {
        return -1;
    }

    // O_CREAT|O_EXCL on an existing file fails.
    let flags = OpenFlags::CREAT | OpenFlags::EXCL | OpenFlags::WRONLY;
    if fileio::openat(&mut table, &vol, "/exists", flags, 0o644, 0o22) != Err(errno::EEXIST) {
        return -1;
    }
    // Plain open of a missing file fails.
    if fileio::openat(&mut table, &vol, "/missing", rookos_abi::fs::O_RDONLY, 0, 0o22)
        != Err(errno::ENOENT)
    {
        return -1;
    }
    // O_TRUNC empties the file.
    let flags = OpenFlags::WRONLY | OpenFlags::TRUNC;
    let fd = match fileio::openat(&mut table, &vol, "/exists", flags, 0, 0o22) {
        Ok(fd) => fd,
        Err(_) => return -1,
    };
    if vol.stat("/exists").map(|s| s.size) != Ok(0) {
        return -1;
    }
    if fileio::close(&mut table, Some(&vol), fd).is_err() {
        return -1;
    }
    // O_CREAT applies the umask to the recorded mode.
    let flags = OpenFlags::CREAT | OpenFlags::WRONLY;
    if fileio::openat(&mut table, &vol, "/fresh", flags, 0o666, 0o22).is_err() {
        return -1;
    }
    match extfs::lookup("/fresh") {
        Some(extfs::SidecarHit::Original { mode }) if mode == S_IFREG | 0o644 => {}
        _ => return -1,
    }
    0
}

pub fn test_append_and_seek() -> c_int {
    let vol = fresh_volume();
    let mut table = FdTable::with_std();
    if !write_file(&vol, "/log", b"one") {
        return -1;
    }
    let flags = OpenFlags::WRONLY | OpenFlags::APPEND;
    let fd = match fileio::openat(&mut table, &vol, "/log", flags, 0, 0o22) {
        Ok(fd) => fd,
        Err(_) => return -1,
    };
    if fileio::write(&mut table, &vol, fd, b"two") != Ok(3) {
        return -1;
    }
    if read_file(&vol, "/log").as_deref() != Some(b"onetwo".as_ref()) {
        return -1;
    }
    if fileio::lseek(&mut table, &vol, fd, -2, rookos_abi::fs::SEEK_END) != Ok(4) {
        return -1;
    }
    0
}

pub fn test_unlinkat_dir_flag() -> c_int {
    let vol = fresh_volume();
    if vol.mkdir("/d").is_err() || !write_file(&vol, "/f", b"x") {
        return -1;
    }
    if fileio::unlinkat(&vol, "/d", 0) != Err(errno::EISDIR) {
        return -1;
    }
    if fileio::unlinkat(&vol, "/f", AT_REMOVEDIR) != Err(errno::ENOTDIR) {
        return -1;
    }
    if fileio::unlinkat(&vol, "/d", AT_REMOVEDIR).is_err() {
        return -1;
    }
    0
}

// ---------------------------------------------------------------------------
// Pipes
// ---------------------------------------------------------------------------

pub fn test_pipe_roundtrip_and_eof() -> c_int {
    let vol = fresh_volume();
    let mut table = FdTable::with_std();
    let (read_fd, write_fd) = match fileio::pipe(&mut table) {
        Ok(ends) => ends,
        Err(_) => return -1,
    };

    if fileio::write(&mut table, &vol, write_fd, b"hello") != Ok(5) {
        return -1;
    }
    let mut buf = [0u8; 3];
    if fileio::read(&mut table, &vol, read_fd, &mut buf) != Ok(3) || &buf != b"hel" {
        return -1;
    }

    // A duplicated write end keeps the pipe open until the last one
    // closes.
    let dup_w = match fileio::dup(&mut table, write_fd) {
        Ok(fd) => fd,
        Err(_) => return -1,
    };
    if fileio::close(&mut table, Some(&vol), write_fd).is_err() {
        return -1;
    }
    if fileio::write(&mut table, &vol, dup_w, b"!!") != Ok(2) {
        return -1;
    }
    if fileio::close(&mut table, Some(&vol), dup_w).is_err() {
        return -1;
    }

    // Buffered data drains first, then end-of-file.
    let mut rest = [0u8; 8];
    if fileio::read(&mut table, &vol, read_fd, &mut rest) != Ok(4) || &rest[..4] != b"lo!!" {
        return -1;
    }
    if fileio::read(&mut table, &vol, read_fd, &mut rest) != Ok(0) {
        return -1;
    }
    if fileio::close(&mut table, Some(&vol), read_fd).is_err() {
        return -1;
    }
    0
}

pub fn test_pipe_ends_are_directional() -> c_int {
    let vol = fresh_volume();
    let mut table = FdTable::with_std();
    let (read_fd, write_fd) = match fileio::pipe(&mut table) {
        Ok(ends) => ends,
        Err(_) => return -1,
    };
    let mut buf = [0u8; 4];
    if fileio::read(&mut table, &vol, write_fd, &mut buf) != Err(errno::EBADF) {
        return -1;
    }
    if fileio::write(&mut table, &vol, read_fd, b"x") != Err(errno::EBADF) {
        return -1;
    }
    let _ = fileio::close(&mut table, Some(&vol), read_fd);
    let _ = fileio::close(&mut table, Some(&vol), write_fd);
    0
}

pub fn test_pipe_write_without_reader() -> c_int {
    let vol = fresh_volume();
    let mut table = FdTable::with_std();
    let (read_fd, write_fd) = match fileio::pipe(&mut table) {
        Ok(ends) => ends,
        Err(_) => return -1,
    };
    if fileio::close(&mut table, Some(&vol), read_fd).is_err() {
        return -1;
    }
    if fileio::write(&mut table, &vol, write_fd, b"data") != Err(errno::EPIPE) {
        return -1;
    }
    if fileio::close(&mut table, Some(&vol), write_fd).is_err() {
        return -1;
    }
    0
}

pub fn test_sidecar_record_types() -> c_int {
    let vol = fresh_volume();
    if extfs::load(&vol).is_err() {
        return -1;
    }
    if !write_file(&vol, "/t", b"x") {
        return -1;
    }
    if extfs::add_original(&vol, "/t", S_IFREG | 0o755).is_err() {
        return -1;
    }
    let records = extfs::records_snapshot();
    if records.len() != 1 || records[0].rtype != SIDECAR_ORIGINAL {
        return -1;
    }
    if records[0].hash != rookos_lib::fnv1a32(b"/t") {
        return -1;
    }
    0
}

define_test_suite!(
    fs,
    [
        test_extfs_roundtrip_byte_identical,
        test_extfs_unlink_promotes_hardlink,
        test_symlink_roundtrip,
        test_realpath_dot_and_dotdot,
        test_realpath_symlink_loop_limit,
        test_realpath_hardlink_restart,
        test_realpath_relative_symlink,
        test_realpath_nofollow_final,
        test_realpath_path_too_long,
        test_fd_open_close_reuses_hole,
        test_fd_dup_shares_offset_and_refcount,
        test_fd_cloexec_inheritance,
        test_open_truth_table,
        test_append_and_seek,
        test_unlinkat_dir_flag,
        test_pipe_roundtrip_and_eof,
        test_pipe_ends_are_directional,
        test_pipe_write_without_reader,
        test_sidecar_record_types,
    ]
);
