//! Extended-attribute sidecar for the FAT volume.
//!
//! FAT has no POSIX permissions, symlinks or hardlinks. They are stored
//! in `/.extfs` as a header-less sequence of records:
//!
//! ```text
//! record := type:1 | hash:4 | name_len:2 | name:<name_len>
//!         | { if type in {O,S}: mode:4
//!             if type == H:    target_hash:4 | tgt_len:2 | tgt:<tgt_len> }
//! ```
//!
//! `hash` is FNV-1a of the normalized absolute path; integers are
//! little-endian. The table is loaded into RAM once per boot and the
//! file is rewritten from the in-memory table after every mutation, so
//! the file's byte layout is a pure function of the table.

use alloc::string::String;
use alloc::vec::Vec;

use rookos_abi::fs::{S_IFLNK, SIDECAR_HARDLINK, SIDECAR_ORIGINAL, SIDECAR_SYMLINK};
use rookos_lib::{SchedMutex, fnv1a32, klog_warn};

use crate::fat::{FatError, FatResult, FatVolume, open_mode};

pub const EXTFS_PATH: &str = "/.extfs";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// `O` and `S` records: POSIX mode bits.
    Mode(u32),
    /// `H` records: hash and absolute path of the link target.
    Hardlink { target_hash: u32, target: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SidecarRecord {
    pub rtype: u8,
    pub hash: u32,
    pub path: String,
    pub payload: Payload,
}

#[derive(Default)]
pub struct ExtfsTable {
    records: Vec<SidecarRecord>,
    loaded: bool,
}

static TABLE: SchedMutex<ExtfsTable> = SchedMutex::new(ExtfsTable {
    records: Vec::new(),
    loaded: false,
});

fn encode_record(out: &mut Vec<u8>, rec: &SidecarRecord) {
    out.push(rec.rtype);
    out.extend_from_slice(&rec.hash.to_le_bytes());
    out.extend_from_slice(&(rec.path.len() as u16).to_le_bytes());
    out.extend_from_slice(rec.path.as_bytes());
    match &rec.payload {
        Payload::Mode(mode) => out.extend_from_slice(&mode.to_le_bytes()),
        Payload::Hardlink { target_hash, target } => {
            out.extend_from_slice(&target_hash.to_le_bytes());
            out.extend_from_slice(&(target.len() as u16).to_le_bytes());
            out.extend_from_slice(target.as_bytes());
        }
    }
}

fn decode_records(data: &[u8]) -> Option<Vec<SidecarRecord>> {
    let mut records = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        if data.len() - pos < 7 {
            return None;
        }
        let rtype = data[pos];
        let hash = u32::from_le_bytes(data[pos + 1..pos + 5].try_into().ok()?);
        let name_len = u16::from_le_bytes(data[pos + 5..pos + 7].try_into().ok()?) as usize;
        pos += 7;
        if data.len() - pos < name_len {
            return None;
        }
        let path = String::from_utf8(data[pos..pos + name_len].to_vec()).ok()?;
        pos += name_len;

        let payload = match rtype {
            SIDECAR_ORIGINAL | SIDECAR_SYMLINK => {
                if data.len() - pos < 4 {
                    return None;
                }
                let mode = u32::from_le_bytes(data[pos..pos + 4].try_into().ok()?);
                pos += 4;
                Payload::Mode(mode)
            }
            SIDECAR_HARDLINK => {
                if data.len() - pos < 6 {
                    return None;
                }
                let target_hash = u32::from_le_bytes(data[pos..pos + 4].try_into().ok()?);
                let tgt_len =
                    u16::from_le_bytes(data[pos + 4..pos + 6].try_into().ok()?) as usize;
                pos += 6;
                if data.len() - pos < tgt_len {
                    return None;
                }
                let target = String::from_utf8(data[pos..pos + tgt_len].to_vec()).ok()?;
                pos += tgt_len;
                Payload::Hardlink { target_hash, target }
            }
            _ => return None,
        };
        records.push(SidecarRecord { rtype, hash, path, payload });
    }
    Some(records)
}

/// Serialize the whole table; exposed for the round-trip tests.
pub fn serialize(records: &[SidecarRecord]) -> Vec<u8> {
    let mut out = Vec::new();
    for rec in records {
        encode_record(&mut out, rec);
    }
    out
}

pub fn parse(data: &[u8]) -> Option<Vec<SidecarRecord>> {
    decode_records(data)
}

/// Load `/.extfs` into the in-memory table. Called on first FS access
/// each boot; a corrupt file is dropped and rebuilt empty.
pub fn load(volume: &dyn FatVolume) -> FatResult<()> {
    TABLE.with(|t| {
        if t.loaded {
            return Ok(());
        }
        t.records.clear();
        match volume.open(EXTFS_PATH, open_mode::FA_READ) {
            Ok(file) => {
                let size = volume.size(file)? as usize;
                let mut data = alloc::vec![0u8; size];
                let mut read = 0;
                while read < size {
                    let n = volume.read(file, read as u32, &mut data[read..])?;
                    if n == 0 {
                        break;
                    }
                    read += n;
                }
                volume.close(file)?;
                match decode_records(&data[..read]) {
                    Some(records) => t.records = records,
                    None => {
                        klog_warn!("extfs: corrupt sidecar, rebuilding empty");
                        t.records.clear();
                    }
                }
            }
            Err(FatError::NoFile) => {}
            Err(e) => return Err(e),
        }
        t.loaded = true;
        Ok(())
    })
}

/// Rewrite `/.extfs` from the in-memory table.
pub fn flush(volume: &dyn FatVolume) -> FatResult<()> {
    TABLE.with(|t| {
        let data = serialize(&t.records);
        let file = volume.open(EXTFS_PATH, open_mode::FA_CREATE_ALWAYS | open_mode::FA_WRITE)?;
        let mut written = 0;
        while written < data.len() {
            let n = volume.write(file, written as u32, &data[written..])?;
            if n == 0 {
                volume.close(file)?;
                return Err(FatError::DiskErr);
            }
            written += n;
        }
        volume.close(file)
    })
}

/// Drop the in-memory table (test hook; next `load` re-reads the file).
pub fn reset_for_tests() {
    TABLE.with(|t| {
        t.records.clear();
        t.loaded = false;
    });
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SidecarHit {
    Original { mode: u32 },
    Symlink { mode: u32 },
    Hardlink { target: String },
}

pub fn lookup(path: &str) -> Option<SidecarHit> {
    let hash = fnv1a32(path.as_bytes());
    TABLE.with(|t| {
        t.records
            .iter()
            .find(|r| r.hash == hash && r.path == path)
            .map(|r| match (&r.payload, r.rtype) {
                (Payload::Mode(mode), SIDECAR_SYMLINK) => SidecarHit::Symlink { mode: *mode },
                (Payload::Mode(mode), _) => SidecarHit::Original { mode: *mode },
                (Payload::Hardlink { target, .. }, _) => SidecarHit::Hardlink {
                    target: target.clone(),
                },
            })
    })
}

pub fn is_symlink(path: &str) -> bool {
    matches!(lookup(path), Some(SidecarHit::Symlink { .. }))
}

fn push_record(t: &mut ExtfsTable, rec: SidecarRecord) {
    t.records.push(rec);
}

/// Record a plain file's POSIX mode (`O` record). Replaces an existing
/// record for the same path.
pub fn add_original(volume: &dyn FatVolume, path: &str, mode: u32) -> FatResult<()> {
    let hash = fnv1a32(path.as_bytes());
    TABLE.with(|t| {
        t.records.retain(|r| !(r.hash == hash && r.path == path));
        push_record(
            t,
            SidecarRecord {
                rtype: SIDECAR_ORIGINAL,
                hash,
                path: path.into(),
                payload: Payload::Mode(mode),
            },
        );
    });
    flush(volume)
}

pub fn add_symlink(volume: &dyn FatVolume, path: &str) -> FatResult<()> {
    let hash = fnv1a32(path.as_bytes());
    TABLE.with(|t| {
        push_record(
            t,
            SidecarRecord {
                rtype: SIDECAR_SYMLINK,
                hash,
                path: path.into(),
                payload: Payload::Mode(S_IFLNK | 0o777),
            },
        );
    });
    flush(volume)
}

/// Record a hardlink `path → target`. Ensures the target has an `O`
/// record first (created with the given mode when absent); a target
/// that is itself a link is rejected.
pub fn add_hardlink(
    volume: &dyn FatVolume,
    path: &str,
    target: &str,
    target_mode: u32,
) -> FatResult<()> {
    let target_hash = fnv1a32(target.as_bytes());
    let hash = fnv1a32(path.as_bytes());
    let need_orig = TABLE.with(|t| {
        match t
            .records
            .iter()
            .find(|r| r.hash == target_hash && r.path == target)
        {
            Some(r) if r.rtype != SIDECAR_ORIGINAL => Err(FatError::Exist),
            Some(_) => Ok(false),
            None => Ok(true),
        }
    })?;
    TABLE.with(|t| {
        if need_orig {
            push_record(
                t,
                SidecarRecord {
                    rtype: SIDECAR_ORIGINAL,
                    hash: target_hash,
                    path: target.into(),
                    payload: Payload::Mode(target_mode),
                },
            );
        }
        push_record(
            t,
            SidecarRecord {
                rtype: SIDECAR_HARDLINK,
                hash,
                path: path.into(),
                payload: Payload::Hardlink {
                    target_hash,
                    target: target.into(),
                },
            },
        );
    });
    flush(volume)
}

/// Outcome of removing a path from the sidecar.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct UnlinkOutcome {
    /// Record type removed, if a record existed.
    pub removed: Option<u8>,
    /// Mode of the removed `O` record.
    pub mode: u32,
    /// When an `O` original with live hardlinks was removed: the link
    /// path promoted to be the new original. The caller must rename the
    /// FAT file body onto this path.
    pub promoted: Option<String>,
}

/// Remove `path` from the table, promoting the first hardlink when an
/// original with live links goes away. The caller flushes after the
/// accompanying FAT operations succeed.
pub fn unlink(volume: &dyn FatVolume, path: &str) -> FatResult<UnlinkOutcome> {
    let hash = fnv1a32(path.as_bytes());
    let outcome = TABLE.with(|t| {
        let Some(idx) = t
            .records
            .iter()
            .position(|r| r.hash == hash && r.path == path)
        else {
            return UnlinkOutcome::default();
        };
        let removed = t.records.remove(idx);
        let mut outcome = UnlinkOutcome {
            removed: Some(removed.rtype),
            mode: match removed.payload {
                Payload::Mode(m) => m,
                Payload::Hardlink { .. } => 0,
            },
            promoted: None,
        };
        if removed.rtype != SIDECAR_ORIGINAL {
            return outcome;
        }
        // Promote the first hardlink that pointed at the dead original.
        let promoted_idx = t.records.iter().position(|r| {
            r.rtype == SIDECAR_HARDLINK
                && matches!(&r.payload, Payload::Hardlink { target_hash, target }
                    if *target_hash == hash && target == path)
        });
        let Some(pidx) = promoted_idx else {
            return outcome;
        };
        let new_orig_path = t.records[pidx].path.clone();
        let new_orig_hash = t.records[pidx].hash;
        t.records[pidx].rtype = SIDECAR_ORIGINAL;
        t.records[pidx].payload = Payload::Mode(outcome.mode);
        // Re-aim every remaining hardlink at the promoted path.
        for rec in t.records.iter_mut() {
            if rec.rtype != SIDECAR_HARDLINK {
                continue;
            }
            if let Payload::Hardlink { target_hash, target } = &mut rec.payload {
                if *target_hash == hash && target.as_str() == path {
                    *target_hash = new_orig_hash;
                    *target = new_orig_path.clone();
                }
            }
        }
        outcome.promoted = Some(new_orig_path);
        outcome
    });
    if outcome.removed.is_some() {
        flush(volume)?;
    }
    Ok(outcome)
}

/// Rename bookkeeping: move records from `from` to `to` and re-aim
/// hardlinks whose target was `from`.
pub fn rename(volume: &dyn FatVolume, from: &str, to: &str) -> FatResult<()> {
    let from_hash = fnv1a32(from.as_bytes());
    let to_hash = fnv1a32(to.as_bytes());
    let changed = TABLE.with(|t| {
        let mut changed = false;
        for rec in t.records.iter_mut() {
            if rec.hash == from_hash && rec.path == from {
                rec.hash = to_hash;
                rec.path = to.into();
                changed = true;
            }
            if let Payload::Hardlink { target_hash, target } = &mut rec.payload {
                if *target_hash == from_hash && target.as_str() == from {
                    *target_hash = to_hash;
                    *target = to.into();
                    changed = true;
                }
            }
        }
        changed
    });
    if changed {
        flush(volume)?;
    }
    Ok(())
}

pub fn record_count() -> usize {
    TABLE.with(|t| t.records.len())
}

pub fn records_snapshot() -> Vec<SidecarRecord> {
    TABLE.with(|t| t.records.clone())
}
