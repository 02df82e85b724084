//! RAM-backed volume implementing the FAT driver surface.
//!
//! Serves as the boot ramdisk when no SD card is present and as the
//! volume the filesystem tests run against. Paths are stored normalized
//! (absolute, `/`-separated, no trailing slash).

use alloc::borrow::ToOwned;
use alloc::string::String;
use alloc::vec::Vec;

use rookos_lib::SchedMutex;

use crate::fat::{
    FatAttr, FatDirEntry, FatError, FatResult, FatStat, FatVolume, FileId, open_mode,
};

#[derive(Clone)]
struct Node {
    path: String,
    attr: FatAttr,
    data: Vec<u8>,
}

struct OpenNode {
    node: usize,
    writable: bool,
}

struct RamState {
    nodes: Vec<Node>,
    handles: Vec<Option<OpenNode>>,
}

pub struct RamFat {
    state: SchedMutex<RamState>,
}

fn normalize(path: &str) -> String {
    let mut out = String::from("/");
    for comp in path.split('/') {
        if comp.is_empty() || comp == "." {
            continue;
        }
        if !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(comp);
    }
    out
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => "/",
    }
}

impl RamFat {
    pub fn new() -> Self {
        Self {
            state: SchedMutex::new(RamState {
                nodes: alloc::vec![Node {
                    path: "/".to_owned(),
                    attr: FatAttr::DIR,
                    data: Vec::new(),
                }],
                handles: Vec::new(),
            }),
        }
    }
}

impl Default for RamFat {
    fn default() -> Self {
        Self::new()
    }
}

impl RamState {
    fn find(&self, path: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.path == path)
    }

    fn create_file(&mut self, path: &str) -> FatResult<usize> {
        if self.find(parent_of(path)).is_none_or(|i| !self.nodes[i].attr.contains(FatAttr::DIR)) {
            return Err(FatError::NoPath);
        }
        self.nodes.push(Node {
            path: path.to_owned(),
            attr: FatAttr::ARC,
            data: Vec::new(),
        });
        Ok(self.nodes.len() - 1)
    }
}

impl FatVolume for RamFat {
    fn open(&self, path: &str, mode: u8) -> FatResult<FileId> {
        let path = normalize(path);
        self.state.with(|s| {
            let existing = s.find(&path);
            let node = match existing {
                Some(idx) => {
                    if s.nodes[idx].attr.contains(FatAttr::DIR) {
                        return Err(FatError::Denied);
                    }
                    if mode & open_mode::FA_CREATE_NEW != 0 {
                        return Err(FatError::Exist);
                    }
                    if mode & open_mode::FA_CREATE_ALWAYS != 0 {
                        s.nodes[idx].data.clear();
                    }
                    idx
                }
                None => {
                    if mode
                        & (open_mode::FA_CREATE_NEW
                            | open_mode::FA_CREATE_ALWAYS
                            | open_mode::FA_OPEN_ALWAYS)
                        == 0
                    {
                        return Err(FatError::NoFile);
                    }
                    s.create_file(&path)?
                }
            };

            let open = OpenNode {
                node,
                writable: mode & open_mode::FA_WRITE != 0,
            };
            let slot = s.handles.iter().position(Option::is_none);
            let id = match slot {
                Some(i) => {
                    s.handles[i] = Some(open);
                    i
                }
                None => {
                    s.handles.push(Some(open));
                    s.handles.len() - 1
                }
            };
            Ok(id as FileId)
        })
    }

    fn close(&self, file: FileId) -> FatResult<()> {
        self.state.with(|s| {
            let slot = s
                .handles
                .get_mut(file as usize)
                .ok_or(FatError::InvalidObject)?;
            if slot.take().is_none() {
                return Err(FatError::InvalidObject);
            }
            Ok(())
        })
    }

    fn read(&self, file: FileId, pos: u32, buf: &mut [u8]) -> FatResult<usize> {
        self.state.with(|s| {
            let open = s
                .handles
                .get(file as usize)
                .and_then(Option::as_ref)
                .ok_or(FatError::InvalidObject)?;
            let data = &s.nodes[open.node].data;
            let pos = pos as usize;
            if pos >= data.len() {
                return Ok(0);
            }
            let n = buf.len().min(data.len() - pos);
            buf[..n].copy_from_slice(&data[pos..pos + n]);
            Ok(n)
        })
    }

    fn write(&self, file: FileId, pos: u32, buf: &[u8]) -> FatResult<usize> {
        self.state.with(|s| {
            let open = s
                .handles
                .get(file as usize)
                .and_then(Option::as_ref)
                .ok_or(FatError::InvalidObject)?;
            if !open.writable {
                return Err(FatError::Denied);
            }
            let node = open.node;
            let pos = pos as usize;
            let data = &mut s.nodes[node].data;
            if pos + buf.len() > data.len() {
                data.resize(pos + buf.len(), 0);
            }
            data[pos..pos + buf.len()].copy_from_slice(buf);
            Ok(buf.len())
        })
    }

    fn truncate(&self, file: FileId, len: u32) -> FatResult<()> {
        self.state.with(|s| {
            let open = s
                .handles
                .get(file as usize)
                .and_then(Option::as_ref)
                .ok_or(FatError::InvalidObject)?;
            if !open.writable {
                return Err(FatError::Denied);
            }
            let node = open.node;
            s.nodes[node].data.truncate(len as usize);
            Ok(())
        })
    }

    fn size(&self, file: FileId) -> FatResult<u32> {
        self.state.with(|s| {
            let open = s
                .handles
                .get(file as usize)
                .and_then(Option::as_ref)
                .ok_or(FatError::InvalidObject)?;
            Ok(s.nodes[open.node].data.len() as u32)
        })
    }

    fn sync(&self, _file: FileId) -> FatResult<()> {
        Ok(())
    }

    fn stat(&self, path: &str) -> FatResult<FatStat> {
        let path = normalize(path);
        self.state.with(|s| {
            let idx = s.find(&path).ok_or(FatError::NoFile)?;
            let node = &s.nodes[idx];
            Ok(FatStat {
                size: node.data.len() as u32,
                attr: node.attr,
                date: 0,
                time: 0,
            })
        })
    }

    fn read_dir(&self, path: &str, cb: &mut dyn FnMut(&FatDirEntry)) -> FatResult<()> {
        let path = normalize(path);
        self.state.with(|s| {
            let idx = s.find(&path).ok_or(FatError::NoPath)?;
            if !s.nodes[idx].attr.contains(FatAttr::DIR) {
                return Err(FatError::NoPath);
            }
            for node in &s.nodes {
                if node.path == "/" || parent_of(&node.path) != path {
                    continue;
                }
                let name = node.path.rsplit('/').next().unwrap_or("");
                cb(&FatDirEntry {
                    name: name.to_owned(),
                    size: node.data.len() as u32,
                    attr: node.attr,
                });
            }
            Ok(())
        })
    }

    fn mkdir(&self, path: &str) -> FatResult<()> {
        let path = normalize(path);
        self.state.with(|s| {
            if s.find(&path).is_some() {
                return Err(FatError::Exist);
            }
            if s.find(parent_of(&path))
                .is_none_or(|i| !s.nodes[i].attr.contains(FatAttr::DIR))
            {
                return Err(FatError::NoPath);
            }
            s.nodes.push(Node {
                path,
                attr: FatAttr::DIR,
                data: Vec::new(),
            });
            Ok(())
        })
    }

    fn unlink(&self, path: &str) -> FatResult<()> {
        let path = normalize(path);
        self.state.with(|s| {
            let idx = s.find(&path).ok_or(FatError::NoFile)?;
            if s.nodes[idx].attr.contains(FatAttr::DIR) {
                let mut prefix = path.clone();
                prefix.push('/');
                if s.nodes.iter().any(|n| n.path.starts_with(prefix.as_str())) {
                    return Err(FatError::Denied);
                }
            }
            // Refuse removal while a handle is open on it.
            if s.handles
                .iter()
                .flatten()
                .any(|open| open.node == idx)
            {
                return Err(FatError::Locked);
            }
            s.nodes.remove(idx);
            for open in s.handles.iter_mut().flatten() {
                if open.node > idx {
                    open.node -= 1;
                }
            }
            Ok(())
        })
    }

    fn rename(&self, from: &str, to: &str) -> FatResult<()> {
        let from = normalize(from);
        let to = normalize(to);
        self.state.with(|s| {
            if s.find(&to).is_some() {
                return Err(FatError::Exist);
            }
            let idx = s.find(&from).ok_or(FatError::NoFile)?;
            if s.find(parent_of(&to))
                .is_none_or(|i| !s.nodes[i].attr.contains(FatAttr::DIR))
            {
                return Err(FatError::NoPath);
            }
            let was_dir = s.nodes[idx].attr.contains(FatAttr::DIR);
            let old_prefix = {
                let mut p = from.clone();
                p.push('/');
                p
            };
            s.nodes[idx].path = to.clone();
            if was_dir {
                for node in s.nodes.iter_mut() {
                    if node.path.starts_with(old_prefix.as_str()) {
                        let rest = node.path[old_prefix.len()..].to_owned();
                        let mut np = to.clone();
                        np.push('/');
                        np.push_str(&rest);
                        node.path = np;
                    }
                }
            }
            Ok(())
        })
    }
}
