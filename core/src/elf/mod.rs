//! Relocatable ELF loader.
//!
//! Applications ship as ELF32 relocatable objects for Thumb-2. Loading
//! is demand-driven: the well-known entry symbols are resolved first,
//! and each one pulls in its section; relocations against other
//! sections recurse. Loaded sections live in the general heap (PSRAM
//! preferred). Flash placement of read-only sections is permanently
//! disabled on this tree: the video core runs bare-metal and cannot
//! take the multicore flash lockout.

pub mod reloc;

use alloc::borrow::ToOwned;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use rookos_abi::elf::{
    EF_ARM_ABI_FLOAT_HARD, EHDR_SIZE, ELFCLASS32, ELFDATA2LSB, EM_ARM, Elf32Header, Elf32Rel,
    Elf32Shdr, Elf32Sym, R_ARM_ABS32, R_ARM_REL32, R_ARM_THM_ALU_ABS_G0_NC, R_ARM_THM_CALL,
    R_ARM_THM_JUMP24, REL_SIZE, SHDR_SIZE, SHF_ALLOC, SHT_NOBITS, SHT_REL, SHT_STRTAB,
    SHT_SYMTAB, ST_INFO_GLOBAL_FUNC, ST_INFO_WEAK_FUNC, SYM_SIZE, reserved_section_name,
};
use rookos_lib::{klog_debug, klog_warn};

use rookos_fs::fat::{FatError, FatVolume, FileId, open_mode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElfLoadError {
    Io(FatError),
    NotFound,
    NotElf,
    BadVersion { ident: u8, version: u32 },
    BadClass { class: u8, endianness: u8 },
    BadMachine { machine: u16 },
    BadAbi { abi: u8 },
    HardFloat { flags: u32 },
    NoSymtab,
    SectionRead { sec_num: u16 },
    SymbolRead { index: u32 },
    ReservedSection { name: &'static str, symbol: String },
    UnsupportedReloc { rel_type: u8, symbol: String },
    NoMem,
    MainMissing,
}

impl fmt::Display for ElfLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElfLoadError::Io(e) => write!(f, "I/O error: {:?}", e),
            ElfLoadError::NotFound => write!(f, "unable to open file"),
            ElfLoadError::NotElf => write!(f, "not an ELF file"),
            ElfLoadError::BadVersion { ident, version } => {
                write!(f, "unexpected ELF version {}:{}", ident, version)
            }
            ElfLoadError::BadClass { class, endianness } => {
                write!(f, "unexpected class {} endian {}", class, endianness)
            }
            ElfLoadError::BadMachine { machine } => {
                write!(f, "machine type {}; expected {}", machine, EM_ARM)
            }
            ElfLoadError::BadAbi { abi } => write!(f, "ABI type {}; expected 0", abi),
            ElfLoadError::HardFloat { flags } => {
                write!(f, "hard-float image (flags {:#06x})", flags)
            }
            ElfLoadError::NoSymtab => write!(f, "unable to find .strtab/.symtab sections"),
            ElfLoadError::SectionRead { sec_num } => {
                write!(f, "unable to read section #{} info", sec_num)
            }
            ElfLoadError::SymbolRead { index } => {
                write!(f, "unable to read .symtab record #{}", index)
            }
            ElfLoadError::ReservedSection { name, symbol } => {
                write!(f, "unsupported link to {} section: {}", name, symbol)
            }
            ElfLoadError::UnsupportedReloc { rel_type, symbol } => {
                write!(f, "unsupported REL type {} -> symbol: {}", rel_type, symbol)
            }
            ElfLoadError::NoMem => write!(f, "not enough RAM"),
            ElfLoadError::MainMissing => write!(f, "'main' global function is not found"),
        }
    }
}

impl From<FatError> for ElfLoadError {
    fn from(e: FatError) -> Self {
        ElfLoadError::Io(e)
    }
}

/// One loaded section: the raw allocation (for free on unload) and the
/// aligned program address the code actually runs at.
pub struct SectionEntry {
    pub sec_num: u16,
    pub alloc_addr: *mut u8,
    pub prg_addr: *mut u8,
    pub size: u32,
}

pub struct LoadedImage {
    pub sections: Vec<SectionEntry>,
    /// Resolved entry points; 0 when the symbol is absent.
    pub req_ver_fn: usize,
    pub init_fn: usize,
    pub main_fn: usize,
    pub fini_fn: usize,
    pub sig_fn: usize,
}

// SAFETY: section memory is private to the owning context's image.
unsafe impl Send for LoadedImage {}

impl Drop for LoadedImage {
    fn drop(&mut self) {
        free_sections(&mut self.sections);
    }
}

fn free_sections(sections: &mut Vec<SectionEntry>) {
    for entry in sections.drain(..) {
        rookos_mm::free_any(entry.alloc_addr);
    }
}

fn read_exact_at(
    volume: &dyn FatVolume,
    file: FileId,
    offset: u32,
    buf: &mut [u8],
) -> Result<(), FatError> {
    let mut done = 0usize;
    while done < buf.len() {
        let n = volume.read(file, offset + done as u32, &mut buf[done..])?;
        if n == 0 {
            return Err(FatError::IntErr);
        }
        done += n;
    }
    Ok(())
}

fn check_header(ehdr: &Elf32Header) -> Result<(), ElfLoadError> {
    if ehdr.ident_version != 1 || ehdr.version != 1 {
        return Err(ElfLoadError::BadVersion {
            ident: ehdr.ident_version,
            version: ehdr.version,
        });
    }
    if ehdr.class != ELFCLASS32 || ehdr.endianness != ELFDATA2LSB {
        return Err(ElfLoadError::BadClass {
            class: ehdr.class,
            endianness: ehdr.endianness,
        });
    }
    if ehdr.machine != EM_ARM {
        return Err(ElfLoadError::BadMachine {
            machine: ehdr.machine,
        });
    }
    if ehdr.abi != 0 {
        return Err(ElfLoadError::BadAbi { abi: ehdr.abi });
    }
    if ehdr.flags & EF_ARM_ABI_FLOAT_HARD != 0 {
        return Err(ElfLoadError::HardFloat { flags: ehdr.flags });
    }
    Ok(())
}

/// Validate the load preconditions without loading anything: magic,
/// class, endianness, machine, ABI, float model.
pub fn validate(volume: &dyn FatVolume, path: &str) -> Result<(), ElfLoadError> {
    let file = volume
        .open(path, open_mode::FA_READ)
        .map_err(|_| ElfLoadError::NotFound)?;
    let mut hdr = [0u8; EHDR_SIZE];
    let result = read_exact_at(volume, file, 0, &mut hdr);
    let _ = volume.close(file);
    result.map_err(|_| ElfLoadError::NotElf)?;
    let ehdr = Elf32Header::parse(&hdr).ok_or(ElfLoadError::NotElf)?;
    check_header(&ehdr)
}

/// Quick magic probe used by the shell's chain loop to skip non-ELF
/// files silently.
pub fn is_elf_file(volume: &dyn FatVolume, path: &str) -> bool {
    let Ok(file) = volume.open(path, open_mode::FA_READ) else {
        return false;
    };
    let mut magic = [0u8; 4];
    let ok = matches!(volume.read(file, 0, &mut magic), Ok(4));
    let _ = volume.close(file);
    ok && magic == rookos_abi::elf::ELF_MAGIC
}

struct LoadCtx<'a> {
    volume: &'a dyn FatVolume,
    file: FileId,
    ehdr: Elf32Header,
    symtab: Vec<u8>,
    strtab: Vec<u8>,
    sections: Vec<SectionEntry>,
}

impl<'a> LoadCtx<'a> {
    fn read_shdr(&self, sec_num: u16) -> Result<Elf32Shdr, ElfLoadError> {
        let mut buf = [0u8; SHDR_SIZE];
        read_exact_at(
            self.volume,
            self.file,
            self.ehdr.shoff + (SHDR_SIZE as u32) * sec_num as u32,
            &mut buf,
        )
        .map_err(|_| ElfLoadError::SectionRead { sec_num })?;
        Elf32Shdr::parse(&buf).ok_or(ElfLoadError::SectionRead { sec_num })
    }

    fn read_sym(&self, index: u32) -> Result<Elf32Sym, ElfLoadError> {
        let off = index as usize * SYM_SIZE;
        self.symtab
            .get(off..off + SYM_SIZE)
            .and_then(Elf32Sym::parse)
            .ok_or(ElfLoadError::SymbolRead { index })
    }

    fn sym_name(&self, sym: &Elf32Sym) -> &str {
        let start = sym.name as usize;
        let rest = self.strtab.get(start..).unwrap_or(&[]);
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        core::str::from_utf8(&rest[..end]).unwrap_or("<bad-utf8>")
    }

    fn cached_section(&self, sec_num: u16) -> Option<*mut u8> {
        self.sections
            .iter()
            .find(|e| e.sec_num == sec_num)
            .map(|e| e.prg_addr)
    }

    /// Load one section and apply its relocations, recursing into
    /// referenced sections on demand.
    fn load_section(&mut self, sec_num: u16) -> Result<*mut u8, ElfLoadError> {
        if let Some(prg) = self.cached_section(sec_num) {
            return Ok(prg);
        }

        let sh = self.read_shdr(sec_num)?;
        let align = sh.addralign.max(1) as usize;
        let size = sh.size as usize;
        let alloc = rookos_mm::alloc_pref_psram(size + align - 1 + 1);
        if alloc.is_null() {
            return Err(ElfLoadError::NoMem);
        }
        let prg = ((alloc as usize + align - 1) & !(align - 1)) as *mut u8;

        // SAFETY: prg..prg+size lies inside the fresh allocation.
        unsafe { core::ptr::write_bytes(prg, 0, size) };

        if sh.sh_type != SHT_NOBITS && size > 0 {
            // SAFETY: same bounds as the zero fill above.
            let dst = unsafe { core::slice::from_raw_parts_mut(prg, size) };
            let read = read_exact_at(self.volume, self.file, sh.offset, dst);
            // SHF_ALLOC sections may be larger than their file extent;
            // anything unread stays zero. Other sections must read.
            if read.is_err() && sh.flags & SHF_ALLOC == 0 {
                rookos_mm::free_any(alloc);
                return Err(ElfLoadError::SectionRead { sec_num });
            }
        }

        // Record before relocating so self-references resolve.
        self.sections.push(SectionEntry {
            sec_num,
            alloc_addr: alloc,
            prg_addr: prg,
            size: sh.size,
        });
        klog_debug!(
            "elf: section #{} ({} bytes) at {:p}",
            sec_num,
            sh.size,
            prg
        );

        self.apply_relocations(sec_num, prg)?;
        Ok(prg)
    }

    /// Apply every REL section whose `sh_info` targets `sec_num`.
    fn apply_relocations(&mut self, sec_num: u16, prg: *mut u8) -> Result<(), ElfLoadError> {
        for shdr_idx in 0..self.ehdr.shnum {
            let rsh = self.read_shdr(shdr_idx)?;
            if rsh.sh_type != SHT_REL || rsh.info != sec_num as u32 {
                continue;
            }
            let count = rsh.size as usize / REL_SIZE;
            for j in 0..count {
                let mut buf = [0u8; REL_SIZE];
                read_exact_at(
                    self.volume,
                    self.file,
                    rsh.offset + (j * REL_SIZE) as u32,
                    &mut buf,
                )
                .map_err(|_| ElfLoadError::SectionRead { sec_num })?;
                let rel = Elf32Rel::parse(&buf).ok_or(ElfLoadError::SectionRead { sec_num })?;
                let sym = self.read_sym(rel.sym_index())?;

                if let Some(name) = reserved_section_name(sym.shndx) {
                    return Err(ElfLoadError::ReservedSection {
                        name,
                        symbol: self.sym_name(&sym).to_owned(),
                    });
                }

                let target_base = if sym.shndx != sec_num {
                    self.load_section(sym.shndx)?
                } else {
                    prg
                };
                let sym_val = (target_base as u32).wrapping_add(sym.value);
                let site = unsafe { prg.add(rel.offset as usize) };

                self.apply_one(rel.rel_type(), site, sym_val, &sym)?;
            }
        }
        Ok(())
    }

    fn apply_one(
        &self,
        rel_type: u8,
        site: *mut u8,
        sym_val: u32,
        sym: &Elf32Sym,
    ) -> Result<(), ElfLoadError> {
        let site_addr = site as u32;
        match rel_type {
            R_ARM_ABS32 => unsafe {
                let p = site as *mut u32;
                p.write_unaligned(reloc::apply_abs32(p.read_unaligned(), sym_val));
            },
            R_ARM_REL32 => unsafe {
                let p = site as *mut u32;
                p.write_unaligned(reloc::apply_rel32(p.read_unaligned(), sym_val, site_addr));
            },
            R_ARM_THM_CALL => unsafe {
                let p = site as *mut u16;
                let hw = [p.read_unaligned(), p.add(1).read_unaligned()];
                let patched = reloc::patch_thm_call(hw, sym_val, site_addr);
                p.write_unaligned(patched[0]);
                p.add(1).write_unaligned(patched[1]);
            },
            R_ARM_THM_JUMP24 => unsafe {
                let p = site as *mut u16;
                let hw = [p.read_unaligned(), p.add(1).read_unaligned()];
                match reloc::patch_thm_jump24(hw, sym_val, site_addr) {
                    Some(patched) => {
                        p.write_unaligned(patched[0]);
                        p.add(1).write_unaligned(patched[1]);
                    }
                    None => {
                        // Out of range: report and leave the site bytes
                        // unchanged.
                        klog_warn!(
                            "R_ARM_THM_JUMP24: target out of range for {}",
                            self.sym_name(sym)
                        );
                    }
                }
            },
            R_ARM_THM_ALU_ABS_G0_NC => {
                if site_addr & 0x3 != 0 {
                    klog_warn!(
                        "REL type 102 misaligned site {:p} -> symbol: {}",
                        site,
                        self.sym_name(sym)
                    );
                    return Ok(());
                }
                unsafe {
                    let p = site as *mut u16;
                    let hw = [p.read_unaligned(), p.add(1).read_unaligned()];
                    let patched = reloc::patch_thm_movw(hw, sym_val);
                    p.write_unaligned(patched[0]);
                    p.add(1).write_unaligned(patched[1]);
                }
            }
            other => {
                return Err(ElfLoadError::UnsupportedReloc {
                    rel_type: other,
                    symbol: self.sym_name(sym).to_owned(),
                });
            }
        }
        Ok(())
    }

    /// Resolve a symbol index to a program address by loading its
    /// section.
    fn load_symbol(&mut self, index: Option<u32>) -> Result<usize, ElfLoadError> {
        let Some(index) = index else {
            return Ok(0);
        };
        let sym = self.read_sym(index)?;
        let base = self.load_section(sym.shndx)?;
        Ok(base as usize + sym.value as usize)
    }
}

/// Load the image at `path`: locate `.symtab`/`.strtab`, discover the
/// well-known symbols (weak `_init`/`_fini` honored), and pull in their
/// sections with relocations applied.
pub fn load(volume: &dyn FatVolume, path: &str) -> Result<LoadedImage, ElfLoadError> {
    let file = volume
        .open(path, open_mode::FA_READ)
        .map_err(|_| ElfLoadError::NotFound)?;
    let result = load_inner(volume, file);
    let _ = volume.close(file);
    result
}

fn load_inner(volume: &dyn FatVolume, file: FileId) -> Result<LoadedImage, ElfLoadError> {
    let mut hdr = [0u8; EHDR_SIZE];
    read_exact_at(volume, file, 0, &mut hdr).map_err(|_| ElfLoadError::NotElf)?;
    let ehdr = Elf32Header::parse(&hdr).ok_or(ElfLoadError::NotElf)?;
    check_header(&ehdr)?;

    // Section-name string table.
    let mut shbuf = [0u8; SHDR_SIZE];
    read_exact_at(
        volume,
        file,
        ehdr.shoff + (SHDR_SIZE as u32) * ehdr.shstrndx as u32,
        &mut shbuf,
    )
    .map_err(|_| ElfLoadError::SectionRead {
        sec_num: ehdr.shstrndx,
    })?;
    let shstr_hdr = Elf32Shdr::parse(&shbuf).ok_or(ElfLoadError::SectionRead {
        sec_num: ehdr.shstrndx,
    })?;
    let mut shstrtab = alloc::vec![0u8; shstr_hdr.size as usize];
    read_exact_at(volume, file, shstr_hdr.offset, &mut shstrtab).map_err(|_| {
        ElfLoadError::SectionRead {
            sec_num: ehdr.shstrndx,
        }
    })?;

    fn name_in(table: &[u8], off: u32) -> &[u8] {
        let rest = table.get(off as usize..).unwrap_or(&[]);
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        &rest[..end]
    }

    // Locate .symtab and .strtab by name.
    let mut symtab_hdr: Option<Elf32Shdr> = None;
    let mut strtab_hdr: Option<Elf32Shdr> = None;
    for i in 0..ehdr.shnum {
        let mut buf = [0u8; SHDR_SIZE];
        read_exact_at(volume, file, ehdr.shoff + (SHDR_SIZE as u32) * i as u32, &mut buf)
            .map_err(|_| ElfLoadError::SectionRead { sec_num: i })?;
        let sh = Elf32Shdr::parse(&buf).ok_or(ElfLoadError::SectionRead { sec_num: i })?;
        if sh.sh_type == SHT_SYMTAB && name_in(&shstrtab, sh.name) == b".symtab" {
            symtab_hdr = Some(sh);
        } else if sh.sh_type == SHT_STRTAB && name_in(&shstrtab, sh.name) == b".strtab" {
            strtab_hdr = Some(sh);
        }
        if symtab_hdr.is_some() && strtab_hdr.is_some() {
            break;
        }
    }
    let (symtab_hdr, strtab_hdr) = match (symtab_hdr, strtab_hdr) {
        (Some(s), Some(t)) => (s, t),
        _ => return Err(ElfLoadError::NoSymtab),
    };

    let mut symtab = alloc::vec![0u8; symtab_hdr.size as usize];
    read_exact_at(volume, file, symtab_hdr.offset, &mut symtab)
        .map_err(|_| ElfLoadError::NoSymtab)?;
    let mut strtab = alloc::vec![0u8; strtab_hdr.size as usize];
    read_exact_at(volume, file, strtab_hdr.offset, &mut strtab)
        .map_err(|_| ElfLoadError::NoSymtab)?;

    let mut ctx = LoadCtx {
        volume,
        file,
        ehdr,
        symtab,
        strtab,
        sections: Vec::new(),
    };

    // Discover the well-known global-function symbols; weak `_init` /
    // `_fini` are fallbacks.
    let mut req_idx = None;
    let mut init_idx = None;
    let mut fini_idx = None;
    let mut main_idx = None;
    let mut sig_idx = None;
    let mut weak_init = None;
    let mut weak_fini = None;

    for i in 0..(ctx.symtab.len() / SYM_SIZE) as u32 {
        let sym = ctx.read_sym(i)?;
        let name = ctx.sym_name(&sym);
        match sym.info {
            ST_INFO_GLOBAL_FUNC => match name {
                "__required_m_api_verion" => req_idx = Some(i),
                "_init" => init_idx = Some(i),
                "main" => main_idx = Some(i),
                "_fini" => fini_idx = Some(i),
                "signal" => sig_idx = Some(i),
                _ => {}
            },
            ST_INFO_WEAK_FUNC => match name {
                "_init" => weak_init = Some(i),
                "_fini" => weak_fini = Some(i),
                _ => {}
            },
            _ => {}
        }
    }
    let init_idx = init_idx.or(weak_init);
    let fini_idx = fini_idx.or(weak_fini);

    let result = (|| -> Result<LoadedImage, ElfLoadError> {
        let req_ver_fn = ctx.load_symbol(req_idx)?;
        let init_fn = ctx.load_symbol(init_idx)?;
        let main_fn = ctx.load_symbol(main_idx)?;
        let fini_fn = ctx.load_symbol(fini_idx)?;
        let sig_fn = ctx.load_symbol(sig_idx)?;
        if main_fn == 0 {
            return Err(ElfLoadError::MainMissing);
        }
        Ok(LoadedImage {
            sections: core::mem::take(&mut ctx.sections),
            req_ver_fn,
            init_fn,
            main_fn,
            fini_fn,
            sig_fn,
        })
    })();

    match result {
        Ok(image) => Ok(image),
        Err(e) => {
            free_sections(&mut ctx.sections);
            Err(e)
        }
    }
}
