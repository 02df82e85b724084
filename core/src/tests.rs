use core::ffi::c_int;

use alloc::boxed::Box;
use alloc::vec::Vec;

use rookos_abi::elf::{
    ELF_MAGIC, EM_ARM, R_ARM_ABS32, SHT_NOBITS, SHT_REL, SHT_STRTAB, SHT_SYMTAB, SHN_ABS,
    ST_INFO_GLOBAL_FUNC, ST_INFO_WEAK_FUNC,
};
use rookos_abi::signal::{SIG_SETMASK, SIGKILL, SIGTERM, sig_bit};
use rookos_lib::define_test_suite;

use rookos_fs::fat::{FatVolume, open_mode};
use rookos_fs::ramfat::RamFat;

use crate::context::{self, Context, Stage, set_current_ctx};
use crate::elf::{self, ElfLoadError, reloc};
use crate::process;

// ---------------------------------------------------------------------------
// Relocation arithmetic (vectors derived from the ARM ELF ABI)
// ---------------------------------------------------------------------------

pub fn test_reloc_abs32_and_rel32() -> c_int {
    if reloc::apply_abs32(0x10, 0x2000) != 0x2010 {
        return -1;
    }
    // REL32: sym + addend - P.
    if reloc::apply_rel32(8, 0x1000, 0x0800) != 0x0808 {
        return -1;
    }
    if reloc::apply_rel32(0, 0x100, 0x200) != 0x100u32.wrapping_sub(0x200) {
        return -1;
    }
    0
}

pub fn test_reloc_bl_decode_minus_four() -> c_int {
    // `f7ff fffe` is the canonical unresolved `bl`: offset -4.
    if reloc::decode_branch_offset(0xF7FF, 0xFFFE) != -4 {
        return -1;
    }
    0
}

pub fn test_reloc_bl_patch_roundtrip() -> c_int {
    let site = 0x2000_0000u32;
    let patched = reloc::patch_thm_call([0xF7FF, 0xFFFE], site + 100, site);
    // New offset = old addend (-4) + displacement (100).
    if reloc::decode_branch_offset(patched[0], patched[1]) != 96 {
        return -1;
    }
    // Positive small offset with J1 = J2 = 1: known encoding.
    if patched != [0xF000, 0xF830] {
        return -1;
    }
    // BL marker bits: second halfword is 11x1x.
    if patched[1] & 0xD000 != 0xD000 {
        return -1;
    }
    0
}

pub fn test_reloc_bl_negative_offset() -> c_int {
    let site = 0x2000_1000u32;
    let target = site - 0x400;
    let patched = reloc::patch_thm_call([0xF7FF, 0xFFFE], target, site);
    if reloc::decode_branch_offset(patched[0], patched[1]) != -0x404 {
        return -1;
    }
    0
}

pub fn test_reloc_jump24_patch() -> c_int {
    let site = 0x1000u32;
    // B.W with zero displacement: S=0, I1=I2=0 -> J1=J2=1.
    let zero = [0xF000u16, 0xB800u16];
    if reloc::decode_branch_offset(zero[0], zero[1]) != 0 {
        return -1;
    }
    let target = site + 4 + 200;
    let patched = match reloc::patch_thm_jump24(zero, target, site) {
        Some(p) => p,
        None => return -1,
    };
    if reloc::decode_branch_offset(patched[0], patched[1]) != 200 {
        return -1;
    }
    // B.W (T4) marker: second halfword is 10x1x.
    if patched[1] & 0xD000 != 0x9000 {
        return -1;
    }
    0
}

pub fn test_reloc_jump24_out_of_range() -> c_int {
    let zero = [0xF000u16, 0xB800u16];
    // 32 MB away: outside the ±16 MB range, must be refused.
    if reloc::patch_thm_jump24(zero, 0x0200_0000, 0).is_some() {
        return -1;
    }
    // Exactly at the positive limit is accepted.
    let edge = (1u32 << 24) - 2 + 4;
    if reloc::patch_thm_jump24(zero, edge, 0).is_none() {
        return -1;
    }
    0
}

pub fn test_reloc_movw_patch() -> c_int {
    // movw r0, #0 (T3): f240 0000.
    let patched = reloc::patch_thm_movw([0xF240, 0x0000], 0x1234);
    if reloc::decode_movw_imm16(patched[0], patched[1]) != 0x1234 {
        return -1;
    }
    if patched != [0xF241, 0x2034] {
        return -1;
    }
    // The encoded addend participates: imm16 = (sym + addend) & 0xFFFF.
    let with_addend = reloc::patch_thm_movw([0xF240, 0x0010], 0x20);
    if reloc::decode_movw_imm16(with_addend[0], with_addend[1]) != 0x30 {
        return -1;
    }
    // Only the low 16 bits land in the instruction.
    let wrapped = reloc::patch_thm_movw([0xF240, 0x0000], 0x12_0042);
    if reloc::decode_movw_imm16(wrapped[0], wrapped[1]) != 0x0042 {
        return -1;
    }
    0
}

// ---------------------------------------------------------------------------
// Synthetic relocatable ELF images
// ---------------------------------------------------------------------------

struct SectionDesc {
    name: &'static str,
    sh_type: u32,
    flags: u32,
    info: u32,
    addralign: u32,
    body: Vec<u8>,
}

/// Assemble a minimal ELF32 relocatable image from section descs; the
/// section header table lands at the end.
fn build_elf(descs: &[SectionDesc], overrides: impl FnOnce(&mut [u8])) -> Vec<u8> {
    let shnum = descs.len() + 2; // null section + .shstrtab
    let mut shstrtab: Vec<u8> = alloc::vec![0];
    let mut name_offsets = Vec::new();
    for desc in descs {
        name_offsets.push(shstrtab.len() as u32);
        shstrtab.extend_from_slice(desc.name.as_bytes());
        shstrtab.push(0);
    }
    let shstr_name = shstrtab.len() as u32;
    shstrtab.extend_from_slice(b".shstrtab\0");

    let mut image = alloc::vec![0u8; 52];
    let mut offsets = Vec::new();
    for desc in descs {
        offsets.push(image.len() as u32);
        image.extend_from_slice(&desc.body);
    }
    let shstr_off = image.len() as u32;
    image.extend_from_slice(&shstrtab);
    let shoff = image.len() as u32;

    let push_shdr = |name: u32, sh_type: u32, flags: u32, offset: u32, size: u32,
                         link: u32, info: u32, addralign: u32, entsize: u32,
                         image: &mut Vec<u8>| {
        image.extend_from_slice(&name.to_le_bytes());
        image.extend_from_slice(&sh_type.to_le_bytes());
        image.extend_from_slice(&flags.to_le_bytes());
        image.extend_from_slice(&0u32.to_le_bytes()); // addr
        image.extend_from_slice(&offset.to_le_bytes());
        image.extend_from_slice(&size.to_le_bytes());
        image.extend_from_slice(&link.to_le_bytes());
        image.extend_from_slice(&info.to_le_bytes());
        image.extend_from_slice(&addralign.to_le_bytes());
        image.extend_from_slice(&entsize.to_le_bytes());
    };

    // Null section header.
    push_shdr(0, 0, 0, 0, 0, 0, 0, 0, 0, &mut image);
    for (i, desc) in descs.iter().enumerate() {
        push_shdr(
            name_offsets[i],
            desc.sh_type,
            desc.flags,
            offsets[i],
            desc.body.len() as u32,
            0,
            desc.info,
            desc.addralign,
            0,
            &mut image,
        );
    }
    push_shdr(
        shstr_name,
        SHT_STRTAB,
        0,
        shstr_off,
        shstrtab.len() as u32,
        0,
        0,
        0,
        0,
        &mut image,
    );

    // ELF header.
    image[0..4].copy_from_slice(&ELF_MAGIC);
    image[4] = 1; // 32-bit
    image[5] = 1; // little endian
    image[6] = 1; // EV_CURRENT
    image[7] = 0; // ABI
    image[16..18].copy_from_slice(&1u16.to_le_bytes()); // ET_REL
    image[18..20].copy_from_slice(&EM_ARM.to_le_bytes());
    image[20..24].copy_from_slice(&1u32.to_le_bytes());
    image[32..36].copy_from_slice(&shoff.to_le_bytes());
    image[46..48].copy_from_slice(&40u16.to_le_bytes()); // shentsize
    image[48..50].copy_from_slice(&(shnum as u16).to_le_bytes());
    image[50..52].copy_from_slice(&((shnum - 1) as u16).to_le_bytes()); // shstrndx

    overrides(&mut image);
    image
}

fn sym_record(name_off: u32, value: u32, info: u8, shndx: u16) -> [u8; 16] {
    let mut rec = [0u8; 16];
    rec[0..4].copy_from_slice(&name_off.to_le_bytes());
    rec[4..8].copy_from_slice(&value.to_le_bytes());
    rec[12] = info;
    rec[14..16].copy_from_slice(&shndx.to_le_bytes());
    rec
}

fn rel_record(offset: u32, sym: u32, rel_type: u8) -> [u8; 8] {
    let mut rec = [0u8; 8];
    rec[0..4].copy_from_slice(&offset.to_le_bytes());
    rec[4..8].copy_from_slice(&((sym << 8) | rel_type as u32).to_le_bytes());
    rec
}

/// Two sections, a cross-section ABS32 relocation, weak `_init`, and a
/// NOBITS .bss: the whole demand-loading surface in one image.
fn test_app_image(reloc_type: u8, data_shndx: u16) -> Vec<u8> {
    // strtab: \0 main \0 _init \0 buffer \0
    let mut strtab: Vec<u8> = alloc::vec![0];
    let main_off = strtab.len() as u32;
    strtab.extend_from_slice(b"main\0");
    let init_off = strtab.len() as u32;
    strtab.extend_from_slice(b"_init\0");
    let buf_off = strtab.len() as u32;
    strtab.extend_from_slice(b"buffer\0");

    let mut symtab = Vec::new();
    symtab.extend_from_slice(&sym_record(0, 0, 0, 0)); // null
    symtab.extend_from_slice(&sym_record(main_off, 0, ST_INFO_GLOBAL_FUNC, 1)); // sym 1
    symtab.extend_from_slice(&sym_record(buf_off, 4, 0x11, data_shndx)); // sym 2
    symtab.extend_from_slice(&sym_record(init_off, 8, ST_INFO_WEAK_FUNC, 1)); // sym 3

    let mut rel = Vec::new();
    rel.extend_from_slice(&rel_record(4, 2, reloc_type));

    build_elf(
        &[
            SectionDesc {
                // section 1: .text, site at +4 preloaded with addend 8
                name: ".text",
                sh_type: 1,
                flags: 0x6,
                info: 0,
                addralign: 4,
                body: alloc::vec![0x70, 0x47, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x70, 0x47],
            },
            SectionDesc {
                // section 2: .data
                name: ".data",
                sh_type: 1,
                flags: 0x3,
                info: 0,
                addralign: 4,
                body: alloc::vec![0xAA; 16],
            },
            SectionDesc {
                // section 3: .bss (NOBITS, no file content)
                name: ".bss",
                sh_type: SHT_NOBITS,
                flags: 0x3,
                info: 0,
                addralign: 4,
                body: Vec::new(),
            },
            SectionDesc {
                name: ".rel.text",
                sh_type: SHT_REL,
                flags: 0,
                info: 1,
                addralign: 4,
                body: rel,
            },
            SectionDesc {
                name: ".symtab",
                sh_type: SHT_SYMTAB,
                flags: 0,
                info: 0,
                addralign: 4,
                body: symtab,
            },
            SectionDesc {
                name: ".strtab",
                sh_type: SHT_STRTAB,
                flags: 0,
                info: 0,
                addralign: 1,
                body: strtab,
            },
        ],
        |_| {},
    )
}

fn install_image(volume: &dyn FatVolume, path: &str, image: &[u8]) -> bool {
    let Ok(id) = volume.open(path, open_mode::FA_CREATE_ALWAYS | open_mode::FA_WRITE) else {
        return false;
    };
    let ok = volume.write(id, 0, image).is_ok();
    volume.close(id).is_ok() && ok
}

pub fn test_elf_validate_preconditions() -> c_int {
    rookos_mm::kernel_heap::heap_init();
    let vol = RamFat::new();

    let good = test_app_image(R_ARM_ABS32, 2);
    if !install_image(&vol, "/good.elf", &good) {
        return -1;
    }
    if elf::validate(&vol, "/good.elf").is_err() {
        return -1;
    }

    // Corrupt each precondition in turn.
    let cases: [(usize, u8, fn(&ElfLoadError) -> bool); 4] = [
        (4, 2, |e| matches!(e, ElfLoadError::BadClass { .. })),
        (5, 2, |e| matches!(e, ElfLoadError::BadClass { .. })),
        (7, 9, |e| matches!(e, ElfLoadError::BadAbi { .. })),
        (18, 0x3E, |e| matches!(e, ElfLoadError::BadMachine { .. })),
    ];
    for (offset, value, check) in cases {
        let mut bad = good.clone();
        bad[offset] = value;
        install_image(&vol, "/bad.elf", &bad);
        match elf::validate(&vol, "/bad.elf") {
            Err(e) if check(&e) => {}
            _ => return -1,
        }
    }

    // Hard-float flag.
    let mut hard = good.clone();
    hard[37] = 0x04; // e_flags bit 10
    install_image(&vol, "/hard.elf", &hard);
    if !matches!(elf::validate(&vol, "/hard.elf"), Err(ElfLoadError::HardFloat { .. })) {
        return -1;
    }

    // Corrupt magic.
    let mut notelf = good.clone();
    notelf[0] = 0x7E;
    install_image(&vol, "/not.elf", &notelf);
    if elf::validate(&vol, "/not.elf") != Err(ElfLoadError::NotElf) {
        return -1;
    }
    0
}

pub fn test_elf_load_applies_abs32_across_sections() -> c_int {
    rookos_mm::kernel_heap::heap_init();
    let vol = RamFat::new();
    if !install_image(&vol, "/app.elf", &test_app_image(R_ARM_ABS32, 2)) {
        return -1;
    }
    let image = match elf::load(&vol, "/app.elf") {
        Ok(image) => image,
        Err(_) => return -1,
    };

    // main resolved into section 1, weak _init honored at +8.
    let text = image
        .sections
        .iter()
        .find(|s| s.sec_num == 1)
        .map(|s| s.prg_addr);
    let data = image
        .sections
        .iter()
        .find(|s| s.sec_num == 2)
        .map(|s| s.prg_addr);
    let (Some(text), Some(data)) = (text, data) else {
        return -1;
    };
    if image.main_fn != text as usize {
        return -1;
    }
    if image.init_fn != text as usize + 8 {
        return -1;
    }
    if image.sig_fn != 0 || image.req_ver_fn != 0 {
        return -1;
    }

    // ABS32 at text+4: initial addend 8 plus (data base + sym value 4).
    let site = unsafe { (text.add(4) as *const u32).read_unaligned() };
    if site != (data as u32).wrapping_add(4).wrapping_add(8) {
        return -1;
    }
    0
}

pub fn test_elf_load_rejects_reserved_section() -> c_int {
    rookos_mm::kernel_heap::heap_init();
    let vol = RamFat::new();
    if !install_image(&vol, "/abs.elf", &test_app_image(R_ARM_ABS32, SHN_ABS)) {
        return -1;
    }
    match elf::load(&vol, "/abs.elf") {
        Err(ElfLoadError::ReservedSection { name, .. }) if name == "ABS" => 0,
        _ => -1,
    }
}

pub fn test_elf_load_rejects_unknown_reloc() -> c_int {
    rookos_mm::kernel_heap::heap_init();
    let vol = RamFat::new();
    if !install_image(&vol, "/odd.elf", &test_app_image(77, 2)) {
        return -1;
    }
    match elf::load(&vol, "/odd.elf") {
        Err(ElfLoadError::UnsupportedReloc { rel_type: 77, .. }) => 0,
        _ => -1,
    }
}

pub fn test_elf_missing_main() -> c_int {
    rookos_mm::kernel_heap::heap_init();
    let vol = RamFat::new();
    // Patch the symtab so "main" is local (info 0x02), not global.
    let mut image = test_app_image(R_ARM_ABS32, 2);
    let needle = sym_record(1, 0, ST_INFO_GLOBAL_FUNC, 1);
    let pos = image
        .windows(needle.len())
        .position(|w| w == needle.as_slice())
        .unwrap_or(0);
    if pos == 0 {
        return -1;
    }
    image[pos + 12] = 0x02;
    if !install_image(&vol, "/nomain.elf", &image) {
        return -1;
    }
    match elf::load(&vol, "/nomain.elf") {
        Err(ElfLoadError::MainMissing) => 0,
        _ => -1,
    }
}

// ---------------------------------------------------------------------------
// Contexts and process table
// ---------------------------------------------------------------------------

fn fresh_process_world() {
    context::reset_for_tests();
    set_current_ctx(core::ptr::null_mut());
}

pub fn test_pid_table_invariants() -> c_int {
    fresh_process_world();
    let a = context::insert_ctx(Box::new(Context::new()));
    let b = context::insert_ctx(Box::new(Context::new()));
    if a != 1 || b != 2 {
        return -1;
    }
    // pids[pid].pid == pid.
    if context::with_ctx(a, |c| c.pid) != Some(a) {
        return -1;
    }
    if !context::remove_ctx(a) {
        return -1;
    }
    if context::with_ctx(a, |c| c.pid).is_some() {
        return -1;
    }
    // Freed slot is reused first.
    let c = context::insert_ctx(Box::new(Context::new()));
    if c != 1 {
        return -1;
    }
    fresh_process_world();
    0
}

pub fn test_prep_ctx_inherits() -> c_int {
    fresh_process_world();
    let mut parent = Context::new();
    parent.pid = 1;
    parent.pgid = 1;
    parent.sid = 1;
    parent.env.push(("PATH".into(), "/bin".into()));
    parent.umask = 0o027;

    let child = process::prep_ctx(Some(&parent), "/bin/tool", &["tool", "-v"], None);
    if child.argv != ["tool", "-v"] {
        return -1;
    }
    if child.orig_cmd != "/bin/tool" {
        return -1;
    }
    if child.getenv("PATH") != Some("/bin") {
        return -1;
    }
    if child.ppid != 1 || child.pgid != 1 || child.umask != 0o027 {
        return -1;
    }
    if child.stage() != Stage::Found {
        return -1;
    }

    // Explicit envp replaces inheritance.
    let child2 = process::prep_ctx(Some(&parent), "/bin/tool", &["tool"], Some(&["HOME=/"]));
    if child2.getenv("PATH").is_some() || child2.getenv("HOME") != Some("/") {
        return -1;
    }
    0
}

pub fn test_waitpid_reaps_zombie() -> c_int {
    fresh_process_world();
    let shell_pid = context::insert_ctx(Box::new(Context::new()));
    let shell_ptr = context::with_ctx(shell_pid, |c| {
        c.pgid = c.pid;
        c.sid = c.pid;
        c as *mut Context
    });
    let Some(shell_ptr) = shell_ptr else { return -1 };
    set_current_ctx(shell_ptr);

    let mut child = Box::new(Context::new());
    child.ppid = shell_pid;
    child.set_ret_code(15);
    child.set_stage(Stage::Zombie);
    let child_pid = context::insert_ctx(child);

    match process::waitpid(child_pid, 0) {
        Ok((pid, status)) if pid == child_pid && status == 15 << 8 => {}
        _ => {
            fresh_process_world();
            return -1;
        }
    }
    // The reap removed the context.
    if context::with_ctx(child_pid, |_| ()).is_some() {
        fresh_process_world();
        return -1;
    }
    // No children left: ECHILD.
    let rc = match process::waitpid(-1, 0) {
        Err(e) if e == rookos_abi::errno::ECHILD => 0,
        _ => -1,
    };
    fresh_process_world();
    rc
}

pub fn test_waitpid_wnohang() -> c_int {
    fresh_process_world();
    let shell_pid = context::insert_ctx(Box::new(Context::new()));
    let shell_ptr = context::with_ctx(shell_pid, |c| c as *mut Context);
    set_current_ctx(shell_ptr.unwrap_or(core::ptr::null_mut()));

    let mut child = Box::new(Context::new());
    child.ppid = shell_pid;
    child.set_stage(Stage::Executed);
    let _running = context::insert_ctx(child);

    let rc = match process::waitpid(-1, process::WNOHANG) {
        Ok((0, 0)) => 0,
        _ => -1,
    };
    fresh_process_world();
    rc
}

pub fn test_kill_sets_pending() -> c_int {
    fresh_process_world();
    let shell_pid = context::insert_ctx(Box::new(Context::new()));
    let shell_ptr = context::with_ctx(shell_pid, |c| c as *mut Context);
    set_current_ctx(shell_ptr.unwrap_or(core::ptr::null_mut()));

    let mut child = Box::new(Context::new());
    child.ppid = shell_pid;
    let child_pid = context::insert_ctx(child);

    if process::kill(child_pid, SIGTERM).is_err() {
        fresh_process_world();
        return -1;
    }
    let pending = context::with_ctx(child_pid, |c| {
        (c.sig_pending.load(core::sync::atomic::Ordering::Relaxed), c.stage())
    });
    let rc = match pending {
        Some((mask, Stage::Sigterm)) if mask & sig_bit(SIGTERM) != 0 => 0,
        _ => -1,
    };
    // Unknown pid and invalid signal are errors.
    if process::kill(999, SIGTERM) != Err(rookos_abi::errno::ESRCH) {
        fresh_process_world();
        return -1;
    }
    if process::kill(child_pid, 0) != Err(rookos_abi::errno::EINVAL) {
        fresh_process_world();
        return -1;
    }
    fresh_process_world();
    rc
}

pub fn test_sigmask_protects_sigkill() -> c_int {
    fresh_process_world();
    let pid = context::insert_ctx(Box::new(Context::new()));
    let ptr = context::with_ctx(pid, |c| c as *mut Context);
    set_current_ctx(ptr.unwrap_or(core::ptr::null_mut()));

    if process::sigprocmask(SIG_SETMASK, Some(0xFFFF_FFFF), None).is_err() {
        fresh_process_world();
        return -1;
    }
    let blocked = context::with_ctx(pid, |c| c.sig_blocked).unwrap_or(0);
    let rc = if blocked & sig_bit(SIGKILL) == 0 { 0 } else { -1 };

    // Installing a handler for SIGKILL is refused.
    if process::signal(SIGKILL, rookos_abi::signal::SigAction::Ignore).is_ok() {
        fresh_process_world();
        return -1;
    }
    fresh_process_world();
    rc
}

pub fn test_setsid_rejects_group_leader() -> c_int {
    fresh_process_world();
    let pid = context::insert_ctx(Box::new(Context::new()));
    let ptr = context::with_ctx(pid, |c| {
        c.pgid = c.pid;
        c as *mut Context
    });
    set_current_ctx(ptr.unwrap_or(core::ptr::null_mut()));
    let rc = match process::setsid() {
        Err(e) if e == rookos_abi::errno::EPERM => 0,
        _ => -1,
    };
    // A non-leader may start a session.
    let _ = context::with_ctx(pid, |c| c.pgid = 0);
    let rc2 = match process::setsid() {
        Ok(sid) if sid == pid => 0,
        _ => -1,
    };
    fresh_process_world();
    if rc != 0 || rc2 != 0 { -1 } else { 0 }
}

define_test_suite!(
    core_rt,
    [
        test_reloc_abs32_and_rel32,
        test_reloc_bl_decode_minus_four,
        test_reloc_bl_patch_roundtrip,
        test_reloc_bl_negative_offset,
        test_reloc_jump24_patch,
        test_reloc_jump24_out_of_range,
        test_reloc_movw_patch,
        test_elf_validate_preconditions,
        test_elf_load_applies_abs32_across_sections,
        test_elf_load_rejects_reserved_section,
        test_elf_load_rejects_unknown_reloc,
        test_elf_missing_main,
        test_pid_table_invariants,
        test_prep_ctx_inherits,
        test_waitpid_reaps_zombie,
        test_waitpid_wnohang,
        test_kill_sets_pending,
        test_sigmask_protects_sigkill,
    ]
);
