use core::ffi::c_int;

use rookos_lib::define_test_suite;

use crate::freelist::{ALLOC_ALIGN, FreeList, MIN_BLOCK};
use crate::psram::{MB, PsramProbe, detect_size};
use crate::{CtxAllocations, kernel_heap};

const TEST_ARENA_LEN: usize = 8192;

#[repr(align(16))]
#[allow(dead_code)]
struct TestArena([u8; TEST_ARENA_LEN]);

static mut TEST_ARENA: TestArena = TestArena([0; TEST_ARENA_LEN]);

/// Fresh list over the shared test arena. Tests run sequentially on the
/// harness task, so reusing the arena is fine.
fn fresh_list() -> FreeList {
    let mut list = FreeList::empty();
    unsafe { list.init(&raw mut TEST_ARENA as *mut u8, TEST_ARENA_LEN) };
    list
}

pub fn test_freelist_alloc_alignment() -> c_int {
    let mut list = fresh_list();
    let a = list.alloc(3);
    let b = list.alloc(60);
    if a.is_null() || b.is_null() {
        return -1;
    }
    if (a as usize) % ALLOC_ALIGN != 0 || (b as usize) % ALLOC_ALIGN != 0 {
        return -1;
    }
    // Tiny requests are padded up to the minimum block.
    if list.usable_size(a) != Some(MIN_BLOCK) {
        return -1;
    }
    0
}

pub fn test_freelist_zero_and_oversize() -> c_int {
    let mut list = fresh_list();
    if !list.alloc(0).is_null() {
        return -1;
    }
    let before = list.free_bytes();
    if !list.alloc(TEST_ARENA_LEN * 2).is_null() {
        return -1;
    }
    // A failed allocation must not modify the list.
    if list.free_bytes() != before || !list.check_invariants() {
        return -1;
    }
    0
}

pub fn test_freelist_coalesce_neighbors() -> c_int {
    let mut list = fresh_list();
    let a = list.alloc(64);
    let b = list.alloc(64);
    let c = list.alloc(64);
    if a.is_null() || b.is_null() || c.is_null() {
        return -1;
    }
    // Free in an order that exercises both forward and backward merges.
    if !list.free(a) || !list.free(c) || !list.free(b) {
        return -1;
    }
    if !list.check_invariants() {
        return -1;
    }
    // Everything merged back: one allocation of nearly the region works.
    let big = list.alloc(list.largest_free());
    if big.is_null() {
        return -1;
    }
    0
}

pub fn test_freelist_accounting() -> c_int {
    let mut list = fresh_list();
    let total = list.free_bytes();
    let a = list.alloc(100);
    let b = list.alloc(200);
    if a.is_null() || b.is_null() {
        return -1;
    }
    if list.free_bytes() >= total {
        return -1;
    }
    list.free(a);
    list.free(b);
    if list.free_bytes() != total || !list.check_invariants() {
        return -1;
    }
    0
}

pub fn test_freelist_rejects_bad_header() -> c_int {
    let mut list = fresh_list();
    let a = list.alloc(64);
    if a.is_null() {
        return -1;
    }
    // Corrupt the header magic, then try to free.
    unsafe {
        let hdr = a.sub(core::mem::size_of::<usize>() * 3) as *mut usize;
        *hdr = 0xDEAD_BEEF;
    }
    if list.free(a) {
        return -1;
    }
    if !list.check_invariants() {
        return -1;
    }
    0
}

pub fn test_freelist_double_free_ignored() -> c_int {
    let mut list = fresh_list();
    let a = list.alloc(64);
    if !list.free(a) {
        return -1;
    }
    // The header magic flipped to FREE on the first free.
    if list.free(a) {
        return -1;
    }
    if !list.check_invariants() {
        return -1;
    }
    0
}

/// Aliasing model of a PSRAM chip: addresses wrap at the real size.
/// Only page-granular probe traffic exists, so one byte per page.
struct FakePsram {
    pages: [u8; 16 * MB / 4096],
    real_size: usize,
}

impl FakePsram {
    fn new(real_size: usize) -> Self {
        Self {
            pages: [0; 16 * MB / 4096],
            real_size,
        }
    }
}

impl PsramProbe for FakePsram {
    fn write(&mut self, offset: usize, value: u8) {
        if self.real_size == 0 {
            return;
        }
        self.pages[(offset % self.real_size) / 4096] = value;
    }

    fn read(&mut self, offset: usize) -> u8 {
        if self.real_size == 0 {
            // Floating bus: echo the low address bits.
            return (offset >> 12) as u8;
        }
        self.pages[(offset % self.real_size) / 4096]
    }
}

pub fn test_psram_detect_sizes() -> c_int {
    for mbytes in [1usize, 4, 8, 16] {
        let mut chip = FakePsram::new(mbytes * MB);
        if detect_size(&mut chip) != mbytes * MB {
            return -1;
        }
    }
    0
}

pub fn test_psram_detect_absent() -> c_int {
    let mut chip = FakePsram::new(0);
    if detect_size(&mut chip) != 0 {
        return -1;
    }
    0
}

pub fn test_ctx_alloc_tracks_and_sweeps() -> c_int {
    kernel_heap::heap_init();
    let free_before = kernel_heap::heap_free_bytes();
    {
        let mut allocs = CtxAllocations::new();
        let a = allocs.alloc(128);
        let b = allocs.calloc(4, 32);
        if a.is_null() || b.is_null() || allocs.len() != 2 {
            return -1;
        }
        // Leak b on purpose; free only a.
        allocs.free(a);
        if allocs.len() != 1 || allocs.is_tracked(a) {
            return -1;
        }
        // Drop sweeps the leak.
    }
    if kernel_heap::heap_free_bytes() != free_before {
        return -1;
    }
    0
}

pub fn test_ctx_realloc_preserves_contents() -> c_int {
    kernel_heap::heap_init();
    let mut allocs = CtxAllocations::new();
    let p = allocs.alloc(16);
    if p.is_null() {
        return -1;
    }
    unsafe {
        for i in 0..16 {
            *p.add(i) = i as u8;
        }
    }
    let q = allocs.realloc(p, 64);
    if q.is_null() {
        return -1;
    }
    for i in 0..16 {
        if unsafe { *q.add(i) } != i as u8 {
            return -1;
        }
    }
    0
}

define_test_suite!(
    mm,
    [
        test_freelist_alloc_alignment,
        test_freelist_zero_and_oversize,
        test_freelist_coalesce_neighbors,
        test_freelist_accounting,
        test_freelist_rejects_bad_header,
        test_freelist_double_free_ignored,
        test_psram_detect_sizes,
        test_psram_detect_absent,
        test_ctx_alloc_tracks_and_sweeps,
        test_ctx_realloc_preserves_contents,
    ]
);
