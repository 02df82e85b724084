//! PSRAM size detection and heap.
//!
//! All PSRAM access on the real board goes through the uncached mapped
//! window; touching the cached window would fill the XIP cache with CS1
//! lines that contend with CS0 flash instruction fetches on the shared
//! QSPI bus. The probe therefore works against an abstract window the
//! board layer provides.

use rookos_lib::{SchedMutex, klog_info};

use crate::freelist::FreeList;

pub const MB: usize = 1 << 20;
const PROBE_STEP: usize = 4096;

/// Byte-level access to the uncached PSRAM window. Real hardware wires
/// this to volatile reads/writes; tests substitute an aliasing model.
pub trait PsramProbe {
    fn write(&mut self, offset: usize, value: u8);
    fn read(&mut self, offset: usize) -> u8;
}

/// Detect the PSRAM size in bytes.
///
/// Writes a marker per 4 KB page at progressively lower power-of-two
/// boundaries (16 → 8 → 4 → 1 MB). On a smaller chip the address lines
/// wrap, so later (lower) rounds overwrite what the top of the window
/// aliases to; the marker read back at the top names the real size.
/// Inconsistent reads across the top 1 MB mean no PSRAM: returns 0.
pub fn detect_size(probe: &mut dyn PsramProbe) -> usize {
    for page in (8 * MB..16 * MB).step_by(PROBE_STEP) {
        probe.write(page, 16);
    }
    for page in (4 * MB..8 * MB).step_by(PROBE_STEP) {
        probe.write(page, 8);
    }
    for page in (MB..4 * MB).step_by(PROBE_STEP) {
        probe.write(page, 4);
    }
    for page in (0..MB).step_by(PROBE_STEP) {
        probe.write(page, 1);
    }

    let marker = probe.read(16 * MB - PROBE_STEP);
    for page in ((16 * MB - MB)..16 * MB).step_by(PROBE_STEP) {
        if probe.read(page) != marker {
            return 0;
        }
    }
    (marker as usize) * MB
}

struct PsramState {
    list: FreeList,
    detected: usize,
}

static PSRAM: SchedMutex<PsramState> = SchedMutex::new(PsramState {
    list: FreeList::empty(),
    detected: 0,
});

/// Hand the detected window to the allocator.
///
/// # Safety
/// `base..base+size` must be the mapped, otherwise-unused PSRAM window.
pub unsafe fn psram_heap_init(base: *mut u8, size: usize) {
    PSRAM.with(|s| {
        s.detected = size;
        if size > 0 {
            unsafe { s.list.init(base, size) };
        }
    });
    if size > 0 {
        klog_info!("psram: {} MB heap ready", size / MB);
    } else {
        klog_info!("psram: not present");
    }
}

pub fn psram_is_available() -> bool {
    PSRAM.with(|s| s.detected > 0)
}

pub fn psram_detected_bytes() -> usize {
    PSRAM.with(|s| s.detected)
}

pub fn psram_free_bytes() -> usize {
    PSRAM.with(|s| s.list.free_bytes())
}

pub fn psram_alloc(size: usize) -> *mut u8 {
    PSRAM.with(|s| s.list.alloc(size))
}

#[inline]
pub fn psram_contains(ptr: *const u8) -> bool {
    PSRAM.with(|s| s.list.contains(ptr))
}

/// Free a PSRAM pointer. Pointers outside the PSRAM range belong to the
/// kernel heap and are routed there by `crate::free_any`.
pub fn psram_free(ptr: *mut u8) {
    PSRAM.with(|s| {
        s.list.free(ptr);
    });
}
