#![no_std]

extern crate alloc;

pub mod ctx_alloc;
pub mod freelist;
pub mod kernel_heap;
pub mod psram;

pub mod tests;

pub use ctx_alloc::CtxAllocations;
pub use freelist::FreeList;
pub use kernel_heap::KernelHeap;

/// Allocate from PSRAM when present, falling back to the kernel heap.
/// Loaded application sections and large context buffers come from here.
pub fn alloc_pref_psram(size: usize) -> *mut u8 {
    let p = psram::psram_alloc(size);
    if !p.is_null() {
        return p;
    }
    kernel_heap::heap_alloc(size)
}

/// Free a pointer from either heap, routed by address range.
pub fn free_any(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    if psram::psram_contains(ptr) {
        psram::psram_free(ptr);
    } else {
        kernel_heap::heap_free(ptr);
    }
}
