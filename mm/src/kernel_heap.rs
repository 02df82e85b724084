//! General kernel heap: the free-list core over a static SRAM arena,
//! usable as the binary's `#[global_allocator]`.

use core::alloc::{GlobalAlloc, Layout};

use rookos_lib::SchedMutex;
use spin::Once;

use crate::freelist::{ALLOC_ALIGN, FreeList};

/// SRAM set aside for the kernel heap. Everything dynamic that is not
/// PSRAM-preferred (contexts, strings, FD tables) lives here.
pub const KERNEL_HEAP_SIZE: usize = 256 * 1024;

#[repr(align(16))]
#[allow(dead_code)]
struct Arena([u8; KERNEL_HEAP_SIZE]);

static mut ARENA: Arena = Arena([0; KERNEL_HEAP_SIZE]);

static HEAP: SchedMutex<FreeList> = SchedMutex::new(FreeList::empty());
static HEAP_INIT: Once<()> = Once::new();

/// Initialize the heap over the static arena. Idempotent; called once
/// during boot before the first allocation.
pub fn heap_init() {
    HEAP_INIT.call_once(|| {
        let base = &raw mut ARENA as *mut u8;
        HEAP.with(|list| {
            // SAFETY: the arena is reserved for the heap and this runs
            // exactly once.
            unsafe { list.init(base, KERNEL_HEAP_SIZE) };
        });
    });
}

pub fn heap_alloc(size: usize) -> *mut u8 {
    HEAP.with(|list| list.alloc(size))
}

pub fn heap_free(ptr: *mut u8) {
    HEAP.with(|list| {
        list.free(ptr);
    });
}

pub fn heap_free_bytes() -> usize {
    HEAP.with(|list| list.free_bytes())
}

pub fn heap_total_bytes() -> usize {
    KERNEL_HEAP_SIZE
}

/// `GlobalAlloc` facade over the kernel heap.
///
/// Layouts aligned beyond the list's natural granularity are served by
/// over-allocating and stashing the raw pointer one word below the
/// aligned address.
pub struct KernelHeap;

unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let align = layout.align();
        let size = layout.size().max(1);
        if align <= ALLOC_ALIGN {
            return heap_alloc(size);
        }
        let total = size + align + core::mem::size_of::<usize>();
        let raw = heap_alloc(total);
        if raw.is_null() {
            return raw;
        }
        let aligned =
            (raw as usize + core::mem::size_of::<usize>() + align - 1) & !(align - 1);
        unsafe { *(aligned as *mut usize).sub(1) = raw as usize };
        aligned as *mut u8
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if ptr.is_null() {
            return;
        }
        if layout.align() <= ALLOC_ALIGN {
            heap_free(ptr);
            return;
        }
        let raw = unsafe { *(ptr as *mut usize).sub(1) } as *mut u8;
        heap_free(raw);
    }
}
