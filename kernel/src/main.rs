//! Kernel image: boot wiring for the OS core.
//!
//! The board support package (scheduler glue, SD driver, PS/2 sampler,
//! scanline output, font) registers itself through the service hooks
//! before `kernel_main` runs; everything here is board-independent
//! bring-up order. Built for the bare target this is the firmware
//! entry; on a hosted target the same initialization runs the built-in
//! test suites instead, which is how the tree is exercised off-board.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

extern crate alloc;

use rookos_abi::task::PRIORITY_COMPOSITOR;
use rookos_fs::RamFat;
use rookos_lib::klog_info;
use rookos_lib::services::task;
use rookos_mm::kernel_heap;

/// Board-independent bring-up: heap, syscall table, filesystem,
/// window system.
fn init_common() {
    kernel_heap::heap_init();
    rookos_core::syscall::sys_table_init_core();

    // Fall back to a RAM volume until an SD card mounts; the `mount`
    // builtin retries through the registered hook.
    if !rookos_fs::fat::is_mounted() {
        let ramdisk: &'static RamFat = alloc::boxed::Box::leak(alloc::boxed::Box::new(RamFat::new()));
        rookos_fs::fat::register_volume(ramdisk);
        klog_info!("fs: RAM volume mounted");
    }

    rookos_wm::init();
    klog_info!("kernel: core services up");
}

/// Start the standing tasks: the compositor and the first terminal
/// with its shell.
fn start_tasks() {
    task::spawn(
        rookos_wm::compositor::compositor_task,
        0,
        PRIORITY_COMPOSITOR,
        "compositor",
    );
    rookos_wm::terminal::spawn_terminal_window();
}

#[cfg(target_os = "none")]
mod bare {
    use core::panic::PanicInfo;

    use rookos_lib::{klog_error, services};
    use rookos_mm::kernel_heap::KernelHeap;
    use rookos_mm::psram::{self, PsramProbe};

    #[global_allocator]
    static GLOBAL_ALLOCATOR: KernelHeap = KernelHeap;

    /// Probe access through the uncached PSRAM window. The cached
    /// window would fill the XIP cache with CS1 lines that fight CS0
    /// flash fetches on the shared QSPI bus.
    const PSRAM_UNCACHED_BASE: usize = 0x1500_0000;

    struct UncachedWindow;

    impl PsramProbe for UncachedWindow {
        fn write(&mut self, offset: usize, value: u8) {
            // SAFETY: the uncached window covers the full probe range.
            unsafe {
                core::ptr::write_volatile((PSRAM_UNCACHED_BASE + offset) as *mut u8, value)
            };
        }

        fn read(&mut self, offset: usize) -> u8 {
            // SAFETY: as above.
            unsafe { core::ptr::read_volatile((PSRAM_UNCACHED_BASE + offset) as *const u8) }
        }
    }

    /// Entry point, called by the boot shim after the BSP registered
    /// its services and the scheduler is ready to take tasks.
    #[unsafe(no_mangle)]
    pub extern "C" fn kernel_main() -> ! {
        super::init_common();

        let mut window = UncachedWindow;
        let size = psram::detect_size(&mut window);
        // SAFETY: the detected window is otherwise unused RAM.
        unsafe { psram::psram_heap_init(PSRAM_UNCACHED_BASE as *mut u8, size) };

        #[cfg(feature = "builtin-tests")]
        {
            rookos_tests::tests_reset_registry();
            rookos_tests::tests_register_system_suites();
            let mut summary = rookos_lib::testing::TestRunSummary::default();
            let _ = rookos_tests::tests_run_all(&mut summary);
        }

        super::start_tasks();

        // The scheduler owns every task from here; this thread idles.
        loop {
            rookos_lib::services::task::yield_now();
        }
    }

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        klog_error!("KERNEL PANIC: {}", info);
        // Visible LED pattern, then hang; only a hardfault-class stop.
        loop {
            services::board_led(true);
            busy_wait();
            services::board_led(false);
            busy_wait();
        }
    }

    fn busy_wait() {
        for _ in 0..2_000_000 {
            core::hint::spin_loop();
        }
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    fn stdout_backend(args: core::fmt::Arguments<'_>) {
        println!("{}", args);
    }
    rookos_lib::klog_register_backend(stdout_backend);

    init_common();

    #[cfg(feature = "builtin-tests")]
    let failed = {
        rookos_tests::tests_reset_registry();
        rookos_tests::tests_register_system_suites();
        let mut summary = rookos_lib::testing::TestRunSummary::default();
        rookos_tests::tests_run_all(&mut summary) != 0
    };
    #[cfg(not(feature = "builtin-tests"))]
    let failed = false;

    // Exercise the task wiring; with no scheduler registered the
    // spawns are inert.
    start_tasks();

    if failed {
        std::process::exit(1);
    }
}
