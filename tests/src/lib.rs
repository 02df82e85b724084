//! Suite registry and runner for the in-kernel test harness.
//!
//! Each crate declares its suites with `define_test_suite!`; this crate
//! knows them all and drives the run, typically from the kernel's
//! `builtin-tests` boot path.

#![no_std]

use rookos_lib::testing::{HARNESS_MAX_SUITES, TestRunSummary, TestSuiteDesc, TestSuiteResult};
use rookos_lib::{StateCell, klog_info};

struct Registry {
    suites: [Option<&'static TestSuiteDesc>; HARNESS_MAX_SUITES],
    count: usize,
}

static REGISTRY: StateCell<Registry> = StateCell::new(Registry {
    suites: [None; HARNESS_MAX_SUITES],
    count: 0,
});

/// Every suite shipped in the tree.
static SYSTEM_SUITES: [&TestSuiteDesc; 7] = [
    &rookos_lib::tests::LIB_SUITE_DESC,
    &rookos_mm::tests::MM_SUITE_DESC,
    &rookos_fs::tests::FS_SUITE_DESC,
    &rookos_video::tests::VIDEO_SUITE_DESC,
    &rookos_gfx::tests::GFX_SUITE_DESC,
    &rookos_core::tests::CORE_RT_SUITE_DESC,
    &rookos_wm::tests::WM_SUITE_DESC,
];

pub fn tests_reset_registry() {
    REGISTRY.with_mut(|r| {
        r.suites = [None; HARNESS_MAX_SUITES];
        r.count = 0;
    });
}

pub fn tests_register_suite(desc: &'static TestSuiteDesc) -> i32 {
    if desc.run.is_none() {
        return -1;
    }
    REGISTRY.with_mut(|r| {
        if r.count >= HARNESS_MAX_SUITES {
            return -1;
        }
        r.suites[r.count] = Some(desc);
        r.count += 1;
        0
    })
}

pub fn tests_register_system_suites() {
    for desc in SYSTEM_SUITES {
        let _ = tests_register_suite(desc);
    }
}

/// Run every registered suite, filling `summary`. Returns 0 when all
/// tests passed.
pub fn tests_run_all(summary: &mut TestRunSummary) -> i32 {
    *summary = TestRunSummary::default();
    let count = REGISTRY.with(|r| r.count);
    for i in 0..count {
        let Some(desc) = REGISTRY.with(|r| r.suites[i]) else {
            continue;
        };
        let Some(run) = desc.run else { continue };
        let mut result = TestSuiteResult::default();
        klog_info!("TESTS: suite '{}'", desc.name);
        let rc = run(&mut result);
        summary.add_suite_result(&result);
        if rc != 0 {
            klog_info!(
                "TESTS: suite '{}' FAILED ({}/{} passed)",
                desc.name,
                result.passed,
                result.total
            );
        }
    }
    klog_info!(
        "TESTS: {} suites, {}/{} tests passed",
        summary.suite_count,
        summary.passed,
        summary.total_tests
    );
    if summary.all_passed() { 0 } else { -1 }
}
