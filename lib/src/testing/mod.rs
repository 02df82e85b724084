//! In-kernel test tooling: suite descriptors, the run macros, and the
//! aggregate summary types. Suites are declared with
//! [`define_test_suite!`] and collected by the `tests` crate.

use core::ffi::c_int;

pub mod harness;

pub use harness::{HARNESS_MAX_SUITES, TestRunSummary, TestSuiteDesc, TestSuiteResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestResult {
    Pass,
    Fail,
}

impl TestResult {
    #[inline]
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// Run one `fn() -> c_int` test, logging failures by name.
pub fn run_single_test(name: &str, test: impl FnOnce() -> c_int) -> TestResult {
    if test() == 0 {
        TestResult::Pass
    } else {
        crate::klog_info!("TEST FAIL: {}", name);
        TestResult::Fail
    }
}

#[macro_export]
macro_rules! run_test {
    ($passed:expr, $total:expr, $test_fn:expr) => {{
        $total += 1;
        let result = $crate::testing::run_single_test(stringify!($test_fn), || $test_fn());
        if result.is_pass() {
            $passed += 1;
        }
        result
    }};
}

/// Declare a test suite: a runner function iterating the listed test
/// functions plus a registry descriptor the `tests` crate can collect.
#[macro_export]
macro_rules! define_test_suite {
    ($suite_name:ident, [$($test_fn:path),* $(,)?]) => {
        $crate::paste::paste! {
            pub fn [<run_ $suite_name _suite>](
                out: *mut $crate::testing::TestSuiteResult,
            ) -> i32 {
                let start = $crate::services::clock_ms();
                let mut passed = 0u32;
                let mut total = 0u32;

                $(
                    $crate::run_test!(passed, total, $test_fn);
                )*

                let elapsed = ($crate::services::clock_ms().saturating_sub(start)) as u32;

                if let Some(out_ref) = unsafe { out.as_mut() } {
                    *out_ref = $crate::testing::TestSuiteResult {
                        name: stringify!($suite_name),
                        total,
                        passed,
                        failed: total.saturating_sub(passed),
                        elapsed_ms: elapsed,
                    };
                }

                if passed == total { 0 } else { -1 }
            }

            #[used]
            #[unsafe(link_section = ".test_registry")]
            pub static [<$suite_name:upper _SUITE_DESC>]: $crate::testing::TestSuiteDesc =
                $crate::testing::TestSuiteDesc {
                    name: stringify!($suite_name),
                    run: Some([<run_ $suite_name _suite>]),
                };
        }
    };
}
