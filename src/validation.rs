//! Parsing and validation of test-runner output.
//!
//! The parser is line-oriented: a `PASSED ` prefix yields a passed test
//! identifier, a `FAILED ` prefix yields a failed one (the part before the
//! ` - ` reason separator). Unrecognized lines are ignored.
//!
//! Whether the test runner itself executed correctly is decided by parse
//! success, not exit code: pytest and friends exit non-zero when individual
//! tests fail while still producing valid structured output.

use serde::{Deserialize, Serialize};
use tracing::warn;

const PASSED_MARKER: &str = "PASSED ";
const FAILED_MARKER: &str = "FAILED ";
const FAILURE_REASON_SEPARATOR: &str = " - ";

/// Structured pass/fail sets parsed from raw test output.
///
/// Derived data: recomputed each time output is parsed, never persisted on
/// its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResults {
    pub passed: Vec<String>,
    pub failed: Vec<String>,
    pub output: String,
}

impl TestResults {
    /// Parses raw test output into passed and failed test identifiers.
    pub fn parse(test_output: &str) -> Self {
        let mut passed = Vec::new();
        let mut failed = Vec::new();

        for line in test_output.lines() {
            if let Some(rest) = line.strip_prefix(PASSED_MARKER) {
                passed.push(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix(FAILED_MARKER) {
                let name = rest
                    .split(FAILURE_REASON_SEPARATOR)
                    .next()
                    .unwrap_or(rest)
                    .trim();
                failed.push(name.to_string());
            }
        }

        Self {
            passed,
            failed,
            output: test_output.to_string(),
        }
    }

    /// True when the output parsed into at least the expected structure.
    ///
    /// An output with no recognizable pass/fail lines means the test runner
    /// itself did not execute correctly (infrastructure failure), as opposed
    /// to tests failing.
    pub fn is_structured(&self) -> bool {
        !self.passed.is_empty() || !self.failed.is_empty()
    }

    /// Infrastructure-failure classification. Exit code alone is not
    /// consulted here.
    pub fn infrastructure_failed(&self) -> bool {
        !self.is_structured()
    }
}

/// Outcome of checking parsed results against the expected test-state sets,
/// with the exact identifiers that were missing for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Expected-failing tests that were not in the failed set.
    pub missing_from_failed: Vec<String>,
    /// Expected-passing tests that were not in the passed set.
    pub missing_from_passed: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.missing_from_failed.is_empty() && self.missing_from_passed.is_empty()
    }
}

/// Validates that test results match the expected state: every test in
/// `fail_to_pass` must currently be failing and every test in
/// `pass_to_pass` must currently be passing.
pub fn validate_test_results(
    results: &TestResults,
    fail_to_pass: &[String],
    pass_to_pass: &[String],
) -> ValidationReport {
    let mut report = ValidationReport::default();

    for test in fail_to_pass {
        if !results.failed.contains(test) {
            warn!(
                test = %test,
                failed = ?results.failed,
                "Expected test to be failing, but it was not in failed tests"
            );
            report.missing_from_failed.push(test.clone());
        }
    }

    for test in pass_to_pass {
        if !results.passed.contains(test) {
            warn!(
                test = %test,
                passed = ?results.passed,
                "Expected test to be passing, but it was not in passed tests"
            );
            report.missing_from_passed.push(test.clone());
        }
    }

    report
}
