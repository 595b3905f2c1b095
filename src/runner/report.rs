//! Structured test reports.
//!
//! The shape follows the Jest `--json` reporter, which Vitest's `json`
//! reporter also emits. Unknown fields are ignored.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Per-test status string used by passing assertions.
pub const STATUS_PASSED: &str = "passed";

/// Per-test status string used by failing assertions and files.
pub const STATUS_FAILED: &str = "failed";

/// Machine-readable summary of a test run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredReport {
    #[serde(default)]
    pub success: Option<bool>,

    #[serde(default)]
    pub num_failed_tests: u32,

    #[serde(default)]
    pub test_results: Vec<TestFileResult>,
}

/// Results for one test file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestFileResult {
    /// Path of the test file as reported by the runner (usually absolute).
    pub name: String,

    #[serde(default)]
    pub status: String,

    /// Suite-level failure text (e.g. a syntax error before any test ran).
    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub assertion_results: Vec<AssertionResult>,
}

/// Result of one test case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResult {
    pub title: String,

    #[serde(default)]
    pub full_name: String,

    #[serde(default)]
    pub ancestor_titles: Vec<String>,

    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub failure_messages: Vec<String>,

    /// Raw matcher details; may carry `expected`/`actual` for diffs.
    #[serde(default)]
    pub failure_details: Vec<serde_json::Value>,

    #[serde(default)]
    pub duration: Option<f64>,
}

impl StructuredReport {
    /// Parse a report from JSON text.
    pub fn parse(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Find the entry for a test file.
    ///
    /// Runners usually report absolute paths while callers hold
    /// project-relative ones, so either side may be a suffix of the other.
    #[must_use]
    pub fn entry_for(&self, test_path: &Path) -> Option<&TestFileResult> {
        self.test_results.iter().find(|result| {
            let reported = Path::new(&result.name);
            reported == test_path || reported.ends_with(test_path) || test_path.ends_with(reported)
        })
    }
}

impl TestFileResult {
    /// Whether this file failed, either at suite level or in any test.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.status == STATUS_FAILED || self.assertion_results.iter().any(AssertionResult::failed)
    }

    /// Assertions that did not pass (skipped and pending ones excluded).
    pub fn failing_assertions(&self) -> impl Iterator<Item = &AssertionResult> {
        self.assertion_results.iter().filter(|a| a.failed())
    }
}

impl AssertionResult {
    #[must_use]
    pub fn failed(&self) -> bool {
        self.status == STATUS_FAILED
    }

    /// Expected/actual diff from the first failure detail, if the matcher
    /// recorded one.
    #[must_use]
    pub fn assertion_diff(&self) -> Option<String> {
        self.failure_details.iter().find_map(|detail| {
            let result = detail.get("matcherResult").unwrap_or(detail);
            let expected = result.get("expected")?;
            let actual = result.get("actual")?;
            Some(format!("Expected: {}\nReceived: {}", expected, actual))
        })
    }
}
