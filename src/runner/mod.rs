//! Test execution.
//!
//! - [`TestRunner`] - the seam the healing engine runs tests through
//! - [`ProcessTestRunner`] - spawns the configured test command
//! - [`report`] - Jest-shaped structured reports

pub mod process;
pub mod report;

pub use process::ProcessTestRunner;
pub use report::StructuredReport;

use crate::config::TestFrameworkDescriptor;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Outcome of one test run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestExecutionResult {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub structured_report: Option<StructuredReport>,
}

impl TestExecutionResult {
    /// A passing run with no output.
    pub fn passed() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    /// A failing run with the given exit code and stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code,
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    #[must_use]
    pub fn with_report(mut self, report: StructuredReport) -> Self {
        self.structured_report = Some(report);
        self
    }

    /// Whether the run counts as a pass for `test_path`.
    ///
    /// A structured report is better evidence than the exit code: the
    /// wrapping package-manager command can exit non-zero for reasons that
    /// have nothing to do with this file. A file missing from the report
    /// counts as passed; that relies on the runner listing every file it
    /// executed.
    #[must_use]
    pub fn passed_for(&self, test_path: &Path) -> bool {
        match &self.structured_report {
            Some(report) => report
                .entry_for(test_path)
                .map_or(true, |entry| !entry.failed()),
            None => self.success,
        }
    }

    /// stderr and stdout joined, stderr first, skipping empty streams.
    #[must_use]
    pub fn combined_output(&self) -> String {
        [self.stderr.trim(), self.stdout.trim()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Options for one test run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub cwd: PathBuf,
    pub test_file_path: PathBuf,
    pub timeout_ms: u64,
    pub framework: Option<TestFrameworkDescriptor>,
}

/// Abstraction for running a test file.
///
/// Implementations own process spawning and wall-clock timeouts.
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Run `command` scoped to `options.test_file_path`.
    ///
    /// A test run that fails is `Ok` with `success == false`; `Err` means the
    /// runner itself could not be executed.
    async fn run_test(&self, command: &str, options: &RunOptions) -> Result<TestExecutionResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(json: &str) -> StructuredReport {
        StructuredReport::parse(json).unwrap()
    }

    #[test]
    fn test_passed_for_without_report_uses_exit_status() {
        assert!(TestExecutionResult::passed().passed_for(Path::new("a.test.ts")));
        assert!(!TestExecutionResult::failed(1, "boom").passed_for(Path::new("a.test.ts")));
    }

    #[test]
    fn test_report_overrides_nonzero_exit() {
        let result = TestExecutionResult::failed(1, "npm ERR! code ELIFECYCLE").with_report(report(
            r#"{"testResults":[{"name":"/p/src/a.test.ts","status":"passed","assertionResults":[]}]}"#,
        ));
        assert!(result.passed_for(Path::new("src/a.test.ts")));
    }

    #[test]
    fn test_report_failure_overrides_zero_exit() {
        let result = TestExecutionResult::passed().with_report(report(
            r#"{"testResults":[{"name":"/p/src/a.test.ts","status":"failed","assertionResults":[]}]}"#,
        ));
        assert!(!result.passed_for(Path::new("src/a.test.ts")));
    }

    #[test]
    fn test_file_absent_from_report_counts_as_passed() {
        let result = TestExecutionResult::failed(1, "").with_report(report(
            r#"{"testResults":[{"name":"/p/src/b.test.ts","status":"failed","assertionResults":[]}]}"#,
        ));
        assert!(result.passed_for(Path::new("src/a.test.ts")));
    }

    #[test]
    fn test_combined_output() {
        let result = TestExecutionResult::failed(1, "err\n").with_stdout("  out ");
        assert_eq!(result.combined_output(), "err\nout");
        assert_eq!(TestExecutionResult::passed().combined_output(), "");
    }
}
