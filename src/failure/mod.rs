//! Failure parsing.
//!
//! Normalises whatever a test run produced into [`FailingTestDetail`]s
//! without the caller knowing which framework ran:
//!
//! 1. the structured JSON report, when the runner wrote one
//! 2. plain-text conventions, tried in order by [`matchers`]
//! 3. a single [`SUITE_FAILURE_NAME`] entry carrying the raw output
//!
//! A passing run yields no details.
//!
//! # Example
//!
//! ```
//! use kintsugi::failure::parse_failing_tests;
//! use kintsugi::runner::TestExecutionResult;
//! use std::path::Path;
//!
//! let result = TestExecutionResult::failed(1, "  ● math › adds\n\n    Expected: 3\n");
//! let details = parse_failing_tests(&result, Path::new("math.test.ts"), "");
//! assert_eq!(details[0].test_name, "adds");
//! ```

pub mod matchers;
pub mod text;

pub use matchers::{default_matchers, FailureMatcher};
pub use text::strip_ansi;

use crate::runner::TestExecutionResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Test name of the synthetic entry used when nothing more specific parses.
pub const SUITE_FAILURE_NAME: &str = "Test Suite Failure";

/// One failing test, independent of the framework that reported it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailingTestDetail {
    pub test_name: String,
    pub full_name: String,
    pub ancestor_titles: Vec<String>,
    pub error_message: String,
    /// Markup the test was looking at when it failed.
    pub rendered_html: Option<String>,
    pub duration_ms: u64,
    pub stack_excerpt: Option<String>,
    /// Source of the failing test, located by name in the test file.
    pub source_snippet: Option<String>,
}

impl FailingTestDetail {
    /// A detail with no ancestors.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            full_name: name.clone(),
            test_name: name,
            ..Default::default()
        }
    }

    /// A detail from a qualified name such as `["describe", "test"]`.
    pub fn from_path(mut path: Vec<String>) -> Self {
        path.retain(|p| !p.trim().is_empty());
        let test_name = path.pop().unwrap_or_default();
        let full_name = path
            .iter()
            .chain(std::iter::once(&test_name))
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            test_name,
            full_name,
            ancestor_titles: path,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = message.into();
        self
    }

    #[must_use]
    pub fn with_stack(mut self, stack: Option<String>) -> Self {
        self.stack_excerpt = stack;
        self
    }

    #[must_use]
    pub fn with_rendered_html(mut self, html: Option<String>) -> Self {
        self.rendered_html = html;
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

impl fmt::Display for FailingTestDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "### {}", self.full_name)?;
        if !self.error_message.is_empty() {
            writeln!(f, "```\n{}\n```", self.error_message)?;
        }
        if let Some(stack) = &self.stack_excerpt {
            writeln!(f, "Stack:\n```\n{}\n```", stack)?;
        }
        if let Some(html) = &self.rendered_html {
            writeln!(f, "Rendered markup at failure:\n```html\n{}\n```", html)?;
        }
        if let Some(snippet) = &self.source_snippet {
            writeln!(f, "Failing test source:\n```\n{}\n```", snippet)?;
        }
        Ok(())
    }
}

/// Parses test output with an ordered list of matchers.
pub struct FailureParser {
    matchers: Vec<Box<dyn FailureMatcher>>,
}

impl Default for FailureParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FailureParser {
    /// A parser using [`default_matchers`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            matchers: default_matchers(),
        }
    }

    /// Append a matcher, tried after the existing ones.
    #[must_use]
    pub fn with_matcher(mut self, matcher: Box<dyn FailureMatcher>) -> Self {
        self.matchers.push(matcher);
        self
    }

    /// Failing tests for `test_path` in `result`.
    ///
    /// `test_source` is the content of the test file; it is used only to
    /// attach each failing test's source snippet.
    #[must_use]
    pub fn parse(
        &self,
        result: &TestExecutionResult,
        test_path: &Path,
        test_source: &str,
    ) -> Vec<FailingTestDetail> {
        if result.passed_for(test_path) {
            return Vec::new();
        }

        let mut details = self
            .matchers
            .iter()
            .find_map(|matcher| {
                let found = matcher.extract(result, test_path)?;
                debug!("{} matcher found {} failing test(s)", matcher.name(), found.len());
                Some(found)
            })
            .unwrap_or_else(|| vec![suite_failure(result)]);

        for detail in &mut details {
            detail.source_snippet = text::test_body_snippet(test_source, &detail.test_name);
        }
        details
    }
}

fn suite_failure(result: &TestExecutionResult) -> FailingTestDetail {
    let output = strip_ansi(&result.combined_output());
    let message = if output.is_empty() {
        format!("Test run failed with exit code {}", result.exit_code)
    } else {
        output
    };
    FailingTestDetail::named(SUITE_FAILURE_NAME)
        .with_error(message)
        .with_duration_ms(result.duration_ms)
}

/// Parse with the default matchers.
#[must_use]
pub fn parse_failing_tests(
    result: &TestExecutionResult,
    test_path: &Path,
    test_source: &str,
) -> Vec<FailingTestDetail> {
    FailureParser::new().parse(result, test_path, test_source)
}

/// Render details as a markdown section for a fix prompt.
#[must_use]
pub fn format_failures(details: &[FailingTestDetail]) -> String {
    details
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}
