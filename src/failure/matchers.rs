//! Failure matcher strategies.
//!
//! Each matcher recognises one output convention and returns `None` when the
//! output does not use it, so the parser can try the next one.

use super::text::{markup_excerpt, split_stack, strip_ansi};
use super::{FailingTestDetail, SUITE_FAILURE_NAME};
use crate::runner::report::AssertionResult;
use crate::runner::TestExecutionResult;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// One failure-output convention.
pub trait FailureMatcher: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Extract failing tests, or `None` if this convention is not present.
    fn extract(&self, result: &TestExecutionResult, test_path: &Path)
        -> Option<Vec<FailingTestDetail>>;
}

/// The built-in matchers in priority order.
#[must_use]
pub fn default_matchers() -> Vec<Box<dyn FailureMatcher>> {
    vec![
        Box::new(StructuredReportMatcher),
        Box::new(GlyphMarkerMatcher),
        Box::new(FailHeaderMatcher),
        Box::new(NumberedHeaderMatcher),
    ]
}

fn stripped_output(result: &TestExecutionResult) -> String {
    strip_ansi(&format!("{}\n{}", result.stdout, result.stderr))
}

fn detail_from_block(path: Vec<String>, block: &str) -> FailingTestDetail {
    let (error_message, stack_excerpt) = split_stack(block);
    let rendered_html = markup_excerpt(&error_message);
    FailingTestDetail::from_path(path)
        .with_error(error_message)
        .with_stack(stack_excerpt)
        .with_rendered_html(rendered_html)
}

// ============================================================================
// Structured report
// ============================================================================

/// Reads the runner's JSON report, keeping only entries for the target file.
pub struct StructuredReportMatcher;

impl StructuredReportMatcher {
    fn from_assertion(assertion: &AssertionResult) -> FailingTestDetail {
        let raw = strip_ansi(&assertion.failure_messages.join("\n"));
        let (mut message, stack) = split_stack(&raw);
        if let Some(diff) = assertion.assertion_diff() {
            if !message.contains("Expected:") {
                message = format!("{}\n\n{}", message, diff).trim().to_string();
            }
        }

        let full_name = if assertion.full_name.is_empty() {
            assertion
                .ancestor_titles
                .iter()
                .chain(std::iter::once(&assertion.title))
                .cloned()
                .collect::<Vec<_>>()
                .join(" ")
        } else {
            assertion.full_name.clone()
        };

        FailingTestDetail {
            test_name: assertion.title.clone(),
            full_name,
            ancestor_titles: assertion.ancestor_titles.clone(),
            rendered_html: markup_excerpt(&message),
            error_message: message,
            duration_ms: assertion.duration.map_or(0, |d| d.max(0.0).round() as u64),
            stack_excerpt: stack,
            source_snippet: None,
        }
    }
}

impl FailureMatcher for StructuredReportMatcher {
    fn name(&self) -> &'static str {
        "structured-report"
    }

    fn extract(
        &self,
        result: &TestExecutionResult,
        test_path: &Path,
    ) -> Option<Vec<FailingTestDetail>> {
        let entry = result.structured_report.as_ref()?.entry_for(test_path)?;

        let mut details: Vec<FailingTestDetail> = entry
            .failing_assertions()
            .map(Self::from_assertion)
            .collect();

        if details.is_empty() && entry.failed() && !entry.message.trim().is_empty() {
            let (message, stack) = split_stack(&strip_ansi(&entry.message));
            details.push(
                FailingTestDetail::named(SUITE_FAILURE_NAME)
                    .with_rendered_html(markup_excerpt(&message))
                    .with_error(message)
                    .with_stack(stack),
            );
        }

        (!details.is_empty()).then_some(details)
    }
}

// ============================================================================
// Glyph marker (Jest)
// ============================================================================

/// Jest-style blocks: `● describe › test name` followed by the error.
pub struct GlyphMarkerMatcher;

const GLYPH: &str = "● ";
const NAME_SEPARATOR: &str = " › ";

fn is_summary_line(trimmed: &str) -> bool {
    ["Test Suites:", "Tests:", "Snapshots:", "Time:", "Ran all test suites"]
        .iter()
        .any(|prefix| trimmed.starts_with(prefix))
}

impl FailureMatcher for GlyphMarkerMatcher {
    fn name(&self) -> &'static str {
        "glyph-marker"
    }

    fn extract(
        &self,
        result: &TestExecutionResult,
        _test_path: &Path,
    ) -> Option<Vec<FailingTestDetail>> {
        let output = stripped_output(result);
        let mut details = Vec::new();
        let mut current: Option<(Vec<String>, Vec<&str>)> = None;

        for line in output.lines() {
            let trimmed = line.trim();
            if let Some(name) = trimmed.strip_prefix(GLYPH) {
                if let Some((path, body)) = current.take() {
                    details.push(detail_from_block(path, &body.join("\n")));
                }
                // `● Console` introduces captured console output, not a failure.
                current = (name.trim() != "Console")
                    .then(|| (name.split(NAME_SEPARATOR).map(str::to_string).collect(), Vec::new()));
            } else if is_summary_line(trimmed) {
                if let Some((path, body)) = current.take() {
                    details.push(detail_from_block(path, &body.join("\n")));
                }
            } else if let Some((_, body)) = current.as_mut() {
                body.push(line);
            }
        }
        if let Some((path, body)) = current {
            details.push(detail_from_block(path, &body.join("\n")));
        }

        (!details.is_empty()).then_some(details)
    }
}

// ============================================================================
// FAIL header (Vitest)
// ============================================================================

/// Vitest-style blocks: `FAIL  file > describe > test name` followed by the
/// error and `❯` frames.
pub struct FailHeaderMatcher;

const FAIL_PREFIX: &str = "FAIL ";
const VITEST_SEPARATOR: &str = " > ";

/// Vitest separates failures with rules like `⎯⎯⎯[1/2]⎯`.
fn is_rule_line(trimmed: &str) -> bool {
    trimmed.contains('⎯')
        && trimmed
            .chars()
            .all(|c| matches!(c, '⎯' | '[' | ']' | '/') || c.is_ascii_digit())
}

impl FailureMatcher for FailHeaderMatcher {
    fn name(&self) -> &'static str {
        "fail-header"
    }

    fn extract(
        &self,
        result: &TestExecutionResult,
        _test_path: &Path,
    ) -> Option<Vec<FailingTestDetail>> {
        let output = stripped_output(result);
        let mut details = Vec::new();
        let mut current: Option<(Vec<String>, Vec<&str>)> = None;

        for line in output.lines() {
            let trimmed = line.trim();
            let header = trimmed
                .strip_prefix(FAIL_PREFIX)
                .filter(|rest| rest.contains(VITEST_SEPARATOR));

            if let Some(rest) = header {
                if let Some((path, body)) = current.take() {
                    details.push(detail_from_block(path, &body.join("\n")));
                }
                // First segment is the file.
                let path = rest
                    .trim()
                    .split(VITEST_SEPARATOR)
                    .skip(1)
                    .map(str::to_string)
                    .collect();
                current = Some((path, Vec::new()));
            } else if is_rule_line(trimmed) || trimmed.starts_with("Test Files ") {
                if let Some((path, body)) = current.take() {
                    details.push(detail_from_block(path, &body.join("\n")));
                }
            } else if let Some((_, body)) = current.as_mut() {
                body.push(line);
            }
        }
        if let Some((path, body)) = current {
            details.push(detail_from_block(path, &body.join("\n")));
        }

        (!details.is_empty()).then_some(details)
    }
}

// ============================================================================
// Numbered header (Mocha)
// ============================================================================

/// Mocha-style blocks after the `N failing` line: `1) suite` then indented
/// title lines ending in `:`, then the error.
pub struct NumberedHeaderMatcher;

fn failing_count_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\s*\d+ failing\s*$").ok())
        .as_ref()
}

fn numbered_header_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\s*\d+\) (.+)$").ok())
        .as_ref()
}

impl NumberedHeaderMatcher {
    fn finish(title: Vec<String>, body: &[&str]) -> FailingTestDetail {
        detail_from_block(title, &body.join("\n"))
    }
}

impl FailureMatcher for NumberedHeaderMatcher {
    fn name(&self) -> &'static str {
        "numbered-header"
    }

    fn extract(
        &self,
        result: &TestExecutionResult,
        _test_path: &Path,
    ) -> Option<Vec<FailingTestDetail>> {
        let failing = failing_count_pattern()?;
        let header = numbered_header_pattern()?;
        let output = stripped_output(result);

        let mut lines = output.lines().skip_while(|l| !failing.is_match(l));
        lines.next()?;

        let mut details = Vec::new();
        // (title parts, title complete, body)
        let mut current: Option<(Vec<String>, bool, Vec<&str>)> = None;

        for line in lines {
            if let Some(caps) = header.captures(line) {
                if let Some((title, _, body)) = current.take() {
                    details.push(Self::finish(title, &body));
                }
                let first = caps[1].trim();
                let complete = first.ends_with(':');
                current = Some((
                    vec![first.trim_end_matches(':').to_string()],
                    complete,
                    Vec::new(),
                ));
                continue;
            }

            let Some((title, complete, body)) = current.as_mut() else {
                continue;
            };
            let trimmed = line.trim();
            if !*complete && !trimmed.is_empty() {
                title.push(trimmed.trim_end_matches(':').to_string());
                *complete = trimmed.ends_with(':');
            } else {
                body.push(line);
            }
        }
        if let Some((title, _, body)) = current {
            details.push(Self::finish(title, &body));
        }

        (!details.is_empty()).then_some(details)
    }
}
