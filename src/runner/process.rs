//! Subprocess-backed test runner.

use super::{RunOptions, StructuredReport, TestExecutionResult, TestRunner};
use crate::config::{FILE_PLACEHOLDER, REPORT_PLACEHOLDER};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

/// Runs the configured test command through the platform shell.
///
/// The command template's `{file}` placeholder receives the test path and
/// `{report}` a fresh report path under `reports_dir`. The report file is
/// read back (and removed) after the run when the runner produced one.
#[derive(Debug, Clone)]
pub struct ProcessTestRunner {
    reports_dir: PathBuf,
}

impl ProcessTestRunner {
    pub fn new(reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            reports_dir: reports_dir.into(),
        }
    }

    fn shell() -> (&'static str, &'static str) {
        if cfg!(windows) {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        }
    }

    async fn load_report(path: &Path) -> Option<StructuredReport> {
        let content = tokio::fs::read_to_string(path).await.ok()?;
        let _ = tokio::fs::remove_file(path).await;
        match StructuredReport::parse(&content) {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Ignoring unparsable test report {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Quote a path for `sh -c` when it contains anything beyond safe characters.
fn shell_quote(value: &str) -> String {
    let safe = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | ':' | '\\'));
    if safe && !value.is_empty() {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// Substitute `{file}` and `{report}` in a command template.
#[must_use]
pub fn render_command(template: &str, test_file: &Path, report: &Path) -> String {
    template
        .replace(
            FILE_PLACEHOLDER,
            &shell_quote(&test_file.to_string_lossy()),
        )
        .replace(
            REPORT_PLACEHOLDER,
            &shell_quote(&report.to_string_lossy()),
        )
}

#[async_trait]
impl TestRunner for ProcessTestRunner {
    async fn run_test(&self, command: &str, options: &RunOptions) -> Result<TestExecutionResult> {
        let report_path = self.reports_dir.join(format!("{}.json", Uuid::new_v4()));
        let wants_report = command.contains(REPORT_PLACEHOLDER);
        if wants_report {
            tokio::fs::create_dir_all(&self.reports_dir)
                .await
                .with_context(|| format!("Failed to create {}", self.reports_dir.display()))?;
        }

        let rendered = render_command(command, &options.test_file_path, &report_path);
        if let Some(program) = rendered.split_whitespace().next() {
            if which::which(program).is_err() {
                warn!("Test command '{}' was not found on PATH", program);
            }
        }

        debug!(
            "Running tests for {} ({}): {}",
            options.test_file_path.display(),
            options
                .framework
                .as_ref()
                .map_or_else(|| "unknown framework".to_string(), |f| f.label()),
            rendered
        );

        let (shell, flag) = Self::shell();
        let start = Instant::now();
        let child = Command::new(shell)
            .arg(flag)
            .arg(&rendered)
            .current_dir(&options.cwd)
            .env("CI", "true")
            .env("FORCE_COLOR", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn test command: {}", rendered))?;

        let timeout = Duration::from_millis(options.timeout_ms);
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output.context("Failed to collect test output")?,
            Err(_) => {
                warn!(
                    "Test run for {} timed out after {}ms",
                    options.test_file_path.display(),
                    options.timeout_ms
                );
                return Ok(TestExecutionResult {
                    success: false,
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!("Test run timed out after {}ms", options.timeout_ms),
                    duration_ms: start.elapsed().as_millis() as u64,
                    structured_report: None,
                });
            }
        };

        let structured_report = if wants_report {
            Self::load_report(&report_path).await
        } else {
            None
        };

        Ok(TestExecutionResult {
            success: output.status.success(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_ms: start.elapsed().as_millis() as u64,
            structured_report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options(cwd: &Path, timeout_ms: u64) -> RunOptions {
        RunOptions {
            cwd: cwd.to_path_buf(),
            test_file_path: PathBuf::from("src/add.test.ts"),
            timeout_ms,
            framework: None,
        }
    }

    #[test]
    fn test_render_command_substitutes_placeholders() {
        let rendered = render_command(
            "npx jest {file} --json --outputFile={report}",
            Path::new("src/add.test.ts"),
            Path::new("/tmp/r.json"),
        );
        assert_eq!(
            rendered,
            "npx jest src/add.test.ts --json --outputFile=/tmp/r.json"
        );
    }

    #[test]
    fn test_render_command_quotes_paths_with_spaces() {
        let rendered = render_command("run {file}", Path::new("my dir/it's.ts"), Path::new("r"));
        assert_eq!(rendered, r"run 'my dir/it'\''s.ts'");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let temp = TempDir::new().unwrap();
        let runner = ProcessTestRunner::new(temp.path().join("reports"));

        let result = runner
            .run_test("echo running {file}; echo oops >&2; exit 3", &options(temp.path(), 10_000))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.exit_code, 3);
        assert!(result.stdout.contains("running src/add.test.ts"));
        assert!(result.stderr.contains("oops"));
        assert!(result.structured_report.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_loads_and_removes_structured_report() {
        let temp = TempDir::new().unwrap();
        let reports = temp.path().join("reports");
        let runner = ProcessTestRunner::new(&reports);

        let command = r#"echo '{"testResults":[{"name":"src/add.test.ts","status":"passed","assertionResults":[]}]}' > {report}; exit 1"#;
        let result = runner
            .run_test(command, &options(temp.path(), 10_000))
            .await
            .unwrap();

        let report = result.structured_report.as_ref().unwrap();
        assert_eq!(report.test_results.len(), 1);
        assert!(result.passed_for(Path::new("src/add.test.ts")));
        assert_eq!(std::fs::read_dir(&reports).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_yields_failed_result() {
        let temp = TempDir::new().unwrap();
        let runner = ProcessTestRunner::new(temp.path().join("reports"));

        let result = runner
            .run_test("sleep 5 # {file}", &options(temp.path(), 100))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.exit_code, -1);
        assert!(result.stderr.contains("timed out"));
    }
}
