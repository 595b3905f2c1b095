//! Mock implementations of the engine's collaborators.
//!
//! These mocks script their responses and record every call so tests can
//! assert exactly how many completions, writes and runs happened.

use crate::error::{KintsugiError, Result as KintsugiResult};
use crate::llm::{FatalErrorClassifier, ProviderApiError};
use crate::project::FileStore;
use crate::runner::{RunOptions, TestExecutionResult, TestRunner};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// File store
// ============================================================================

/// In-memory file store.
///
/// Writes are visible to later reads, so a healing run that rewrites a test
/// reads back its own output.
///
/// # Example
///
/// ```rust,ignore
/// let files = MockFileStore::new()
///     .with_file("src/add.ts", "export const add = (a, b) => a + b;");
///
/// engine.write_test_file(&target, None).await?;
/// assert_eq!(files.write_count(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MockFileStore {
    files: Mutex<HashMap<PathBuf, String>>,
    writes: Mutex<Vec<(PathBuf, String)>>,
    write_error: Option<String>,
    read_count: AtomicU32,
}

impl MockFileStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file.
    #[must_use]
    pub fn with_file(self, path: &str, content: &str) -> Self {
        lock(&self.files).insert(PathBuf::from(path), content.to_string());
        self
    }

    /// Make every write fail with `error`.
    #[must_use]
    pub fn with_write_error(mut self, error: &str) -> Self {
        self.write_error = Some(error.to_string());
        self
    }

    /// Every successful write, in order.
    pub fn writes(&self) -> Vec<(PathBuf, String)> {
        lock(&self.writes).clone()
    }

    pub fn write_count(&self) -> usize {
        lock(&self.writes).len()
    }

    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::SeqCst)
    }

    /// Current content of `path`.
    pub fn file(&self, path: &str) -> Option<String> {
        lock(&self.files).get(Path::new(path)).cloned()
    }
}

#[async_trait]
impl FileStore for MockFileStore {
    async fn read_file(&self, path: &Path) -> Result<String> {
        self.read_count.fetch_add(1, Ordering::SeqCst);
        match lock(&self.files).get(path) {
            Some(content) => Ok(content.clone()),
            None => bail!("No such file: {}", path.display()),
        }
    }

    async fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(error) = &self.write_error {
            bail!("{}", error);
        }
        lock(&self.files).insert(path.to_path_buf(), content.to_string());
        lock(&self.writes).push((path.to_path_buf(), content.to_string()));
        Ok(())
    }

    async fn exists(&self, path: &Path) -> bool {
        lock(&self.files).contains_key(path)
    }
}

// ============================================================================
// Test runner
// ============================================================================

/// One scripted outcome for [`MockTestRunner`].
#[derive(Debug, Clone)]
pub enum MockRun {
    Result(TestExecutionResult),
    /// The runner itself failed (non-fatal).
    Error(String),
    /// A provider quota error surfaced through the runner.
    Quota(String),
}

/// Scripted test runner.
///
/// Replays outcomes in order, repeating the last one once the script is
/// exhausted. With no script, every run passes.
#[derive(Debug, Default)]
pub struct MockTestRunner {
    script: Mutex<VecDeque<MockRun>>,
    last: Mutex<Option<MockRun>>,
    calls: Mutex<Vec<(String, RunOptions)>>,
    call_count: AtomicU32,
}

impl MockTestRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_result(self, result: TestExecutionResult) -> Self {
        self.with_scripted(MockRun::Result(result))
    }

    #[must_use]
    pub fn with_pass(self) -> Self {
        self.with_result(TestExecutionResult::passed())
    }

    #[must_use]
    pub fn with_failure(self, stderr: &str) -> Self {
        self.with_result(TestExecutionResult::failed(1, stderr))
    }

    #[must_use]
    pub fn with_scripted(self, run: MockRun) -> Self {
        lock(&self.script).push_back(run);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every `(command, options)` pair received, in order.
    pub fn calls(&self) -> Vec<(String, RunOptions)> {
        lock(&self.calls).clone()
    }

    fn next_run(&self) -> Option<MockRun> {
        let next = lock(&self.script).pop_front();
        let mut last = lock(&self.last);
        match next {
            Some(run) => {
                *last = Some(run.clone());
                Some(run)
            }
            None => last.clone(),
        }
    }
}

#[async_trait]
impl TestRunner for MockTestRunner {
    async fn run_test(&self, command: &str, options: &RunOptions) -> Result<TestExecutionResult> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.calls).push((command.to_string(), options.clone()));

        match self.next_run() {
            Some(MockRun::Result(result)) => Ok(result),
            Some(MockRun::Error(message)) => bail!("{}", message),
            Some(MockRun::Quota(message)) => {
                Err(anyhow::Error::new(ProviderApiError::QuotaExceeded { message }))
            }
            None => Ok(TestExecutionResult::passed()),
        }
    }
}

// ============================================================================
// Fatal classifier
// ============================================================================

/// Classifier that treats messages containing any configured needle as fatal.
#[derive(Debug, Default)]
pub struct MockFatalClassifier {
    needles: Vec<String>,
    check_count: AtomicU32,
}

impl MockFatalClassifier {
    /// A classifier that never reports fatal errors.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_fatal_message(mut self, needle: &str) -> Self {
        self.needles.push(needle.to_string());
        self
    }

    pub fn check_count(&self) -> u32 {
        self.check_count.load(Ordering::SeqCst)
    }
}

impl FatalErrorClassifier for MockFatalClassifier {
    fn check(&self, error: &KintsugiError) -> KintsugiResult<()> {
        self.check_count.fetch_add(1, Ordering::SeqCst);
        let message = error.to_string();
        if self.needles.iter().any(|n| message.contains(n.as_str())) {
            return Err(KintsugiError::fatal(message));
        }
        Ok(())
    }
}
