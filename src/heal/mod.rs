//! Healing retry state machine.
//!
//! Per target file:
//!
//! ```text
//! [existing test] ──▶ Verify ──pass──▶ Done(already passing)
//!                        │fail
//!                        ▼
//!   Generate/Fix ──▶ Write ──▶ Verify ──pass──▶ Done(success)
//!        ▲                        │fail
//!        └────── attempts left ───┤
//!                                 └── none left ──▶ Done(failure)
//! ```
//!
//! With verification disabled by the [`HealingPolicy`] the first write is
//! accepted. Errors are classified first: fatal ones abort at once, others
//! count as a failed attempt until the last one, where they are returned
//! wrapped with the test path.

pub mod batch;

pub use batch::BatchReport;

use crate::agentic::AgenticLoop;
use crate::config::{HealingPolicy, ProjectConfig, TestFrameworkDescriptor};
use crate::error::{KintsugiError, Result};
use crate::failure::{format_failures, parse_failing_tests, text::truncate, FailingTestDetail};
use crate::llm::{ChatCompletionClient, ChatCompletionRequest, ChatMessage, FatalErrorClassifier};
use crate::project::FileStore;
use crate::prompt::{build_prompt, PromptContext, PromptTemplates, SKIP_SENTINEL};
use crate::runner::{RunOptions, TestExecutionResult, TestRunner};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Length of the failure excerpt embedded in a verification error.
pub const FAILURE_EXCERPT_LEN: usize = 500;

/// What is being tested and where its test lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFile {
    pub source_path: PathBuf,
    pub source_content: String,
    pub test_path: PathBuf,
    pub existing_test_content: Option<String>,
}

impl TargetFile {
    pub fn new(
        source_path: impl Into<PathBuf>,
        source_content: impl Into<String>,
        test_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            source_content: source_content.into(),
            test_path: test_path.into(),
            existing_test_content: None,
        }
    }

    #[must_use]
    pub fn with_existing_test(mut self, content: impl Into<String>) -> Self {
        self.existing_test_content = Some(content.into());
        self
    }
}

/// One pass through Generate/Fix, Write and Verify.
///
/// The loop hands the last failed attempt to the next one; nothing else
/// crosses iterations.
#[derive(Debug, Clone, Default)]
pub struct Attempt {
    pub number: u32,
    pub code: String,
    pub execution: Option<TestExecutionResult>,
    pub failures: Vec<FailingTestDetail>,
}

impl Attempt {
    /// Bounded description of why this attempt failed.
    #[must_use]
    pub fn failure_excerpt(&self) -> String {
        let text = if self.failures.is_empty() {
            self.execution
                .as_ref()
                .map(TestExecutionResult::combined_output)
                .unwrap_or_default()
        } else {
            self.failures
                .iter()
                .map(|f| format!("{}: {}", f.full_name, f.error_message))
                .collect::<Vec<_>>()
                .join("\n")
        };
        truncate(text.trim(), FAILURE_EXCERPT_LEN)
    }
}

/// How a single file finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealOutcome {
    /// Written and passing after `attempts` attempts.
    Verified { attempts: u32 },
    /// Written without running it.
    Unverified,
    /// The model asked to skip this file.
    Skipped,
    /// The existing test already passed; nothing was generated.
    AlreadyPassing,
}

/// State of a test file that existed before the run.
enum Existing {
    Passing,
    /// Failing; the run seeds the first fix prompt.
    Failing(Attempt),
    /// Could not be run; generate from scratch.
    Unknown,
}

/// Result of one attempt that did not error.
enum Step {
    Passed,
    Unverified,
    Skipped,
    Failed(Attempt),
}

/// Collaborators the engine drives.
#[derive(Clone)]
pub struct Collaborators {
    pub client: Arc<dyn ChatCompletionClient>,
    pub files: Arc<dyn FileStore>,
    pub runner: Arc<dyn TestRunner>,
    pub classifier: Arc<dyn FatalErrorClassifier>,
}

/// Generates, verifies and repairs test files.
pub struct HealingEngine {
    config: ProjectConfig,
    templates: PromptTemplates,
    project_dir: PathBuf,
    collaborators: Collaborators,
}

impl HealingEngine {
    pub fn new(config: ProjectConfig, collaborators: Collaborators) -> Self {
        let templates = PromptTemplates::from_config(&config.prompts);
        for marker in templates.missing_fix_markers() {
            warn!("Fix template does not contain {}", marker);
        }
        Self {
            config,
            templates,
            project_dir: PathBuf::from("."),
            collaborators,
        }
    }

    /// Directory tests are run from.
    #[must_use]
    pub fn with_project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: HealingPolicy) -> Self {
        self.config.healing = policy;
        self
    }

    #[must_use]
    pub fn policy(&self) -> &HealingPolicy {
        &self.config.healing
    }

    #[must_use]
    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// Build a [`TargetFile`] for `source_path`, reading the source and any
    /// existing test through the file store.
    pub async fn prepare_target(&self, source_path: &Path) -> Result<TargetFile> {
        let files = &self.collaborators.files;
        let source_content = files.read_file(source_path).await?;
        let test_path = self.config.output.test_path_for(source_path);

        let existing_test_content = if files.exists(&test_path).await {
            Some(files.read_file(&test_path).await?)
        } else {
            None
        };

        Ok(TargetFile {
            source_path: source_path.to_path_buf(),
            source_content,
            test_path,
            existing_test_content,
        })
    }

    /// Produce a verified test for `target`.
    ///
    /// # Errors
    ///
    /// - [`KintsugiError::FatalProvider`] as soon as a fatal error is seen
    /// - [`KintsugiError::Verification`] when every attempt failed its run
    /// - [`KintsugiError::Attempt`] when the final attempt errored
    pub async fn write_test_file(
        &self,
        target: &TargetFile,
        framework: Option<&TestFrameworkDescriptor>,
    ) -> Result<HealOutcome> {
        let policy = &self.config.healing;
        let attempts = policy.attempts();
        info!(
            "Healing {} -> {} ({} attempt(s))",
            target.source_path.display(),
            target.test_path.display(),
            attempts
        );

        let mut previous = match &target.existing_test_content {
            Some(existing) if policy.verifies() => {
                match self.check_existing(target, existing, framework).await? {
                    Existing::Passing => return Ok(HealOutcome::AlreadyPassing),
                    Existing::Failing(seed) => Some(seed),
                    Existing::Unknown => None,
                }
            }
            _ => None,
        };

        for number in 1..=attempts {
            debug!("Attempt {}/{} for {}", number, attempts, target.test_path.display());
            match self.attempt(number, target, framework, previous.as_ref()).await {
                Ok(Step::Passed) => {
                    info!("{} passed on attempt {}", target.test_path.display(), number);
                    return Ok(HealOutcome::Verified { attempts: number });
                }
                Ok(Step::Unverified) => {
                    info!("Wrote {} without verification", target.test_path.display());
                    return Ok(HealOutcome::Unverified);
                }
                Ok(Step::Skipped) => {
                    info!("Model skipped {}", target.source_path.display());
                    return Ok(HealOutcome::Skipped);
                }
                Ok(Step::Failed(attempt)) => {
                    warn!(
                        "Attempt {}/{} for {} failed with {} failing test(s)",
                        number,
                        attempts,
                        target.test_path.display(),
                        attempt.failures.len()
                    );
                    previous = Some(attempt);
                }
                Err(err) => {
                    self.collaborators.classifier.check(&err)?;
                    if number == attempts || !err.is_recoverable() {
                        return Err(KintsugiError::attempt(&target.test_path, number, attempts, err));
                    }
                    warn!(
                        "Attempt {}/{} for {} errored: {}",
                        number,
                        attempts,
                        target.test_path.display(),
                        err
                    );
                }
            }
        }

        let excerpt = previous
            .as_ref()
            .map(Attempt::failure_excerpt)
            .unwrap_or_default();
        Err(KintsugiError::Verification {
            path: target.test_path.clone(),
            attempts,
            excerpt,
        })
    }

    async fn check_existing(
        &self,
        target: &TargetFile,
        existing: &str,
        framework: Option<&TestFrameworkDescriptor>,
    ) -> Result<Existing> {
        match self.verify(&target.test_path, framework).await {
            Ok(result) if result.passed_for(&target.test_path) => {
                info!("Existing test {} already passes", target.test_path.display());
                Ok(Existing::Passing)
            }
            Ok(result) => {
                let failures = parse_failing_tests(&result, &target.test_path, existing);
                info!(
                    "Existing test {} fails ({} failing test(s)); repairing",
                    target.test_path.display(),
                    failures.len()
                );
                Ok(Existing::Failing(Attempt {
                    number: 0,
                    code: existing.to_string(),
                    execution: Some(result),
                    failures,
                }))
            }
            Err(err) => {
                self.collaborators.classifier.check(&err)?;
                warn!(
                    "Could not verify existing test {}: {}",
                    target.test_path.display(),
                    err
                );
                Ok(Existing::Unknown)
            }
        }
    }

    async fn attempt(
        &self,
        number: u32,
        target: &TargetFile,
        framework: Option<&TestFrameworkDescriptor>,
        previous: Option<&Attempt>,
    ) -> Result<Step> {
        let prompt = self.prompt_for(target, framework, previous);
        let code = self.generate(&prompt).await?;
        if code.trim() == SKIP_SENTINEL {
            return Ok(Step::Skipped);
        }

        self.collaborators
            .files
            .write_file(&target.test_path, &code)
            .await?;
        debug!("Wrote {} ({} bytes)", target.test_path.display(), code.len());

        if !self.config.healing.verifies() {
            return Ok(Step::Unverified);
        }

        let result = self.verify(&target.test_path, framework).await?;
        if result.passed_for(&target.test_path) {
            return Ok(Step::Passed);
        }

        let failures = parse_failing_tests(&result, &target.test_path, &code);
        Ok(Step::Failed(Attempt {
            number,
            code,
            execution: Some(result),
            failures,
        }))
    }

    fn prompt_for(
        &self,
        target: &TargetFile,
        framework: Option<&TestFrameworkDescriptor>,
        previous: Option<&Attempt>,
    ) -> String {
        let ctx = PromptContext::new(
            target.source_path.to_string_lossy(),
            target.source_content.clone(),
        )
        .with_test_path(target.test_path.to_string_lossy())
        .with_framework(framework.cloned())
        .with_tools(
            self.config.language.clone(),
            self.config.linter.clone(),
            self.config.formatter.clone(),
        )
        .with_existing_test(target.existing_test_content.clone())
        .with_values(self.config.prompts.values.clone());

        let prompt = match previous {
            Some(attempt) => {
                debug!(
                    "Building fix prompt from attempt {}:\n{}",
                    attempt.number,
                    format_failures(&attempt.failures)
                );
                let ctx = ctx.with_previous_attempt(
                    attempt.code.clone(),
                    attempt.failures.clone(),
                    attempt.execution.as_ref().map(TestExecutionResult::combined_output),
                );
                build_prompt(&self.templates.fix, &ctx)
            }
            None => build_prompt(&self.templates.generate, &ctx),
        };

        if self.uses_agentic_loop() {
            PromptTemplates::agentic(&prompt)
        } else {
            prompt
        }
    }

    fn uses_agentic_loop(&self) -> bool {
        self.config.llm.agentic && self.collaborators.client.supports_multi_turn()
    }

    /// Test code for `prompt`. Agentic `generate_test` code is used as
    /// returned; single-shot replies go through [`extract_code`].
    async fn generate(&self, prompt: &str) -> Result<String> {
        let client = self.collaborators.client.as_ref();
        if self.uses_agentic_loop() {
            return AgenticLoop::new(client, self.collaborators.files.as_ref())
                .with_max_iterations(self.config.llm.max_agentic_iterations)
                .with_temperature(self.config.llm.temperature)
                .run(prompt)
                .await;
        }

        let request =
            ChatCompletionRequest::new(client.model_name(), vec![ChatMessage::user(prompt)])
                .with_temperature(self.config.llm.temperature);
        let response = client.create_chat_completion(request).await?;
        response
            .first_content()
            .map(extract_code)
            .ok_or_else(|| KintsugiError::generation("Completion returned no choices"))
    }

    async fn verify(
        &self,
        test_path: &Path,
        framework: Option<&TestFrameworkDescriptor>,
    ) -> Result<TestExecutionResult> {
        let options = RunOptions {
            cwd: self.project_dir.clone(),
            test_file_path: test_path.to_path_buf(),
            timeout_ms: self.config.testing.timeout_ms,
            framework: framework.cloned(),
        };
        let result = self
            .collaborators
            .runner
            .run_test(&self.config.testing.command, &options)
            .await?;
        debug!(
            "Verification of {}: success={} exit={} ({}ms)",
            test_path.display(),
            result.success,
            result.exit_code,
            result.duration_ms
        );
        Ok(result)
    }
}

/// Test code from a single-shot model reply.
///
/// Replies sometimes wrap the whole file in a markdown fence despite
/// instructions. Only a reply that opens with a fence line and closes with a
/// fence is unwrapped; fences inside the code are kept. The result always
/// ends with a newline.
#[must_use]
pub fn extract_code(reply: &str) -> String {
    let trimmed = reply.trim();
    let fenced = trimmed
        .strip_prefix("```")
        .and_then(|rest| rest.split_once('\n'))
        .and_then(|(_, body)| body.trim_end().strip_suffix("```"));

    let code = fenced.unwrap_or(trimmed).trim_end();
    format!("{}\n", code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealingMode;
    use crate::llm::ProviderFatalClassifier;
    use crate::testing::{
        MockChatClient, MockFileStore, MockTestRunner, ADD_SOURCE, BROKEN_ADD_TEST, FIXED_ADD_TEST,
        JEST_BROKEN_OUTPUT,
    };

    struct Harness {
        client: Arc<MockChatClient>,
        files: Arc<MockFileStore>,
        runner: Arc<MockTestRunner>,
    }

    impl Harness {
        fn new(client: MockChatClient, runner: MockTestRunner) -> Self {
            Self {
                client: Arc::new(client.with_multi_turn(false)),
                files: Arc::new(MockFileStore::new().with_file("src/add.ts", ADD_SOURCE)),
                runner: Arc::new(runner),
            }
        }

        fn engine(&self) -> HealingEngine {
            HealingEngine::new(
                ProjectConfig::default(),
                Collaborators {
                    client: self.client.clone(),
                    files: self.files.clone(),
                    runner: self.runner.clone(),
                    classifier: Arc::new(ProviderFatalClassifier::new()),
                },
            )
        }
    }

    fn target() -> TargetFile {
        TargetFile::new("src/add.ts", ADD_SOURCE, "src/add.test.ts")
    }

    #[test]
    fn test_extract_code_plain_and_fenced() {
        assert_eq!(extract_code("  test('a', () => {});  "), "test('a', () => {});\n");
        assert_eq!(extract_code("```ts\nconst x = 1;\n```\n"), "const x = 1;\n");
        assert_eq!(extract_code("```\nconst x = 1;\n```"), "const x = 1;\n");
    }

    const MARKDOWN_TEST: &str = "import { render } from './md';\n\ntest('renders code block', () => {\n  const md = `\n```js\nlet a = 1;\n```\n`;\n  expect(render(md)).toContain('<code>');\n});\n";

    #[test]
    fn test_extract_code_keeps_inner_fences() {
        assert_eq!(extract_code(MARKDOWN_TEST), MARKDOWN_TEST);

        let wrapped = format!("```ts\n{}```", MARKDOWN_TEST);
        assert_eq!(extract_code(&wrapped), MARKDOWN_TEST);
    }

    #[tokio::test]
    async fn test_agentic_code_written_as_returned() {
        let client = MockChatClient::new().with_reply(&crate::testing::generate_action(MARKDOWN_TEST));
        let h = Harness {
            client: Arc::new(client),
            files: Arc::new(MockFileStore::new().with_file("src/md.ts", ADD_SOURCE)),
            runner: Arc::new(MockTestRunner::new().with_pass()),
        };
        let target = TargetFile::new("src/md.ts", ADD_SOURCE, "src/md.test.ts");

        let outcome = h.engine().write_test_file(&target, None).await.unwrap();

        assert_eq!(outcome, HealOutcome::Verified { attempts: 1 });
        assert_eq!(h.files.file("src/md.test.ts").as_deref(), Some(MARKDOWN_TEST));
    }

    #[test]
    fn test_failure_excerpt_is_bounded() {
        let attempt = Attempt {
            failures: vec![FailingTestDetail::named("big").with_error("x".repeat(2000))],
            ..Default::default()
        };
        let excerpt = attempt.failure_excerpt();
        assert!(excerpt.len() <= FAILURE_EXCERPT_LEN + 3);
        assert!(excerpt.starts_with("big: xxx"));
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let h = Harness::new(
            MockChatClient::new().with_reply(FIXED_ADD_TEST),
            MockTestRunner::new().with_pass(),
        );

        let outcome = h.engine().write_test_file(&target(), None).await.unwrap();

        assert_eq!(outcome, HealOutcome::Verified { attempts: 1 });
        assert_eq!(h.client.call_count(), 1);
        assert_eq!(h.files.write_count(), 1);
        assert_eq!(h.runner.call_count(), 1);
        assert_eq!(h.files.file("src/add.test.ts").as_deref(), Some(FIXED_ADD_TEST));
    }

    #[tokio::test]
    async fn test_fix_prompt_carries_previous_code_and_errors() {
        let h = Harness::new(
            MockChatClient::new()
                .with_reply(BROKEN_ADD_TEST)
                .with_reply(FIXED_ADD_TEST),
            MockTestRunner::new().with_failure(JEST_BROKEN_OUTPUT).with_pass(),
        );

        let outcome = h.engine().write_test_file(&target(), None).await.unwrap();

        assert_eq!(outcome, HealOutcome::Verified { attempts: 2 });
        let fix_prompt = &h.client.requests()[1].messages[0].content;
        assert!(fix_prompt.contains(BROKEN_ADD_TEST.trim_end()));
        assert!(fix_prompt.contains("Received: 3"));
        assert!(fix_prompt.contains("### add broken"));
    }

    #[tokio::test]
    async fn test_exhausted_attempts_report_count() {
        let h = Harness::new(
            MockChatClient::new().with_reply(BROKEN_ADD_TEST),
            MockTestRunner::new().with_failure(JEST_BROKEN_OUTPUT),
        );

        let err = h.engine().write_test_file(&target(), None).await.unwrap_err();

        assert!(matches!(err, KintsugiError::Verification { attempts: 3, .. }));
        assert!(err.to_string().contains("after 3 attempts"));
        assert!(err.to_string().contains("Received: 3"));
        assert_eq!(h.client.call_count(), 3);
        assert_eq!(h.runner.call_count(), 3);
    }

    #[tokio::test]
    async fn test_manual_mode_skips_verification() {
        let h = Harness::new(
            MockChatClient::new().with_reply(BROKEN_ADD_TEST),
            MockTestRunner::new().with_failure("never run"),
        );
        let policy = HealingPolicy {
            mode: HealingMode::Manual,
            ..Default::default()
        };

        let outcome = h
            .engine()
            .with_policy(policy)
            .write_test_file(&target(), None)
            .await
            .unwrap();

        assert_eq!(outcome, HealOutcome::Unverified);
        assert_eq!(h.runner.call_count(), 0);
        assert_eq!(h.files.write_count(), 1);
    }

    #[tokio::test]
    async fn test_non_fatal_error_then_success() {
        let h = Harness::new(
            MockChatClient::new()
                .with_scripted(crate::llm::MockReply::Error("connection reset".into()))
                .with_reply(FIXED_ADD_TEST),
            MockTestRunner::new().with_pass(),
        );

        let outcome = h.engine().write_test_file(&target(), None).await.unwrap();

        assert_eq!(outcome, HealOutcome::Verified { attempts: 2 });
        // No previous attempt to fix, so the retry is a fresh generation.
        assert!(h.client.requests()[1].messages[0].content.contains("Write a complete"));
    }

    #[tokio::test]
    async fn test_error_on_final_attempt_is_wrapped_with_path() {
        let h = Harness::new(
            MockChatClient::new().with_reply(FIXED_ADD_TEST),
            MockTestRunner::new(),
        );
        let files = Arc::new(MockFileStore::new().with_write_error("disk full"));
        let engine = HealingEngine::new(
            ProjectConfig::default(),
            Collaborators {
                client: h.client.clone(),
                files,
                runner: h.runner.clone(),
                classifier: Arc::new(ProviderFatalClassifier::new()),
            },
        )
        .with_policy(HealingPolicy::default().with_max_retries(2));

        let err = engine.write_test_file(&target(), None).await.unwrap_err();

        assert!(matches!(
            err,
            KintsugiError::Attempt {
                attempt: 2,
                attempts: 2,
                ..
            }
        ));
        let message = err.to_string();
        assert!(message.contains("src/add.test.ts"));
        assert!(message.contains("on attempt 2 of 2"));
        assert!(message.contains("disk full"));
        assert_eq!(h.client.call_count(), 2);
    }

    #[tokio::test]
    async fn test_unrecoverable_error_stops_retrying() {
        let temp = tempfile::TempDir::new().unwrap();
        let h = Harness::new(
            MockChatClient::new().with_reply(FIXED_ADD_TEST),
            MockTestRunner::new().with_pass(),
        );
        let engine = HealingEngine::new(
            ProjectConfig::default(),
            Collaborators {
                client: h.client.clone(),
                files: Arc::new(crate::project::ProjectFileStore::new(temp.path())),
                runner: h.runner.clone(),
                classifier: Arc::new(ProviderFatalClassifier::new()),
            },
        );
        let target = TargetFile::new("src/add.ts", ADD_SOURCE, "../outside/add.test.ts");

        let err = engine.write_test_file(&target, None).await.unwrap_err();

        assert!(matches!(
            err,
            KintsugiError::Attempt {
                attempt: 1,
                attempts: 3,
                ..
            }
        ));
        assert!(err.to_string().contains("escapes the project root"));
        assert_eq!(h.client.call_count(), 1);
        assert_eq!(h.runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_existing_failing_test_is_repaired() {
        let h = Harness::new(
            MockChatClient::new().with_reply(FIXED_ADD_TEST),
            MockTestRunner::new().with_failure(JEST_BROKEN_OUTPUT).with_pass(),
        );
        let target = target().with_existing_test(BROKEN_ADD_TEST);

        let outcome = h.engine().write_test_file(&target, None).await.unwrap();

        assert_eq!(outcome, HealOutcome::Verified { attempts: 1 });
        assert_eq!(h.runner.call_count(), 2);
        let prompt = &h.client.requests()[0].messages[0].content;
        assert!(prompt.contains(BROKEN_ADD_TEST.trim_end()));
        assert!(prompt.contains("Received: 3"));
    }

    #[tokio::test]
    async fn test_prepare_target_reads_existing_test() {
        let h = Harness::new(MockChatClient::new(), MockTestRunner::new());
        let engine = h.engine();

        let fresh = engine.prepare_target(Path::new("src/add.ts")).await.unwrap();
        assert_eq!(fresh.test_path, PathBuf::from("src/add.test.ts"));
        assert!(fresh.existing_test_content.is_none());

        h.files
            .write_file(Path::new("src/add.test.ts"), FIXED_ADD_TEST)
            .await
            .unwrap();
        let existing = engine.prepare_target(Path::new("src/add.ts")).await.unwrap();
        assert_eq!(existing.existing_test_content.as_deref(), Some(FIXED_ADD_TEST));
    }
}
