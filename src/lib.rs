//! Kintsugi - self-healing AI test generation
//!
//! Generates a test file for a source file with a chat-completion model,
//! runs it, and feeds failures back to the model until the test passes or
//! the attempt budget runs out.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`heal`] - The generate/write/verify/fix state machine and batch runs
//! - [`agentic`] - Bounded loop letting the model request project files
//! - [`prompt`] - Placeholder substitution for generate and fix prompts
//! - [`failure`] - Framework-agnostic parsing of failed test runs
//! - [`llm`] - Completion client trait, OpenAI-compatible client, fatal-error classifier
//! - [`runner`] - Test runner trait, subprocess runner, structured reports
//! - [`project`] - File store, test path strategy, batch target selection
//! - [`config`] - `.kintsugi/settings.json` loading and validation
//! - [`error`] - Custom error types and handling
//! - [`testing`] - Mocks and fixtures for the collaborators
//!
//! # Example
//!
//! ```rust,ignore
//! use kintsugi::heal::{Collaborators, HealingEngine};
//! use kintsugi::ProjectConfig;
//!
//! let config = ProjectConfig::load(project_dir)?;
//! let engine = HealingEngine::new(config, collaborators).with_project_dir(project_dir);
//!
//! let target = engine.prepare_target(Path::new("src/add.ts")).await?;
//! engine.write_test_file(&target, None).await?;
//! ```

pub mod agentic;
pub mod config;
pub mod error;
pub mod failure;
pub mod heal;
pub mod llm;
pub mod project;
pub mod prompt;
pub mod runner;
pub mod testing;

// Re-export commonly used types
pub use error::{IntoKintsugiError, KintsugiError, Result};

pub use config::{HealingMode, HealingPolicy, ProjectConfig, TestFrameworkDescriptor};

pub use heal::{BatchReport, Collaborators, HealOutcome, HealingEngine, TargetFile};

pub use agentic::{AgenticAction, AgenticLoop, ConversationState};

pub use failure::{parse_failing_tests, FailingTestDetail};

pub use prompt::{build_prompt, PromptContext, SKIP_SENTINEL};

pub use llm::{ChatCompletionClient, FatalErrorClassifier, ProviderFatalClassifier};

pub use runner::{ProcessTestRunner, TestExecutionResult, TestRunner};

pub use project::{FileStore, ProjectFileStore};
