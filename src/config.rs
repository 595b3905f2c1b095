//! Configuration management for Kintsugi.
//!
//! Project settings live in `.kintsugi/settings.json`. Every field has a
//! default, so a missing file (or a partial one) still yields a usable
//! configuration.

use crate::error::{KintsugiError, Result};
use crate::llm::LlmConfig;
use crate::project::paths::OutputStrategy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Placeholder in the test command replaced with the test file path.
pub const FILE_PLACEHOLDER: &str = "{file}";

/// Placeholder in the test command replaced with the structured report path.
pub const REPORT_PLACEHOLDER: &str = "{report}";

// ============================================================================
// Healing Policy
// ============================================================================

/// How the healing loop is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealingMode {
    /// Verify every generated test and retry failures automatically.
    #[default]
    Auto,
    /// Generate once; the user runs and fixes tests themselves.
    Manual,
    /// Healing disabled entirely.
    Off,
}

/// Governs whether generated tests are executed and repaired.
///
/// Verification only happens when `enabled` is true *and* `mode` is
/// [`HealingMode::Auto`]; otherwise the first generated artifact is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealingPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub mode: HealingMode,

    /// Total attempts including the first generation. Always at least 1.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

impl Default for HealingPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: HealingMode::Auto,
            max_retries: default_max_retries(),
        }
    }
}

impl HealingPolicy {
    /// A policy that never runs tests.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            mode: HealingMode::Off,
            max_retries: 1,
        }
    }

    /// Set the attempt budget (clamped to at least one attempt).
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Whether generated tests should be executed and verified.
    #[must_use]
    pub fn verifies(&self) -> bool {
        self.enabled && self.mode == HealingMode::Auto
    }

    /// Number of attempts the loop may make.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        if self.verifies() {
            self.max_retries.max(1)
        } else {
            1
        }
    }
}

// ============================================================================
// Tool Descriptors
// ============================================================================

/// Describes the test framework the generated tests target.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestFrameworkDescriptor {
    pub name: String,

    #[serde(default)]
    pub version: Option<String>,

    /// Language tag used for fenced code blocks (e.g. `typescript`).
    #[serde(default)]
    pub language: String,

    #[serde(default)]
    pub config_path: Option<String>,

    #[serde(default)]
    pub config_content: Option<String>,
}

impl TestFrameworkDescriptor {
    pub fn new(name: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            language: language.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    #[must_use]
    pub fn with_config(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.config_path = Some(path.into());
        self.config_content = Some(content.into());
        self
    }

    /// Human-readable label, e.g. `jest 29.7.0`.
    #[must_use]
    pub fn label(&self) -> String {
        match &self.version {
            Some(version) => format!("{} {}", self.name, version),
            None => self.name.clone(),
        }
    }

    /// Whether this framework writes a Jest-shaped JSON report.
    #[must_use]
    pub fn emits_json_report(&self) -> bool {
        matches!(self.name.to_lowercase().as_str(), "jest" | "vitest")
    }
}

/// Describes a language, linter, or formatter used by the project.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,

    /// Language tag used for fenced code blocks (e.g. `json`, `yaml`).
    #[serde(default)]
    pub language: String,

    #[serde(default)]
    pub config_path: Option<String>,

    #[serde(default)]
    pub config_content: Option<String>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            language: language.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_config(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.config_path = Some(path.into());
        self.config_content = Some(content.into());
        self
    }
}

// ============================================================================
// Sections
// ============================================================================

/// How generated tests are executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestingConfig {
    /// Command template. `{file}` is replaced with the test path and
    /// `{report}` with a per-run structured report path.
    #[serde(default = "default_test_command")]
    pub command: String,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub framework: Option<TestFrameworkDescriptor>,
}

fn default_test_command() -> String {
    "npx jest {file} --json --outputFile={report}".to_string()
}

fn default_timeout_ms() -> u64 {
    120_000
}

impl Default for TestingConfig {
    fn default() -> Self {
        Self {
            command: default_test_command(),
            timeout_ms: default_timeout_ms(),
            framework: None,
        }
    }
}

/// Where generated tests are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    #[serde(default)]
    pub strategy: OutputStrategy,

    /// Root directory for [`OutputStrategy::Directory`].
    #[serde(default = "default_output_directory")]
    pub directory: String,

    /// Suffix inserted before the extension (e.g. `.test`, `.spec`).
    #[serde(default = "default_suffix")]
    pub suffix: String,
}

fn default_output_directory() -> String {
    "__tests__".to_string()
}

fn default_suffix() -> String {
    ".test".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            strategy: OutputStrategy::default(),
            directory: default_output_directory(),
            suffix: default_suffix(),
        }
    }
}

impl OutputConfig {
    /// Compute the test path for a source path.
    #[must_use]
    pub fn test_path_for(&self, source: &Path) -> PathBuf {
        self.strategy
            .test_path_for(source, Path::new(&self.directory), &self.suffix)
    }
}

/// Prompt template overrides and extra placeholder values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptsConfig {
    #[serde(default)]
    pub generate: Option<String>,

    #[serde(default)]
    pub fix: Option<String>,

    /// Extra values substituted as `{{KEY}}` (key uppercased).
    #[serde(default)]
    pub values: HashMap<String, serde_json::Value>,
}

// ============================================================================
// Project Configuration
// ============================================================================

/// Top-level project configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub healing: HealingPolicy,

    #[serde(default)]
    pub testing: TestingConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub language: Option<ToolDescriptor>,

    #[serde(default)]
    pub linter: Option<ToolDescriptor>,

    #[serde(default)]
    pub formatter: Option<ToolDescriptor>,

    #[serde(default)]
    pub prompts: PromptsConfig,

    /// Glob patterns selecting source files in batch mode.
    #[serde(default = "default_include")]
    pub include: Vec<String>,

    /// Glob patterns excluded from batch mode.
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
}

fn default_include() -> Vec<String> {
    vec!["src/**/*.ts".to_string(), "src/**/*.js".to_string()]
}

fn default_exclude() -> Vec<String> {
    vec![
        "**/*.test.*".to_string(),
        "**/*.spec.*".to_string(),
        "**/*.d.ts".to_string(),
        "**/node_modules/**".to_string(),
    ]
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            healing: HealingPolicy::default(),
            testing: TestingConfig::default(),
            output: OutputConfig::default(),
            language: None,
            linter: None,
            formatter: None,
            prompts: PromptsConfig::default(),
            include: default_include(),
            exclude: default_exclude(),
        }
    }
}

impl ProjectConfig {
    /// Load configuration from a project directory.
    ///
    /// Returns defaults when no settings file exists.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let settings_path = Self::settings_path(project_dir);

        if !settings_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&settings_path)?;
        serde_json::from_str(&content).map_err(|e| {
            KintsugiError::config_with_path(format!("failed to parse: {e}"), settings_path)
        })
    }

    /// Get the settings.json path for a project
    pub fn settings_path(project_dir: &Path) -> PathBuf {
        project_dir.join(".kintsugi/settings.json")
    }

    /// Directory holding per-run structured test reports.
    pub fn reports_dir(project_dir: &Path) -> PathBuf {
        project_dir.join(".kintsugi/reports")
    }

    /// Check the configuration for values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        self.llm
            .validate()
            .map_err(|reason| KintsugiError::invalid_config("llm", reason))?;

        if self.healing.max_retries == 0 {
            return Err(KintsugiError::invalid_config(
                "healing.maxRetries",
                "must be at least 1",
            ));
        }

        if !self.testing.command.contains(FILE_PLACEHOLDER) {
            return Err(KintsugiError::invalid_config(
                "testing.command",
                format!("must contain the {FILE_PLACEHOLDER} placeholder"),
            ));
        }

        if self.testing.timeout_ms == 0 {
            return Err(KintsugiError::invalid_config(
                "testing.timeoutMs",
                "must be greater than zero",
            ));
        }

        Ok(())
    }
}
