//! Prompt assembly.
//!
//! Renders generate and fix prompts by substituting `{{MARKER}}`
//! placeholders with the target file, project descriptors and, on retry,
//! the previous attempt's code and failures.
//!
//! # Example
//!
//! ```
//! use kintsugi::prompt::{build_prompt, PromptContext};
//!
//! let ctx = PromptContext::new("src/add.ts", "export const add = (a, b) => a + b;")
//!     .with_test_path("src/add.test.ts");
//! let prompt = build_prompt("Test {{FILE_PATH}} with {{TEST_FRAMEWORK}}", &ctx);
//! assert_eq!(prompt, "Test src/add.ts with unknown framework");
//! ```

pub mod templates;

pub use templates::PromptTemplates;

use crate::config::{TestFrameworkDescriptor, ToolDescriptor};
use crate::failure::{format_failures, FailingTestDetail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Reply meaning "no test should be generated for this file".
pub const SKIP_SENTINEL: &str = "KINTSUGI_SKIP";

/// Substituted for `{{TEST_FRAMEWORK}}` when no framework is configured.
pub const UNKNOWN_FRAMEWORK: &str = "unknown framework";

/// Placeholders every prompt may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PromptMarker {
    FilePath,
    FileContent,
    TestFilePath,
    TestFramework,
    TestFrameworkConfig,
    Language,
    LanguageConfig,
    LinterConfig,
    FormatterConfig,
    ExistingTest,
    FailingTests,
    PreviousTestCode,
    SkipSentinel,
}

impl PromptMarker {
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            PromptMarker::FilePath => "{{FILE_PATH}}",
            PromptMarker::FileContent => "{{FILE_CONTENT}}",
            PromptMarker::TestFilePath => "{{TEST_FILE_PATH}}",
            PromptMarker::TestFramework => "{{TEST_FRAMEWORK}}",
            PromptMarker::TestFrameworkConfig => "{{TEST_FRAMEWORK_CONFIG}}",
            PromptMarker::Language => "{{LANGUAGE}}",
            PromptMarker::LanguageConfig => "{{LANGUAGE_CONFIG}}",
            PromptMarker::LinterConfig => "{{LINTER_CONFIG}}",
            PromptMarker::FormatterConfig => "{{FORMATTER_CONFIG}}",
            PromptMarker::ExistingTest => "{{EXISTING_TEST}}",
            PromptMarker::FailingTests => "{{FAILING_TESTS}}",
            PromptMarker::PreviousTestCode => "{{PREVIOUS_TEST_CODE}}",
            PromptMarker::SkipSentinel => "{{SKIP_SENTINEL}}",
        }
    }

    #[must_use]
    pub fn all() -> &'static [PromptMarker] {
        &[
            PromptMarker::FilePath,
            PromptMarker::FileContent,
            PromptMarker::TestFilePath,
            PromptMarker::TestFramework,
            PromptMarker::TestFrameworkConfig,
            PromptMarker::Language,
            PromptMarker::LanguageConfig,
            PromptMarker::LinterConfig,
            PromptMarker::FormatterConfig,
            PromptMarker::ExistingTest,
            PromptMarker::FailingTests,
            PromptMarker::PreviousTestCode,
            PromptMarker::SkipSentinel,
        ]
    }

    /// Parse a marker from its tag string.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<PromptMarker> {
        Self::all().iter().copied().find(|m| m.tag() == tag)
    }
}

impl fmt::Display for PromptMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Everything a prompt can be rendered from.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub file_path: String,
    pub file_content: String,
    pub test_file_path: String,
    pub framework: Option<TestFrameworkDescriptor>,
    pub language: Option<ToolDescriptor>,
    pub linter: Option<ToolDescriptor>,
    pub formatter: Option<ToolDescriptor>,
    pub existing_test: Option<String>,
    pub failing_tests: Vec<FailingTestDetail>,
    /// Raw output of the last failed run, used when no details parsed.
    pub failure_output: Option<String>,
    pub previous_test_code: Option<String>,
    /// Extra `{{KEY}}` values; keys are uppercased before matching.
    pub values: HashMap<String, serde_json::Value>,
}

impl PromptContext {
    pub fn new(file_path: impl Into<String>, file_content: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            file_content: file_content.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_test_path(mut self, path: impl Into<String>) -> Self {
        self.test_file_path = path.into();
        self
    }

    #[must_use]
    pub fn with_framework(mut self, framework: Option<TestFrameworkDescriptor>) -> Self {
        self.framework = framework;
        self
    }

    #[must_use]
    pub fn with_tools(
        mut self,
        language: Option<ToolDescriptor>,
        linter: Option<ToolDescriptor>,
        formatter: Option<ToolDescriptor>,
    ) -> Self {
        self.language = language;
        self.linter = linter;
        self.formatter = formatter;
        self
    }

    #[must_use]
    pub fn with_existing_test(mut self, content: Option<String>) -> Self {
        self.existing_test = content;
        self
    }

    /// Attach the previous attempt for a fix prompt.
    #[must_use]
    pub fn with_previous_attempt(
        mut self,
        code: impl Into<String>,
        failing_tests: Vec<FailingTestDetail>,
        failure_output: Option<String>,
    ) -> Self {
        self.previous_test_code = Some(code.into());
        self.failing_tests = failing_tests;
        self.failure_output = failure_output;
        self
    }

    #[must_use]
    pub fn with_values(mut self, values: HashMap<String, serde_json::Value>) -> Self {
        self.values = values;
        self
    }

    fn failing_tests_section(&self) -> String {
        if !self.failing_tests.is_empty() {
            return format_failures(&self.failing_tests);
        }
        match self.failure_output.as_deref().map(str::trim) {
            Some(output) if !output.is_empty() => format!("```\n{}\n```", output),
            _ => "No failing test details were captured.".to_string(),
        }
    }

    fn substitutions(&self) -> Vec<(PromptMarker, String)> {
        let framework_config = match &self.framework {
            Some(f) => render_config_block(
                &f.language,
                f.config_path.as_deref(),
                f.config_content.as_deref(),
                &format!("No {} configuration provided.", f.name),
            ),
            None => render_config_block("text", None, None, "No test framework configured."),
        };

        vec![
            (PromptMarker::FilePath, self.file_path.clone()),
            (PromptMarker::FileContent, self.file_content.clone()),
            (PromptMarker::TestFilePath, self.test_file_path.clone()),
            (
                PromptMarker::TestFramework,
                self.framework
                    .as_ref()
                    .map_or_else(|| UNKNOWN_FRAMEWORK.to_string(), TestFrameworkDescriptor::label),
            ),
            (PromptMarker::TestFrameworkConfig, framework_config),
            (
                PromptMarker::Language,
                self.language
                    .as_ref()
                    .map_or_else(|| "unknown language".to_string(), |l| l.name.clone()),
            ),
            (
                PromptMarker::LanguageConfig,
                tool_block(self.language.as_ref(), "language"),
            ),
            (PromptMarker::LinterConfig, tool_block(self.linter.as_ref(), "linter")),
            (
                PromptMarker::FormatterConfig,
                tool_block(self.formatter.as_ref(), "formatter"),
            ),
            (
                PromptMarker::ExistingTest,
                self.existing_test
                    .clone()
                    .unwrap_or_else(|| "No existing test file.".to_string()),
            ),
            (PromptMarker::FailingTests, self.failing_tests_section()),
            (
                PromptMarker::PreviousTestCode,
                self.previous_test_code.clone().unwrap_or_default(),
            ),
            (PromptMarker::SkipSentinel, SKIP_SENTINEL.to_string()),
        ]
    }
}

fn tool_block(tool: Option<&ToolDescriptor>, kind: &str) -> String {
    match tool {
        Some(t) => render_config_block(
            &t.language,
            t.config_path.as_deref(),
            t.config_content.as_deref(),
            &format!("No {} configuration provided.", t.name),
        ),
        None => render_config_block("text", None, None, &format!("No {} configured.", kind)),
    }
}

fn comment_prefix(language: &str) -> &'static str {
    match language {
        "yaml" | "yml" | "toml" | "ini" | "python" | "py" | "sh" | "bash" => "#",
        "html" | "xml" => "<!--",
        _ => "//",
    }
}

/// Render configuration as a fenced block tagged with `language`.
///
/// A path, when given, becomes a header comment; missing content is
/// replaced by `fallback` inside the same block.
#[must_use]
pub fn render_config_block(
    language: &str,
    config_path: Option<&str>,
    content: Option<&str>,
    fallback: &str,
) -> String {
    let mut block = format!("```{}\n", language);
    if let Some(path) = config_path {
        let prefix = comment_prefix(language);
        if prefix == "<!--" {
            block.push_str(&format!("<!-- {} -->\n", path));
        } else {
            block.push_str(&format!("{} {}\n", prefix, path));
        }
    }
    match content.map(str::trim_end).filter(|c| !c.trim().is_empty()) {
        Some(content) => block.push_str(content),
        None => block.push_str(fallback),
    }
    block.push_str("\n```");
    block
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => {
            let pretty = serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string());
            render_config_block("json", None, Some(&pretty), "null")
        }
    }
}

/// Render `template` against `ctx`.
///
/// Every occurrence of each marker is replaced. Extra values are matched as
/// `{{KEY}}` with the key uppercased; placeholders with no value are left
/// in place. Substitution is a single pass over the template, so
/// placeholder-like text inside substituted content is never rewritten.
#[must_use]
pub fn build_prompt(template: &str, ctx: &PromptContext) -> String {
    let mut values: HashMap<String, String> = ctx
        .substitutions()
        .into_iter()
        .map(|(marker, value)| (marker.tag().to_string(), value))
        .collect();

    let mut keys: Vec<&String> = ctx.values.keys().collect();
    keys.sort();
    for key in keys {
        let tag = format!("{{{{{}}}}}", key.to_uppercase());
        if template.contains(&tag) {
            values
                .entry(tag)
                .or_insert_with(|| render_value(&ctx.values[key]));
        }
    }

    let mut prompt = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        prompt.push_str(&rest[..start]);
        let candidate = &rest[start..];
        let tag = candidate.find("}}").map(|end| &candidate[..end + 2]);
        match tag.and_then(|tag| Some((tag, values.get(tag)?))) {
            Some((tag, value)) => {
                prompt.push_str(value);
                rest = &candidate[tag.len()..];
            }
            None => {
                prompt.push('{');
                rest = &candidate[1..];
            }
        }
    }
    prompt.push_str(rest);
    prompt
}
