//! Default prompt templates.
//!
//! Projects override `generate` and `fix` through the `prompts` section of
//! their settings; the agentic protocol instructions are always appended
//! when the agentic loop drives generation.

use super::{PromptMarker, SKIP_SENTINEL};
use crate::config::PromptsConfig;

/// Initial generation prompt.
pub const GENERATE_TEMPLATE: &str = r#"You are an expert test engineer. Write a complete, runnable test file for the source file below.

## Source file: {{FILE_PATH}}

```
{{FILE_CONTENT}}
```

## Test file
Path: {{TEST_FILE_PATH}}
Framework: {{TEST_FRAMEWORK}}

{{TEST_FRAMEWORK_CONFIG}}

## Project conventions
Language: {{LANGUAGE}}

{{LANGUAGE_CONFIG}}

Linter:
{{LINTER_CONFIG}}

Formatter:
{{FORMATTER_CONFIG}}

## Existing test file
{{EXISTING_TEST}}

## Rules
- Import the code under test using paths relative to {{TEST_FILE_PATH}}.
- Cover the public behaviour, edge cases and error paths.
- Do not mock the module under test.
- Return only the test file content, with no surrounding prose or code fences.
- If the file has nothing worth testing (types only, re-exports, generated code), reply with exactly {{SKIP_SENTINEL}}.
"#;

/// Fix prompt used after a failed verification.
pub const FIX_TEMPLATE: &str = r#"The test file you wrote for {{FILE_PATH}} fails. Rewrite it so every test passes while still checking real behaviour.

## Source file: {{FILE_PATH}}

```
{{FILE_CONTENT}}
```

## Previous test file: {{TEST_FILE_PATH}}

```
{{PREVIOUS_TEST_CODE}}
```

## Failing tests

{{FAILING_TESTS}}

## Framework
{{TEST_FRAMEWORK}}

{{TEST_FRAMEWORK_CONFIG}}

## Rules
- Fix the tests, not the source file; assume the source is correct.
- Keep passing tests unchanged.
- Return only the complete corrected test file content, with no surrounding prose or code fences.
"#;

/// Appended to prompts run through the agentic loop.
pub const AGENTIC_INSTRUCTIONS: &str = r#"

## Response protocol
Reply with a single JSON object and nothing else. Either request more files:

{"action": "request_files", "files": ["relative/path/one.ts", "relative/path/two.ts"]}

or return the final test file:

{"action": "generate_test", "code": "<complete test file content>"}

Request only files you need (imports, types, fixtures). To skip this file, generate_test with code {{SKIP_SENTINEL}}.
"#;

/// The generate and fix templates in effect for a project.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    pub generate: String,
    pub fix: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            generate: GENERATE_TEMPLATE.to_string(),
            fix: FIX_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplates {
    /// Defaults with any project overrides applied.
    #[must_use]
    pub fn from_config(prompts: &PromptsConfig) -> Self {
        let defaults = Self::default();
        Self {
            generate: prompts.generate.clone().unwrap_or(defaults.generate),
            fix: prompts.fix.clone().unwrap_or(defaults.fix),
        }
    }

    /// `template` followed by the agentic response protocol.
    #[must_use]
    pub fn agentic(template: &str) -> String {
        let instructions =
            AGENTIC_INSTRUCTIONS.replace(PromptMarker::SkipSentinel.tag(), SKIP_SENTINEL);
        format!("{}{}", template.trim_end(), instructions)
    }

    /// Markers a fix template should contain but does not.
    ///
    /// Without them the model never sees what failed.
    #[must_use]
    pub fn missing_fix_markers(&self) -> Vec<PromptMarker> {
        [PromptMarker::PreviousTestCode, PromptMarker::FailingTests]
            .into_iter()
            .filter(|m| !self.fix.contains(m.tag()))
            .collect()
    }
}
