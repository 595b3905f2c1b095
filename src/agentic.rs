//! Agentic context loop.
//!
//! A bounded exchange in which the model either asks for more project files
//! or returns the final test code:
//!
//! ```text
//! Awaiting ──request_files──▶ Awaiting (files appended to the conversation)
//!     │
//!     └──generate_test──▶ Done(code)
//! ```
//!
//! Only the iteration count is bounded here; request timeouts belong to the
//! completion client.

use crate::error::{KintsugiError, Result};
use crate::llm::{ChatCompletionClient, ChatCompletionRequest, ChatMessage, ResponseFormat};
use crate::project::FileStore;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// Completion rounds allowed before the loop gives up.
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// What the model asked for on one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AgenticAction {
    RequestFiles { files: Vec<String> },
    GenerateTest { code: String },
}

impl AgenticAction {
    /// Parse a model reply, tolerating a surrounding code fence.
    pub fn parse(raw: &str) -> Result<Self> {
        let body = strip_code_fence(raw);
        serde_json::from_str(body).map_err(|e| KintsugiError::AgenticParse {
            message: e.to_string(),
            raw: raw.to_string(),
        })
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Messages exchanged during one run. Append-only.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    messages: Vec<ChatMessage>,
}

impl ConversationState {
    /// A conversation seeded with `prompt` as the system message.
    pub fn seeded(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(prompt)],
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Drives the request-files / generate-test exchange.
pub struct AgenticLoop<'a> {
    client: &'a dyn ChatCompletionClient,
    files: &'a dyn FileStore,
    max_iterations: u32,
    temperature: f32,
}

impl<'a> AgenticLoop<'a> {
    pub fn new(client: &'a dyn ChatCompletionClient, files: &'a dyn FileStore) -> Self {
        Self {
            client,
            files,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            temperature: 0.2,
        }
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Run until the model returns code.
    ///
    /// # Errors
    ///
    /// - [`KintsugiError::Generation`] if a response has no choices
    /// - [`KintsugiError::AgenticParse`] if a reply is not a known action
    /// - [`KintsugiError::IterationCap`] if the model keeps requesting files
    /// - [`KintsugiError::Other`] for client failures
    pub async fn run(&self, initial_prompt: &str) -> Result<String> {
        let mut conversation = ConversationState::seeded(initial_prompt);

        for iteration in 1..=self.max_iterations {
            let request =
                ChatCompletionRequest::new(self.client.model_name(), conversation.messages().to_vec())
                    .with_temperature(self.temperature)
                    .with_response_format(ResponseFormat::JsonObject);

            let response = self.client.create_chat_completion(request).await?;
            let content = response.first_content().ok_or_else(|| {
                KintsugiError::generation("Completion returned no choices")
            })?;

            match AgenticAction::parse(content)? {
                AgenticAction::GenerateTest { code } => {
                    info!("Agentic loop produced a test after {} iteration(s)", iteration);
                    return Ok(code);
                }
                AgenticAction::RequestFiles { files } => {
                    debug!(
                        "Agentic iteration {}/{}: model requested {} file(s)",
                        iteration,
                        self.max_iterations,
                        files.len()
                    );
                    let reply = self.read_requested(&files).await;
                    conversation.push(ChatMessage::assistant(content));
                    conversation.push(ChatMessage::user(reply));
                }
            }
        }

        warn!(
            "Agentic loop hit the cap of {} iterations without a test",
            self.max_iterations
        );
        Err(KintsugiError::IterationCap {
            max: self.max_iterations,
        })
    }

    async fn read_requested(&self, files: &[String]) -> String {
        if files.is_empty() {
            return "No files were requested. Request at least one file or generate the test."
                .to_string();
        }

        let mut reply = String::from("Here are the requested files:\n");
        for file in files {
            let content = match self.files.read_file(Path::new(file)).await {
                Ok(content) => content,
                Err(e) => {
                    debug!("Requested file {} unavailable: {}", file, e);
                    format!("(file not found or unreadable: {})", e)
                }
            };
            reply.push_str(&format!("\n### {}\n```\n{}\n```\n", file, content.trim_end()));
        }
        reply
    }
}
