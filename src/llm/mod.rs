//! AI completion client abstraction.
//!
//! The healing engine only ever talks to a [`ChatCompletionClient`]: a
//! chat-completions style API taking role-tagged messages and returning a
//! list of choices. Concrete providers live in submodules; tests use
//! [`MockChatClient`], which replays a script of replies and records every
//! request it receives.
//!
//! # Example
//!
//! ```rust,ignore
//! use kintsugi::llm::{ChatCompletionClient, ChatCompletionRequest, ChatMessage};
//!
//! let request = ChatCompletionRequest::new("gpt-4o", vec![ChatMessage::user("Hello")]);
//! let response = client.create_chat_completion(request).await?;
//! println!("{}", response.first_content().unwrap_or_default());
//! ```

pub mod fatal;
pub mod openai;

pub use fatal::{FatalErrorClassifier, ProviderFatalClassifier};
pub use openai::{OpenAiCompatibleClient, ProviderApiError};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

// =============================================================================
// Wire Types
// =============================================================================

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single role-tagged message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Requested shape of the model's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
}

/// Request body for a chat completion.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub temperature: f32,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

impl ChatCompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.2,
            messages,
            response_format: None,
        }
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }
}

/// Message payload inside a choice. Providers may send `null` content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// One completion alternative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

/// Response from a chat completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

impl ChatCompletionResponse {
    /// Build a single-choice response.
    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            choices: vec![Choice {
                message: ChoiceMessage {
                    content: Some(content.into()),
                },
            }],
        }
    }

    /// Content of the first choice, if any choice was returned.
    ///
    /// A choice with `null` content yields an empty string.
    #[must_use]
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .map(|c| c.message.content.as_deref().unwrap_or_default())
    }
}

// =============================================================================
// Client Trait
// =============================================================================

/// Abstraction for chat-completion providers.
///
/// Object-safe and `Send + Sync` so the engine can hold an
/// `Arc<dyn ChatCompletionClient>`. Transport-level retries and timeouts are
/// the implementation's responsibility.
#[async_trait]
pub trait ChatCompletionClient: Send + Sync {
    /// Send a chat completion request.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider is unreachable, rejects the request,
    /// or replies with something that is not a completion response.
    async fn create_chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse>;

    /// Model identifier sent with each request.
    fn model_name(&self) -> &str;

    /// Whether the provider handles multi-turn, tool-style exchanges.
    ///
    /// Providers that don't are driven with a single-shot completion.
    fn supports_multi_turn(&self) -> bool {
        true
    }
}

// =============================================================================
// LLM Configuration
// =============================================================================

/// Configuration for the completion provider.
///
/// # Example settings.json
///
/// ```json
/// {
///   "llm": {
///     "provider": "openai",
///     "model": "gpt-4o",
///     "apiKeyEnv": "OPENAI_API_KEY"
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    /// Valid values: "openai", "local".
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL; defaults depend on the provider.
    #[serde(default)]
    pub api_base: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Let the model request extra files before answering.
    #[serde(default = "default_agentic")]
    pub agentic: bool,

    #[serde(default = "default_max_agentic_iterations")]
    pub max_agentic_iterations: u32,
}

/// Providers understood by [`create_client`].
pub const VALID_PROVIDERS: &[&str] = &["openai", "local"];

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_agentic() -> bool {
    true
}

fn default_max_agentic_iterations() -> u32 {
    crate::agentic::DEFAULT_MAX_ITERATIONS
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            temperature: default_temperature(),
            api_key_env: default_api_key_env(),
            api_base: None,
            timeout_secs: default_timeout_secs(),
            agentic: default_agentic(),
            max_agentic_iterations: default_max_agentic_iterations(),
        }
    }
}

impl LlmConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !VALID_PROVIDERS.contains(&self.provider.as_str()) {
            return Err(format!(
                "Invalid provider '{}'. Valid options: {}",
                self.provider,
                VALID_PROVIDERS.join(", ")
            ));
        }

        if self.model.trim().is_empty() {
            return Err("Model name must not be empty".to_string());
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!(
                "Temperature {} is out of range (0.0 - 2.0)",
                self.temperature
            ));
        }

        if self.max_agentic_iterations == 0 {
            return Err("maxAgenticIterations must be at least 1".to_string());
        }

        Ok(())
    }
}

/// Build a client for the configured provider.
pub fn create_client(config: &LlmConfig) -> Result<Box<dyn ChatCompletionClient>> {
    config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;

    let client = match config.provider.as_str() {
        "openai" => OpenAiCompatibleClient::new(&config.model),
        "local" => OpenAiCompatibleClient::local(&config.model),
        other => anyhow::bail!(
            "Unknown provider '{}'. Valid options: {}",
            other,
            VALID_PROVIDERS.join(", ")
        ),
    };

    let mut client = client
        .with_api_key_env(&config.api_key_env)
        .with_timeout(config.timeout_secs);
    if let Some(ref base) = config.api_base {
        client = client.with_api_base(base);
    }

    Ok(Box::new(client))
}

// =============================================================================
// Mock Client
// =============================================================================

/// One scripted reply for [`MockChatClient`].
#[derive(Debug, Clone)]
pub enum MockReply {
    /// A single choice with this content.
    Content(String),
    /// A response with zero choices.
    NoChoices,
    /// A non-fatal transport error.
    Error(String),
    /// A provider quota error (fatal to the healing loop).
    Quota(String),
}

/// Mock chat client for testing.
///
/// Replays scripted replies in order and records every request. Once the
/// script runs out, the last reply is repeated.
///
/// # Example
///
/// ```rust,ignore
/// let client = MockChatClient::new()
///     .with_reply("first")
///     .with_reply("second");
/// ```
#[derive(Debug)]
pub struct MockChatClient {
    model: String,
    multi_turn: bool,
    script: Mutex<VecDeque<MockReply>>,
    last: Mutex<Option<MockReply>>,
    requests: Mutex<Vec<ChatCompletionRequest>>,
    call_count: AtomicU32,
}

impl Default for MockChatClient {
    fn default() -> Self {
        Self {
            model: "mock-llm".to_string(),
            multi_turn: true,
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicU32::new(0),
        }
    }
}

impl MockChatClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply with the given content.
    #[must_use]
    pub fn with_reply(self, content: &str) -> Self {
        self.with_scripted(MockReply::Content(content.to_string()))
    }

    /// Queue an arbitrary scripted reply.
    #[must_use]
    pub fn with_scripted(self, reply: MockReply) -> Self {
        lock(&self.script).push_back(reply);
        self
    }

    #[must_use]
    pub fn with_model_name(mut self, name: &str) -> Self {
        self.model = name.to_string();
        self
    }

    #[must_use]
    pub fn with_multi_turn(mut self, supported: bool) -> Self {
        self.multi_turn = supported;
        self
    }

    /// Number of completion calls made so far.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Copies of every request received, in order.
    pub fn requests(&self) -> Vec<ChatCompletionRequest> {
        lock(&self.requests).clone()
    }

    fn next_reply(&self) -> Option<MockReply> {
        let next = lock(&self.script).pop_front();
        let mut last = lock(&self.last);
        match next {
            Some(reply) => {
                *last = Some(reply.clone());
                Some(reply)
            }
            None => last.clone(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl ChatCompletionClient for MockChatClient {
    async fn create_chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request);

        match self.next_reply() {
            Some(MockReply::Content(content)) => Ok(ChatCompletionResponse::with_content(content)),
            Some(MockReply::NoChoices) => Ok(ChatCompletionResponse::default()),
            Some(MockReply::Error(message)) => anyhow::bail!("{}", message),
            Some(MockReply::Quota(message)) => {
                Err(anyhow::Error::new(ProviderApiError::QuotaExceeded { message }))
            }
            None => anyhow::bail!("MockChatClient has no scripted reply"),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn supports_multi_turn(&self) -> bool {
        self.multi_turn
    }
}
