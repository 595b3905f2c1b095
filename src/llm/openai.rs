//! OpenAI-compatible chat completions client.
//!
//! Talks to `{api_base}/chat/completions`, which covers OpenAI itself and the
//! local servers (llama.cpp, Ollama, LM Studio, vLLM) that mimic its API.
//! HTTP failures are mapped onto [`ProviderApiError`] so the fatal-error
//! classifier can tell a quota problem from a transient one.

use crate::llm::{ChatCompletionClient, ChatCompletionRequest, ChatCompletionResponse};
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

// =============================================================================
// Provider API Errors
// =============================================================================

/// Errors specific to completion provider interactions.
#[derive(Error, Debug)]
pub enum ProviderApiError {
    /// Rate limit exceeded.
    #[error("Rate limit exceeded: {message} (retry after {retry_after_secs}s)")]
    RateLimited {
        message: String,
        retry_after_secs: u64,
    },

    /// Account quota or credit exhausted.
    #[error("Quota exceeded: {message}")]
    QuotaExceeded { message: String },

    /// Authentication failed - check API key.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// API key not found in environment.
    #[error("API key not found in environment variable '{env_var}'")]
    ApiKeyNotFound { env_var: String },

    /// Invalid request - check prompt/parameters.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Server error - may be transient.
    #[error("Server error: {message}")]
    ServerError { message: String },

    /// Network/connection error.
    #[error("Connection error: {message}")]
    ConnectionError { message: String },

    /// Timeout waiting for response.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Context length exceeded.
    #[error("Context length exceeded: {message}")]
    ContextLengthExceeded { message: String },

    /// Invalid response from API.
    #[error("Invalid API response: {message}")]
    InvalidResponse { message: String },
}

impl ProviderApiError {
    /// Conditions no amount of retrying within this run will fix.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::QuotaExceeded { .. }
                | Self::AuthenticationFailed { .. }
                | Self::ApiKeyNotFound { .. }
        )
    }

    /// Parse error from HTTP status code and response body.
    pub fn from_response(status_code: u16, body: &str) -> Self {
        let body_lower = body.to_lowercase();

        match status_code {
            429 if body_lower.contains("insufficient_quota") || body_lower.contains("quota") => {
                Self::QuotaExceeded {
                    message: body.to_string(),
                }
            }
            429 => Self::RateLimited {
                message: body.to_string(),
                retry_after_secs: Self::extract_retry_after(body).unwrap_or(60),
            },
            401 | 403 => Self::AuthenticationFailed {
                message: body.to_string(),
            },
            400 => {
                if body_lower.contains("context_length") || body_lower.contains("maximum context")
                {
                    Self::ContextLengthExceeded {
                        message: body.to_string(),
                    }
                } else {
                    Self::InvalidRequest {
                        message: body.to_string(),
                    }
                }
            }
            500..=599 => Self::ServerError {
                message: body.to_string(),
            },
            _ => Self::InvalidResponse {
                message: format!("HTTP {}: {}", status_code, body),
            },
        }
    }

    /// Extract retry-after seconds from error response.
    fn extract_retry_after(body: &str) -> Option<u64> {
        let lower = body.to_lowercase();
        retry_after_patterns().iter().find_map(|pattern| {
            pattern
                .captures(&lower)?
                .get(1)?
                .as_str()
                .parse::<u64>()
                .ok()
        })
    }
}

fn retry_after_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"retry.?after[:\s]+(\d+)",
            r"try again in (\d+)",
            r"(\d+)\s*seconds?",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

// =============================================================================
// Client
// =============================================================================

/// Chat completions client for OpenAI and OpenAI-compatible servers.
///
/// # Example
///
/// ```rust,ignore
/// use kintsugi::llm::OpenAiCompatibleClient;
///
/// let client = OpenAiCompatibleClient::new("gpt-4o").with_timeout(60);
/// ```
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    model: String,
    api_key_env: String,
    api_base: String,
    timeout_secs: u64,
    /// Local servers usually run without authentication.
    require_api_key: bool,
    multi_turn: bool,
    /// Shared across requests so agentic turns reuse pooled connections.
    http: reqwest::Client,
}

impl OpenAiCompatibleClient {
    /// Default timeout for requests (2 minutes).
    pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

    /// Default API base URL.
    pub const DEFAULT_API_BASE: &'static str = "https://api.openai.com/v1";

    /// Default base URL for a local OpenAI-compatible server.
    pub const DEFAULT_LOCAL_API_BASE: &'static str = "http://localhost:11434/v1";

    /// Default API key environment variable.
    pub const DEFAULT_API_KEY_ENV: &'static str = "OPENAI_API_KEY";

    /// Create a client for the hosted OpenAI API.
    #[must_use]
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            api_key_env: Self::DEFAULT_API_KEY_ENV.to_string(),
            api_base: Self::DEFAULT_API_BASE.to_string(),
            timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
            require_api_key: true,
            multi_turn: true,
            http: reqwest::Client::new(),
        }
    }

    /// Create a client for a local server.
    ///
    /// Local models are driven single-shot; they rarely follow the agentic
    /// JSON protocol reliably.
    #[must_use]
    pub fn local(model: &str) -> Self {
        Self {
            api_base: Self::DEFAULT_LOCAL_API_BASE.to_string(),
            require_api_key: false,
            multi_turn: false,
            ..Self::new(model)
        }
    }

    /// Set the environment variable name for the API key.
    #[must_use]
    pub fn with_api_key_env(mut self, env_var: &str) -> Self {
        self.api_key_env = env_var.to_string();
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Set a custom API base URL (for Azure OpenAI, proxies, or local servers).
    #[must_use]
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// Full URL of the completions endpoint.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    fn api_key(&self) -> std::result::Result<Option<String>, ProviderApiError> {
        match env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(Some(key)),
            _ if self.require_api_key => Err(ProviderApiError::ApiKeyNotFound {
                env_var: self.api_key_env.clone(),
            }),
            _ => Ok(None),
        }
    }

    async fn execute_request(
        &self,
        request: &ChatCompletionRequest,
    ) -> std::result::Result<ChatCompletionResponse, ProviderApiError> {
        let api_key = self.api_key()?;

        debug!(
            "Sending {} message(s) to {} ({})",
            request.messages.len(),
            self.model,
            self.endpoint()
        );

        let mut builder = self
            .http
            .post(self.endpoint())
            .timeout(Duration::from_secs(self.timeout_secs))
            .header("Content-Type", "application/json")
            .json(request);
        if let Some(key) = api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderApiError::Timeout {
                    timeout_secs: self.timeout_secs,
                }
            } else {
                ProviderApiError::ConnectionError {
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderApiError::ConnectionError {
                message: format!("Failed to read response body: {}", e),
            })?;

        if !status.is_success() {
            return Err(ProviderApiError::from_response(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|e| ProviderApiError::InvalidResponse {
            message: format!("Failed to parse response: {} - Body: {}", e, body),
        })
    }
}

#[async_trait]
impl ChatCompletionClient for OpenAiCompatibleClient {
    async fn create_chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse> {
        Ok(self.execute_request(&request).await?)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn supports_multi_turn(&self) -> bool {
        self.multi_turn
    }
}
