//! Recognition of provider-level fatal conditions.
//!
//! A fatal error (quota exhausted, rate limited, bad credentials) aborts the
//! whole healing run instead of burning the remaining attempts.

use crate::error::{KintsugiError, Result};
use crate::llm::ProviderApiError;
use regex::Regex;

/// Decides whether an error must abort all remaining work.
pub trait FatalErrorClassifier: Send + Sync {
    /// Return `Err` with a [`KintsugiError::FatalProvider`] for fatal
    /// conditions; `Ok(())` otherwise.
    fn check(&self, error: &KintsugiError) -> Result<()>;
}

/// Default classifier for chat-completion providers.
///
/// Looks for a [`ProviderApiError`] anywhere in the error chain first, then
/// falls back to matching well-known provider phrases in the message text.
pub struct ProviderFatalClassifier {
    patterns: Vec<Regex>,
}

impl ProviderFatalClassifier {
    #[must_use]
    pub fn new() -> Self {
        let patterns = [
            r"(?i)insufficient[_\s]quota",
            r"(?i)quota\s+(exceeded|exhausted)",
            r"(?i)exceeded your current quota",
            r"(?i)rate[_\s-]?limit(ed)?\s+(exceeded|reached)",
            r"(?i)billing (hard )?limit",
        ];

        Self {
            patterns: patterns
                .into_iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
        }
    }

    fn provider_error(error: &KintsugiError) -> Option<&ProviderApiError> {
        match error {
            KintsugiError::Other(inner) => inner
                .chain()
                .find_map(|cause| cause.downcast_ref::<ProviderApiError>()),
            KintsugiError::Attempt { source, .. } => Self::provider_error(source),
            _ => None,
        }
    }

    fn message_chain(error: &KintsugiError) -> String {
        let mut text = error.to_string();
        let mut source = std::error::Error::source(error);
        while let Some(cause) = source {
            text.push('\n');
            text.push_str(&cause.to_string());
            source = cause.source();
        }
        text
    }
}

impl Default for ProviderFatalClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl FatalErrorClassifier for ProviderFatalClassifier {
    fn check(&self, error: &KintsugiError) -> Result<()> {
        if let KintsugiError::FatalProvider { message } = error {
            return Err(KintsugiError::fatal(message.clone()));
        }
        if error.is_fatal() {
            return Err(KintsugiError::fatal(error.to_string()));
        }

        if let Some(provider) = Self::provider_error(error) {
            return if provider.is_fatal() {
                Err(KintsugiError::fatal(provider.to_string()))
            } else {
                Ok(())
            };
        }

        let text = Self::message_chain(error);
        if self.patterns.iter().any(|re| re.is_match(&text)) {
            return Err(KintsugiError::fatal(text));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(error: KintsugiError) -> Result<()> {
        ProviderFatalClassifier::new().check(&error)
    }

    #[test]
    fn test_quota_provider_error_is_fatal() {
        let err = KintsugiError::Other(anyhow::Error::new(ProviderApiError::QuotaExceeded {
            message: "no credit".into(),
        }));
        let fatal = classify(err).unwrap_err();
        assert!(matches!(fatal, KintsugiError::FatalProvider { .. }));
    }

    #[test]
    fn test_provider_error_behind_context_is_found() {
        let inner = anyhow::Error::new(ProviderApiError::RateLimited {
            message: "slow down".into(),
            retry_after_secs: 10,
        })
        .context("completion request failed");
        assert!(classify(KintsugiError::Other(inner)).is_err());
    }

    #[test]
    fn test_transient_provider_error_is_not_fatal() {
        let err = KintsugiError::Other(anyhow::Error::new(ProviderApiError::ServerError {
            message: "502 bad gateway".into(),
        }));
        assert!(classify(err).is_ok());
    }

    #[test]
    fn test_quota_message_text_is_fatal() {
        let err = KintsugiError::Other(anyhow::anyhow!(
            "You exceeded your current quota, please check your plan"
        ));
        assert!(classify(err).is_err());
    }

    #[test]
    fn test_already_fatal_error_passes_through() {
        assert!(classify(KintsugiError::fatal("quota")).is_err());
    }

    #[test]
    fn test_ordinary_errors_are_not_fatal() {
        assert!(classify(KintsugiError::generation("no choices")).is_ok());
        assert!(classify(KintsugiError::Io(std::io::Error::other("disk full"))).is_ok());
        assert!(classify(KintsugiError::Other(anyhow::anyhow!("test runner crashed"))).is_ok());
    }
}
