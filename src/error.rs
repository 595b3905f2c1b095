//! Custom error types for Kintsugi.
//!
//! Errors are grouped by how the healing loop reacts to them: generation
//! failures and verification failures are attempt-scoped, fatal provider
//! errors abort everything, and I/O errors are attempt-scoped until the
//! final attempt.

use crate::failure::text::truncate;
use crate::heal::FAILURE_EXCERPT_LEN;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Kintsugi operations
#[derive(Error, Debug)]
pub enum KintsugiError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    // =========================================================================
    // Generation Errors
    // =========================================================================
    /// The model returned no usable output
    #[error("Generation failed: {message}")]
    Generation { message: String },

    /// The model reply could not be parsed as an agentic action
    #[error("Unparsable agentic action: {message}")]
    AgenticParse { message: String, raw: String },

    /// The agentic loop ran out of iterations before the model produced code
    #[error("Agentic loop exceeded the maximum of {max} iterations without generating a test")]
    IterationCap { max: u32 },

    // =========================================================================
    // Verification Errors
    // =========================================================================
    /// The generated test still failed after every allowed attempt
    #[error("Test for {path} still failing after {attempts} attempts: {excerpt}")]
    Verification {
        path: PathBuf,
        attempts: u32,
        excerpt: String,
    },

    /// An error that ended the attempt loop: the final attempt's error, or
    /// one no retry can fix
    #[error(
        "Failed to write test for {path} on attempt {attempt} of {attempts}: {}",
        source_excerpt(.source)
    )]
    Attempt {
        path: PathBuf,
        attempt: u32,
        attempts: u32,
        #[source]
        source: Box<KintsugiError>,
    },

    // =========================================================================
    // Provider Errors
    // =========================================================================
    /// Provider-level condition that must abort all remaining work
    #[error("Fatal provider error: {message}")]
    FatalProvider { message: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KintsugiError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a generation error
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
        }
    }

    /// Create a fatal provider error
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::FatalProvider {
            message: message.into(),
        }
    }

    /// Wrap an error with the path of the file being healed and the attempt
    /// it surfaced on
    pub fn attempt(
        path: impl Into<PathBuf>,
        attempt: u32,
        attempts: u32,
        source: KintsugiError,
    ) -> Self {
        Self::Attempt {
            path: path.into(),
            attempt,
            attempts,
            source: Box::new(source),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::FatalProvider { .. } => true,
            Self::Attempt { source, .. } => source.is_fatal(),
            Self::Other(err) => err
                .downcast_ref::<KintsugiError>()
                .is_some_and(KintsugiError::is_fatal),
            _ => false,
        }
    }

    /// Check if another attempt could plausibly fix this error
    ///
    /// Configuration problems and fatal provider errors repeat identically on
    /// every attempt. Collaborator failures carried in `Other` are treated as
    /// transient unless they wrap one of those.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config { .. }
            | Self::InvalidConfig { .. }
            | Self::FatalProvider { .. }
            | Self::Verification { .. } => false,
            Self::Attempt { source, .. } => source.is_recoverable(),
            Self::Other(err) => err
                .downcast_ref::<KintsugiError>()
                .map_or(true, KintsugiError::is_recoverable),
            Self::Generation { .. }
            | Self::AgenticParse { .. }
            | Self::IterationCap { .. }
            | Self::Io(_)
            | Self::Json(_) => true,
        }
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::FatalProvider { .. } => 2,
            Self::Verification { .. } => 3,
            Self::Generation { .. } | Self::AgenticParse { .. } | Self::IterationCap { .. } => 4,
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            Self::Attempt { source, .. } => source.exit_code(),
            _ => 1,
        }
    }
}

fn source_excerpt(source: &KintsugiError) -> String {
    truncate(&source.to_string(), FAILURE_EXCERPT_LEN)
}

/// Type alias for Kintsugi results
pub type Result<T> = std::result::Result<T, KintsugiError>;

/// Extension trait for converting collaborator errors to KintsugiError
pub trait IntoKintsugiError<T> {
    fn into_kintsugi_config(self) -> Result<T>;
}

impl<T, E: Into<anyhow::Error>> IntoKintsugiError<T> for std::result::Result<T, E> {
    fn into_kintsugi_config(self) -> Result<T> {
        self.map_err(|e| KintsugiError::config(e.into().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_display_names_attempts() {
        let err = KintsugiError::Verification {
            path: PathBuf::from("src/add.test.ts"),
            attempts: 3,
            excerpt: "expected 3, received 4".into(),
        };
        let message = err.to_string();
        assert!(message.contains("after 3 attempts"));
        assert!(message.contains("src/add.test.ts"));
        assert!(message.contains("expected 3"));
    }

    #[test]
    fn test_iteration_cap_display_names_cap() {
        let err = KintsugiError::IterationCap { max: 5 };
        assert!(err.to_string().contains("maximum of 5 iterations"));
    }

    #[test]
    fn test_is_fatal() {
        assert!(KintsugiError::fatal("quota exceeded").is_fatal());
        assert!(!KintsugiError::generation("empty").is_fatal());
        assert!(!KintsugiError::config("bad").is_fatal());
    }

    #[test]
    fn test_is_fatal_through_attempt_wrapper() {
        let wrapped = KintsugiError::attempt("src/a.ts", 1, 3, KintsugiError::fatal("quota"));
        assert!(wrapped.is_fatal());

        let wrapped = KintsugiError::attempt("src/a.ts", 3, 3, KintsugiError::generation("empty"));
        assert!(!wrapped.is_fatal());
    }

    #[test]
    fn test_is_fatal_through_anyhow() {
        let err: KintsugiError = anyhow::Error::new(KintsugiError::fatal("quota")).into();
        assert!(err.is_fatal());

        let err: KintsugiError = anyhow::anyhow!("plain failure").into();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(KintsugiError::generation("no choices").is_recoverable());
        assert!(KintsugiError::IterationCap { max: 5 }.is_recoverable());
        assert!(!KintsugiError::fatal("quota").is_recoverable());
        assert!(!KintsugiError::config("escapes the project root").is_recoverable());
    }

    #[test]
    fn test_is_recoverable_through_anyhow() {
        let err: KintsugiError = anyhow::anyhow!("connection reset").into();
        assert!(err.is_recoverable());

        let err: KintsugiError = anyhow::Error::new(KintsugiError::config("bad path")).into();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(KintsugiError::fatal("quota").exit_code(), 2);
        assert_eq!(KintsugiError::config("bad").exit_code(), 7);
        assert_eq!(
            KintsugiError::attempt("a.ts", 2, 2, KintsugiError::generation("x")).exit_code(),
            4
        );
        assert_eq!(KintsugiError::Other(anyhow::anyhow!("x")).exit_code(), 1);
    }

    #[test]
    fn test_attempt_wrapper_display() {
        let err = KintsugiError::attempt("src/add.ts", 3, 3, KintsugiError::generation("no choices"));
        let message = err.to_string();
        assert!(message.contains("src/add.ts"));
        assert!(message.contains("on attempt 3 of 3"));
        assert!(message.contains("no choices"));
    }

    #[test]
    fn test_attempt_wrapper_bounds_source_text() {
        let err = KintsugiError::attempt(
            "src/add.ts",
            2,
            2,
            KintsugiError::generation("y".repeat(5000)),
        );
        let message = err.to_string();
        assert!(message.len() < FAILURE_EXCERPT_LEN + 120);
        assert!(message.ends_with("..."));
    }

    #[test]
    fn test_into_kintsugi_error_trait() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));

        match result.into_kintsugi_config() {
            Err(KintsugiError::Config { message, .. }) => {
                assert!(message.contains("file not found"));
            }
            other => panic!("Wrong error variant after conversion: {other:?}"),
        }
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: KintsugiError = io_err.into();
        assert!(matches!(err, KintsugiError::Io(_)));
        assert!(err.to_string().contains("access denied"));
    }
}
