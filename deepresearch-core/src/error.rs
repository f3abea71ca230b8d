//! Error types for the deep research engine.
//!
//! Uses `thiserror` for public API error types with one enum per concern:
//! configuration, retrieval, extraction, and LLM backends. Only configuration
//! errors are fatal to a traversal; the others are recovered per branch.

/// Top-level error type for the research core library.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Report writer failed: {message}")]
    Writer { message: String },
}

/// Errors from the configuration system. Raised before any traversal starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Classified failures from a content retriever.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RetrievalError {
    #[error("Retrieval backend failed: {message}")]
    Backend { message: String },

    #[error("Retrieval timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

/// Classified failures from a learning extractor.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExtractionError {
    #[error("Extraction backend failed: {message}")]
    Backend { message: String },

    #[error("Extraction response could not be parsed: {message}")]
    MalformedResponse { message: String },

    #[error("Extraction timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

/// Errors from LLM completion backends.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider returned an empty response")]
    EmptyResponse,
}

impl From<LlmError> for ExtractionError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout { timeout_secs } => ExtractionError::Timeout { timeout_secs },
            other => ExtractionError::Backend {
                message: other.to_string(),
            },
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::ParseError {
            message: err.to_string(),
        }
    }
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Human-readable text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// A type alias for results using the top-level `ResearchError`.
pub type Result<T> = std::result::Result<T, ResearchError>;
