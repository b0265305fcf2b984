//! Error types for tribunal-llm

use thiserror::Error;

/// Failures of a single text-generation call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    /// No API key configured for the provider
    #[error("missing API key for provider {provider}")]
    MissingApiKey { provider: String },

    /// Transport-level failure (DNS, TLS, connection reset)
    #[error("network error: {message}")]
    Network { message: String },

    /// Non-success HTTP status
    #[error("provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Provider throttled the request
    #[error("rate limited: {message}")]
    RateLimited { message: String },

    /// Response body could not be decoded
    #[error("failed to parse provider response: {message}")]
    Parse { message: String },

    /// Call exceeded its upper time bound
    #[error("generation timed out after {secs}s")]
    Timeout { secs: u64 },

    /// A scripted generator ran out of responses
    #[error("generator has no more responses")]
    Exhausted,
}

impl GenerationError {
    /// Whether a retry of the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::Network { .. }
            | GenerationError::RateLimited { .. }
            | GenerationError::Timeout { .. } => true,
            GenerationError::Http { status, .. } => *status >= 500 || *status == 408,
            GenerationError::MissingApiKey { .. }
            | GenerationError::Parse { .. }
            | GenerationError::Exhausted => false,
        }
    }
}

/// Result type for generation calls
pub type GenerationResult<T> = std::result::Result<T, GenerationError>;
