//! Error types for embedding providers.

use thiserror::Error;

/// Result type alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Errors that can occur while producing embeddings.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// Provider has no credentials.
    #[error("embedding provider not configured")]
    ProviderNotConfigured,

    /// The provider answered with a non-success status.
    #[error("API request failed with status {status}: {message}")]
    ApiRequest { status: u16, message: String },

    /// The provider answered with an unusable body.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Vector length differs from what the caller expects.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
