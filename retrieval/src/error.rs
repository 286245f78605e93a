//! Error types for the retrieval engine.
//!
//! Only [`RetrievalError`] reaches callers of `retrieve`. Generation errors
//! are recovered by dictionary expansion and never escape the engine.

use thiserror::Error;

/// Result type alias for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Result type alias for vector store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors reported by a vector store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached or failed internally.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A vector does not match the store's dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A record could not be written or read back.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// Errors from the text-generation provider.
#[derive(Error, Debug)]
pub enum GenerationError {
    /// Provider errored or returned nothing usable.
    #[error("generation provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Provider has no credentials.
    #[error("generation provider not configured")]
    ProviderNotConfigured,

    /// The provider answered with a non-success status.
    #[error("API request failed with status {status}: {message}")]
    ApiRequest { status: u16, message: String },

    /// Transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Reply did not contain the expected fields.
    #[error("malformed structured reply: {0}")]
    MalformedStructuredReply(String),

    /// Reply repeated the query without adding anything.
    #[error("degenerate expansion: reply added no terms")]
    Degenerate,
}

/// Errors surfaced by the retrieval engine.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Vector store failure. Fatal to the current call.
    #[error("vector store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
