//! Error types for passage chunking.

use thiserror::Error;

/// Result type alias for chunking operations.
pub type Result<T> = std::result::Result<T, ChunkError>;

/// Errors raised while walking a document's structure.
///
/// These never leave [`crate::DocumentChunker::chunk`]: any of them switches
/// the chunker to its fixed-size fallback.
#[derive(Error, Debug)]
pub enum ChunkError {
    /// The tokenizer could not encode or decode a span.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// The structural walk produced an inconsistent layout.
    #[error("structure error: {0}")]
    Structure(String),

    /// The tokenizer vocabulary could not be loaded.
    #[error("failed to load tokenizer vocabulary: {0}")]
    Vocabulary(String),
}
