//! # Embeddings
//!
//! This crate provides the embedding side of finrag: the provider contract
//! consumed by ingestion and retrieval, an HTTP provider for
//! OpenAI-compatible endpoints, and a local hashing embedder used whenever a
//! remote provider fails.
//!
//! ## Features
//!
//! - **Provider contract**: [`EmbeddingProvider`] abstracts any text → vector
//!   service
//! - **Remote embeddings**: [`OpenAIProvider`] speaks the `/embeddings` API
//! - **Local fallback**: [`HashingEmbedder`] is pure and deterministic, so
//!   retrieval keeps working without network access
//! - **Similarity**: cosine similarity/distance and top-k selection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Embedding Path                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  text ──► EmbeddingProvider ──► Embedding ──► cosine_distance   │
//! │               │        │                                        │
//! │               ▼        ▼ (on error)                             │
//! │        OpenAIProvider  HashingEmbedder                          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod hashing;
pub mod provider;
pub mod similarity;

pub use error::{EmbeddingError, Result};
pub use hashing::HashingEmbedder;
pub use provider::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse, OpenAIProvider};
pub use similarity::{ScoredId, cosine_distance, cosine_similarity, l2_normalize, top_k};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;

/// Default embedding dimension (MiniLM-sized vectors).
pub const DEFAULT_DIMENSION: usize = 384;
