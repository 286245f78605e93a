//! # Retrieval Engine
//!
//! Hybrid retrieval and ranking over chunked personal-finance documents.
//! A question is rewritten, searched semantically and lexically at the same
//! time, and the two result sets are merged, nudged toward the sections the
//! rewrite flagged, and diversified.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Retrieval Engine                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   query + profile ──► QueryExpander ◄── TextGenerator           │
//! │                            │            (dictionary fallback)   │
//! │              ┌─────────────┴─────────────┐                      │
//! │              ▼                           ▼                      │
//! │     ┌──────────────┐            ┌──────────────┐                │
//! │     │    Vector    │            │   Keyword    │                │
//! │     │   channel    │            │ paged scan   │                │
//! │     └──────────────┘            └──────────────┘                │
//! │              │                           │                      │
//! │              └─────────────┬─────────────┘                      │
//! │                            ▼                                    │
//! │              fuse ──► section bias ──► MMR ──► passages         │
//! │                                                                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use finrag_retrieval::{RetrievalEngine, RetrievalRequest, UserProfile};
//!
//! let engine = RetrievalEngine::builder().build()?;
//! engine.add_document(guide_text, metadata).await?;
//!
//! let result = engine
//!     .retrieve(RetrievalRequest::new("What's my IRA limit?").with_profile(UserProfile::new().with_age(55)))
//!     .await?;
//! println!("{}", result.context_block());
//! ```

pub mod bias;
pub mod config;
pub mod diversify;
pub mod engine;
pub mod error;
pub mod expansion;
pub mod fusion;
pub mod generation;
pub mod keyword;
pub mod profile;
pub mod store;

pub use bias::apply_section_bias;
pub use config::{
    BiasConfig, EmbeddingConfig, ExpansionConfig, KeywordConfig, RetrievalConfig, SearchConfig,
};
pub use engine::{
    EmbeddingSource, IngestReport, RetrievalEngine, RetrievalEngineBuilder, RetrievalRequest,
    RetrievalResult,
};
pub use error::{GenerationError, Result, RetrievalError, StoreError, StoreResult};
pub use expansion::{ExpandedQuery, ExpansionSource, QueryExpander};
pub use fusion::{Channel, ScoredCandidate, fuse};
pub use generation::{CompletionRequest, OpenAIChatGenerator, TextGenerator};
pub use keyword::{KeywordHit, KeywordScan, KeywordScorer, ScanStats};
pub use profile::{FilingStatus, RiskTolerance, UserProfile};
pub use store::{
    DateRange, MemoryVectorStore, MetadataFilter, Record, Selector, StoredPassage, VectorMatch,
    VectorStore,
};

// Re-export from dependencies for convenience
pub use finrag_embeddings::{EmbeddingProvider, HashingEmbedder, OpenAIProvider};
pub use finrag_passages::{Metadata, Passage};
pub use tokio_util::sync::CancellationToken;
