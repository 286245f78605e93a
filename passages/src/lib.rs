//! # Passages
//!
//! This crate turns raw financial documents into the passages that the
//! retrieval engine indexes and ranks.
//!
//! ## Features
//!
//! - **Structure-aware chunking**: tables, numbered/bulleted clauses and
//!   formula blocks are never split across passages unless they alone exceed
//!   the chunk budget
//! - **Section tracking**: every passage carries the header context it sits in
//! - **Token budgeting**: pluggable tokenizers (BPE or whitespace)
//! - **Term extraction**: the lexical tokenization shared by keyword scoring,
//!   diversification and the local embedding fallback
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Chunking Path                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  text ──► normalize ──► BoundaryDetector ──► DocumentChunker    │
//! │                                                   │             │
//! │                               Tokenizer ◄─────────┤             │
//! │                                                   ▼             │
//! │                                               Passage[]         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod boundary;
pub mod chunker;
pub mod error;
pub mod passage;
pub mod text;
pub mod tokenizer;

pub use boundary::{BoundaryDetector, LineKind, UnitKind};
pub use chunker::{ChunkerConfig, DocumentChunker};
pub use error::{ChunkError, Result};
pub use passage::{Metadata, Passage};
pub use text::{normalize, terms};
pub use tokenizer::{BpeTokenizer, Tokenizer, TokenizerSession, WordTokenizer};
