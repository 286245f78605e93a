//! Configuration for the retrieval engine.
//!
//! A [`RetrievalConfig`] is passed to the engine at construction. Every
//! section has defaults, so a TOML file only needs the keys it overrides:
//!
//! ```toml
//! [search]
//! top_k = 8
//! alpha = 0.6
//!
//! [keyword]
//! scan_timeout_ms = 500
//! ```

use std::path::Path;

use finrag_passages::ChunkerConfig;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};

/// Configuration for the retrieval engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Chunk and overlap budgets for ingestion.
    pub chunking: ChunkerConfig,

    /// Result counts and ranking weights.
    pub search: SearchConfig,

    /// Keyword channel scoring and scan limits.
    pub keyword: KeywordConfig,

    /// Priority-section boost.
    pub bias: BiasConfig,

    /// Vector dimension and local fallback.
    pub embedding: EmbeddingConfig,

    /// Query expansion.
    pub expansion: ExpansionConfig,
}

impl RetrievalConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| RetrievalError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Set the search configuration.
    pub fn with_search(mut self, search: SearchConfig) -> Self {
        self.search = search;
        self
    }

    /// Set the keyword configuration.
    pub fn with_keyword(mut self, keyword: KeywordConfig) -> Self {
        self.keyword = keyword;
        self
    }

    /// Set the chunking configuration.
    pub fn with_chunking(mut self, chunking: ChunkerConfig) -> Self {
        self.chunking = chunking;
        self
    }

    /// Set the embedding dimension.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.embedding.dimension = dimension;
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        let mut problems = Vec::new();

        if self.chunking.chunk_tokens == 0 {
            problems.push("chunking.chunk_tokens must be positive".to_string());
        }
        if self.chunking.overlap_tokens >= self.chunking.chunk_tokens {
            problems.push("chunking.overlap_tokens must be smaller than chunk_tokens".to_string());
        }
        if self.search.top_k == 0 {
            problems.push("search.top_k must be positive".to_string());
        }
        if self.search.pool_multiplier == 0 {
            problems.push("search.pool_multiplier must be positive".to_string());
        }
        if !unit.contains(&self.search.alpha) {
            problems.push(format!("search.alpha {} is outside [0, 1]", self.search.alpha));
        }
        if !unit.contains(&self.search.lambda) {
            problems.push(format!("search.lambda {} is outside [0, 1]", self.search.lambda));
        }
        if self.keyword.page_size == 0 {
            problems.push("keyword.page_size must be positive".to_string());
        }
        if self.keyword.k1 < 0.0 {
            problems.push("keyword.k1 must not be negative".to_string());
        }
        if !unit.contains(&self.keyword.b) {
            problems.push(format!("keyword.b {} is outside [0, 1]", self.keyword.b));
        }
        if self.keyword.avg_doc_len <= 0.0 {
            problems.push("keyword.avg_doc_len must be positive".to_string());
        }
        if self.bias.boost < 0.0 || self.bias.cap <= 0.0 {
            problems.push("bias.boost must not be negative and bias.cap must be positive".to_string());
        }
        if self.embedding.dimension == 0 {
            problems.push("embedding.dimension must be positive".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(RetrievalError::Config(problems.join("; ")))
        }
    }
}

/// Result counts and ranking weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Passages returned when a request does not specify `k`.
    pub top_k: usize,

    /// Each channel fetches `k * pool_multiplier` candidates.
    pub pool_multiplier: usize,

    /// Upper bound on the per-channel candidate pool.
    pub max_pool: usize,

    /// Weight of the vector channel in fusion; keyword gets `1 - alpha`.
    pub alpha: f32,

    /// MMR trade-off: 1.0 is pure relevance, 0.0 pure diversity.
    pub lambda: f32,
}

impl SearchConfig {
    /// Per-channel pool size for a request of `k` results.
    pub fn pool_size(&self, k: usize) -> usize {
        k.saturating_mul(self.pool_multiplier)
            .min(self.max_pool)
            .max(k)
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            pool_multiplier: 2,
            max_pool: 50,
            alpha: 0.7,
            lambda: 0.7,
        }
    }
}

/// Keyword channel scoring and scan limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordConfig {
    /// Passages fetched per page.
    pub page_size: usize,

    /// Hard ceiling on passages scanned per query.
    pub max_scan: usize,

    /// Pages always scanned before early termination is considered.
    pub min_pages: usize,

    /// Stop once `limit * early_stop_multiple` hits are found. Zero disables
    /// early termination.
    pub early_stop_multiple: usize,

    /// BM25 term-frequency saturation.
    pub k1: f32,

    /// BM25 length normalization.
    pub b: f32,

    /// Assumed average passage length in terms.
    pub avg_doc_len: f32,

    /// Cancel the scan after this many milliseconds and keep what was scored.
    pub scan_timeout_ms: Option<u64>,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_scan: 2000,
            min_pages: 3,
            early_stop_multiple: 3,
            k1: 1.2,
            b: 0.75,
            avg_doc_len: 100.0,
            scan_timeout_ms: Some(2000),
        }
    }
}

/// Priority-section boost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiasConfig {
    /// Added to the score of a matching candidate.
    pub boost: f32,

    /// Boosted scores never exceed this value.
    pub cap: f32,
}

impl Default for BiasConfig {
    fn default() -> Self {
        Self {
            boost: 0.2,
            cap: 1.0,
        }
    }
}

/// Vector dimension and local fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Dimension of stored vectors.
    pub dimension: usize,

    /// Distinct terms hashed by the local fallback embedder.
    pub fallback_terms: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: finrag_embeddings::DEFAULT_DIMENSION,
            fallback_terms: finrag_embeddings::hashing::DEFAULT_FALLBACK_TERMS,
        }
    }
}

/// Query expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    /// Ask the text-generation provider before using the dictionary.
    pub use_provider: bool,

    /// Completion budget for the expansion call.
    pub max_tokens: u32,

    /// Sampling temperature for the expansion call.
    pub temperature: f32,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            use_provider: true,
            max_tokens: 300,
            temperature: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = RetrievalConfig::default();
        config.validate().unwrap();
        assert_eq!(config.chunking.chunk_tokens, 350);
        assert_eq!(config.keyword.page_size, 100);
        assert_eq!(config.embedding.dimension, 384);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RetrievalConfig::from_toml_str(
            r#"
            [search]
            top_k = 8
            alpha = 0.5

            [keyword]
            scan_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.search.top_k, 8);
        assert_eq!(config.search.alpha, 0.5);
        assert_eq!(config.search.lambda, 0.7);
        assert_eq!(config.keyword.scan_timeout_ms, Some(250));
        assert_eq!(config.keyword.max_scan, 2000);
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = RetrievalConfig::from_toml_str(
            r#"
            [search]
            alpha = 1.5

            [chunking]
            chunk_tokens = 50
            overlap_tokens = 50
            "#,
        )
        .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("search.alpha"), "{message}");
        assert!(message.contains("overlap_tokens"), "{message}");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[bias]\nboost = 0.1").unwrap();

        let config = RetrievalConfig::load(file.path()).unwrap();
        assert_eq!(config.bias.boost, 0.1);
        assert_eq!(config.bias.cap, 1.0);
    }

    #[test]
    fn test_pool_size_is_bounded() {
        let search = SearchConfig::default();
        assert_eq!(search.pool_size(5), 10);
        assert_eq!(search.pool_size(40), 50);
        assert_eq!(search.pool_size(80), 80);
    }
}
