//! Deterministic local embeddings.
//!
//! [`HashingEmbedder`] projects the most frequent terms of a text into a
//! fixed number of buckets using SHA-256. It needs no model and no network,
//! and the same text always yields the same vector, which makes it the
//! fallback whenever a remote provider fails.

use std::collections::HashMap;

use async_trait::async_trait;
use finrag_passages::terms;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::provider::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse};
use crate::similarity::l2_normalize;
use crate::{DEFAULT_DIMENSION, Embedding};

/// Default number of distinct terms hashed per text.
pub const DEFAULT_FALLBACK_TERMS: usize = 50;

/// Terms at least this long get the full length weight.
const FULL_WEIGHT_TERM_CHARS: usize = 12;

/// Feature-hashing embedder over lexical terms.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    max_terms: usize,
}

impl HashingEmbedder {
    /// Model name reported in responses.
    pub const MODEL: &'static str = "local-hashing-v1";

    /// Create an embedder producing `dimension`-length vectors.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            max_terms: DEFAULT_FALLBACK_TERMS,
        }
    }

    /// Limit how many distinct terms contribute to a vector.
    pub fn with_max_terms(mut self, max_terms: usize) -> Self {
        self.max_terms = max_terms;
        self
    }

    /// Embed `text` synchronously.
    pub fn embed_text(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return vector;
        }

        let mut frequencies: HashMap<String, usize> = HashMap::new();
        for term in terms(text) {
            *frequencies.entry(term).or_default() += 1;
        }

        let mut ranked: Vec<(String, usize)> = frequencies.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(self.max_terms);

        for (term, frequency) in ranked {
            let digest = Sha256::digest(term.as_bytes());
            let mut seed = [0u8; 8];
            seed.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(seed) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };

            let length_weight =
                term.chars().count().min(FULL_WEIGHT_TERM_CHARS) as f32 / FULL_WEIGHT_TERM_CHARS as f32;
            let weight = (1.0 + (frequency as f32).ln()) * length_weight;

            vector[bucket] += sign * weight;
        }

        l2_normalize(&mut vector);
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn default_model(&self) -> &str {
        Self::MODEL
    }

    fn default_dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let embedding = self.embed_text(&request.text);
        Ok(EmbeddingResponse {
            dimension: embedding.len(),
            embedding,
            model: Self::MODEL.to_string(),
            tokens_used: None,
        })
    }

    fn is_available(&self) -> bool {
        true
    }
}
