//! Token counting for chunk budgeting.
//!
//! Two tokenizers are provided:
//!
//! - [`BpeTokenizer`]: tiktoken's `cl100k_base` vocabulary, the default for
//!   production ingestion
//! - [`WordTokenizer`]: whitespace tokens, model-agnostic and fully
//!   predictable, also the unit used by the fixed-size fallback chunker

use std::cell::Cell;
use std::sync::Arc;

use tiktoken_rs::CoreBPE;
use tracing::debug;

use crate::error::{ChunkError, Result};

/// How many trailing tokens `BpeTokenizer::tail` may drop when the cut lands
/// inside a multi-byte character.
const MAX_TAIL_RETRIES: usize = 4;

/// Counts and slices text in tokenizer units.
pub trait Tokenizer: Send + Sync {
    /// Name of the tokenizer, used in logs.
    fn name(&self) -> &str;

    /// Number of tokens in `text`.
    fn count(&self, text: &str) -> usize;

    /// The last `max_tokens` tokens of `text`, decoded back to a string.
    fn tail(&self, text: &str, max_tokens: usize) -> Result<String>;
}

/// A tokenizer borrowed for the duration of one chunking call.
///
/// The session is released when it goes out of scope, whichever way the
/// chunking call exits.
pub struct TokenizerSession<'a> {
    tokenizer: &'a dyn Tokenizer,
    encodes: Cell<usize>,
}

impl<'a> TokenizerSession<'a> {
    /// Acquire a session over `tokenizer`.
    pub fn open(tokenizer: &'a dyn Tokenizer) -> Self {
        Self {
            tokenizer,
            encodes: Cell::new(0),
        }
    }

    /// Count tokens in `text`.
    pub fn count(&self, text: &str) -> usize {
        self.encodes.set(self.encodes.get() + 1);
        self.tokenizer.count(text)
    }

    /// The last `max_tokens` tokens of `text`.
    pub fn tail(&self, text: &str, max_tokens: usize) -> Result<String> {
        self.encodes.set(self.encodes.get() + 1);
        self.tokenizer.tail(text, max_tokens)
    }

    /// Number of encode calls made through this session so far.
    pub fn encodes(&self) -> usize {
        self.encodes.get()
    }
}

impl Drop for TokenizerSession<'_> {
    fn drop(&mut self) {
        debug!(
            "Released {} tokenizer session after {} encodes",
            self.tokenizer.name(),
            self.encodes.get()
        );
    }
}

/// Byte-pair tokenizer backed by tiktoken's `cl100k_base` vocabulary.
#[derive(Clone)]
pub struct BpeTokenizer {
    bpe: Arc<CoreBPE>,
}

impl BpeTokenizer {
    /// Load the `cl100k_base` vocabulary.
    pub fn cl100k() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| ChunkError::Vocabulary(e.to_string()))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl Tokenizer for BpeTokenizer {
    fn name(&self) -> &str {
        "cl100k_base"
    }

    fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    fn tail(&self, text: &str, max_tokens: usize) -> Result<String> {
        if max_tokens == 0 {
            return Ok(String::new());
        }

        let tokens = self.bpe.encode_ordinary(text);
        if tokens.len() <= max_tokens {
            return Ok(text.to_string());
        }

        // A cut inside a multi-byte character does not decode; shift the cut
        // forward a few tokens until it does.
        let start = tokens.len() - max_tokens;
        let mut last_error = None;
        for offset in 0..MAX_TAIL_RETRIES.min(max_tokens) {
            match self.bpe.decode(tokens[start + offset..].to_vec()) {
                Ok(decoded) => return Ok(decoded),
                Err(err) => last_error = Some(err.to_string()),
            }
        }

        Err(ChunkError::Tokenizer(last_error.unwrap_or_else(|| {
            format!("could not decode the last {max_tokens} tokens")
        })))
    }
}

/// Whitespace tokenizer: one token per whitespace-separated word.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordTokenizer;

impl WordTokenizer {
    /// Create a new whitespace tokenizer.
    pub fn new() -> Self {
        Self
    }
}

impl Tokenizer for WordTokenizer {
    fn name(&self) -> &str {
        "whitespace"
    }

    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }

    fn tail(&self, text: &str, max_tokens: usize) -> Result<String> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let start = words.len().saturating_sub(max_tokens);
        Ok(words[start..].join(" "))
    }
}
