//! Structure-aware document chunking.
//!
//! The chunker walks normalized lines, accumulating them against a token
//! budget and carrying a token overlap from the tail of each passage into
//! the head of the next. Tables, lists and formula blocks are treated as
//! atomic units: a passage is closed early rather than split inside one, and
//! a unit that alone exceeds the budget becomes its own oversized passage.
//!
//! Any failure during the structural walk switches to fixed-size whitespace
//! chunking without overlap.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::boundary::BoundaryDetector;
use crate::error::{ChunkError, Result};
use crate::passage::{Metadata, Passage};
use crate::text::normalize;
use crate::tokenizer::{BpeTokenizer, Tokenizer, TokenizerSession};

/// Configuration for the chunker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Token budget per passage. A structural unit larger than this (a
    /// table, a list, or a run of lines quoting dollar amounts) becomes one
    /// oversized passage of its own.
    pub chunk_tokens: usize,

    /// Tokens carried from the tail of one passage into the next.
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_tokens: 350,
            overlap_tokens: 60,
        }
    }
}

/// Splits documents into overlapping, metadata-tagged passages.
pub struct DocumentChunker {
    config: ChunkerConfig,
    tokenizer: Arc<dyn Tokenizer>,
    detector: Option<BoundaryDetector>,
}

impl DocumentChunker {
    /// Create a chunker over the given tokenizer.
    pub fn new(config: ChunkerConfig, tokenizer: Arc<dyn Tokenizer>) -> Self {
        let detector = match BoundaryDetector::new() {
            Ok(detector) => Some(detector),
            Err(err) => {
                warn!("Boundary detection unavailable, documents will use fixed-size chunks: {err}");
                None
            }
        };

        Self {
            config,
            tokenizer,
            detector,
        }
    }

    /// Create a chunker with default budgets and the `cl100k_base` tokenizer.
    pub fn with_defaults() -> Result<Self> {
        Ok(Self::new(
            ChunkerConfig::default(),
            Arc::new(BpeTokenizer::cl100k()?),
        ))
    }

    /// The chunker's configuration.
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split `text` into passages belonging to `document_id`.
    ///
    /// Empty input yields no passages. This never fails: structural errors
    /// fall back to fixed-size chunking.
    pub fn chunk(&self, text: &str, document_id: &str, metadata: &Metadata) -> Vec<Passage> {
        let normalized = normalize(text);
        if normalized.is_empty() {
            debug!("Document {document_id} is empty after normalization");
            return Vec::new();
        }

        let structured = {
            let session = TokenizerSession::open(self.tokenizer.as_ref());
            self.chunk_structured(&normalized, document_id, metadata, &session)
        };

        match structured {
            Ok(passages) => {
                debug!(
                    "Chunked document {document_id} into {} passages",
                    passages.len()
                );
                passages
            }
            Err(err) => {
                warn!("Structured chunking failed for {document_id}, using fixed-size chunks: {err}");
                self.chunk_fixed(&normalized, document_id, metadata)
            }
        }
    }

    fn chunk_structured(
        &self,
        normalized: &str,
        document_id: &str,
        metadata: &Metadata,
        session: &TokenizerSession<'_>,
    ) -> Result<Vec<Passage>> {
        let detector = self
            .detector
            .as_ref()
            .ok_or_else(|| ChunkError::Structure("boundary patterns unavailable".to_string()))?;

        let lines: Vec<&str> = normalized.split('\n').collect();
        let mut offsets = Vec::with_capacity(lines.len());
        let mut position = 0;
        for line in &lines {
            offsets.push(position);
            position += line.len() + 1;
        }

        let mut walk = Walk {
            normalized,
            lines: &lines,
            offsets: &offsets,
            document_id,
            metadata,
            detector,
            session,
            config: &self.config,
            passages: Vec::new(),
            previous_body: None,
        };

        let mut context = SectionContext::default();
        let mut open: Option<OpenChunk> = None;
        let mut index = 0;

        while index < lines.len() {
            let line = lines[index];
            if line.is_empty() {
                index += 1;
                continue;
            }

            if let Some((level, title)) = detector.header(line) {
                context.enter(level, title);
            }

            let end = detector
                .unit_end(&lines, index)
                .map_or(index + 1, |(_, end)| end);
            let unit = lines[index..end].join("\n");

            if session.count(&unit) > self.config.chunk_tokens {
                if let Some(chunk) = open.take() {
                    walk.close(chunk)?;
                }
                walk.close(OpenChunk {
                    first: index,
                    end,
                    overlap: String::new(),
                    context: context.clone(),
                })?;
                index = end;
                continue;
            }

            open = match open.take() {
                Some(mut chunk) if walk.fits(&chunk, end) => {
                    chunk.end = end;
                    Some(chunk)
                }
                Some(chunk) => {
                    walk.close(chunk)?;
                    Some(walk.open(index, end, &unit, &context)?)
                }
                None => Some(walk.open(index, end, &unit, &context)?),
            };
            index = end;
        }

        if let Some(chunk) = open.take() {
            walk.close(chunk)?;
        }

        if walk.passages.is_empty() {
            return Err(ChunkError::Structure(
                "no passages produced for non-empty text".to_string(),
            ));
        }

        Ok(walk.passages)
    }

    /// Fixed-size whitespace chunking without overlap. Groups are cut by
    /// word count; `token_count` still comes from the tokenizer.
    fn chunk_fixed(&self, normalized: &str, document_id: &str, metadata: &Metadata) -> Vec<Passage> {
        let spans = word_spans(normalized);
        let size = self.config.chunk_tokens.max(1);

        spans
            .chunks(size)
            .enumerate()
            .filter_map(|(sequence, group)| {
                let (start, _) = *group.first()?;
                let (_, end) = *group.last()?;
                let text = normalized.get(start..end)?.to_string();
                Some(Passage {
                    passage_id: Passage::make_id(document_id, sequence),
                    document_id: document_id.to_string(),
                    sequence,
                    token_count: self.tokenizer.count(&text).max(1),
                    section: None,
                    subsection: None,
                    has_table: false,
                    has_formula: false,
                    has_numeric_content: has_digits(&text),
                    start_offset: start,
                    end_offset: end,
                    overlap_len: 0,
                    source_metadata: metadata.clone(),
                    text,
                })
            })
            .collect()
    }
}

/// Header context tracked across the whole document.
#[derive(Debug, Clone, Default)]
struct SectionContext {
    section: Option<String>,
    subsection: Option<String>,
}

impl SectionContext {
    fn enter(&mut self, level: u8, title: String) {
        if level <= 1 {
            self.section = Some(title);
            self.subsection = None;
        } else {
            self.subsection = Some(title);
        }
    }
}

/// A passage being accumulated: lines `first..end` plus its overlap prefix.
struct OpenChunk {
    first: usize,
    end: usize,
    overlap: String,
    context: SectionContext,
}

/// State of one structural walk over a normalized document.
struct Walk<'a> {
    normalized: &'a str,
    lines: &'a [&'a str],
    offsets: &'a [usize],
    document_id: &'a str,
    metadata: &'a Metadata,
    detector: &'a BoundaryDetector,
    session: &'a TokenizerSession<'a>,
    config: &'a ChunkerConfig,
    passages: Vec<Passage>,
    previous_body: Option<String>,
}

impl Walk<'_> {
    /// Start a passage at unit `first..end`, carrying the overlap unless the
    /// overlap and the unit together exceed the budget.
    fn open(
        &self,
        first: usize,
        end: usize,
        unit: &str,
        context: &SectionContext,
    ) -> Result<OpenChunk> {
        let mut overlap = match &self.previous_body {
            Some(body) if self.config.overlap_tokens > 0 => self
                .session
                .tail(body, self.config.overlap_tokens)?
                .trim()
                .to_string(),
            _ => String::new(),
        };

        if !overlap.is_empty() && self.session.count(&compose(&overlap, unit)) > self.config.chunk_tokens {
            overlap.clear();
        }

        Ok(OpenChunk {
            first,
            end,
            overlap,
            context: context.clone(),
        })
    }

    /// Whether extending `chunk` through line `end` stays within budget.
    fn fits(&self, chunk: &OpenChunk, end: usize) -> bool {
        let body = self.lines[chunk.first..end].join("\n");
        self.session.count(&compose(&chunk.overlap, &body)) <= self.config.chunk_tokens
    }

    fn close(&mut self, chunk: OpenChunk) -> Result<()> {
        let body = self.lines[chunk.first..chunk.end].join("\n");
        let start_offset = self.offsets[chunk.first];
        let last = chunk.end - 1;
        let end_offset = self.offsets[last] + self.lines[last].len();

        if self.normalized.get(start_offset..end_offset) != Some(body.as_str()) {
            return Err(ChunkError::Structure(format!(
                "passage body diverged from source at byte {start_offset}"
            )));
        }

        let text = compose(&chunk.overlap, &body);
        let overlap_len = if chunk.overlap.is_empty() {
            0
        } else {
            chunk.overlap.len() + 1
        };
        let sequence = self.passages.len();

        self.passages.push(Passage {
            passage_id: Passage::make_id(self.document_id, sequence),
            document_id: self.document_id.to_string(),
            sequence,
            token_count: self.session.count(&text).max(1),
            section: chunk.context.section,
            subsection: chunk.context.subsection,
            has_table: self.detector.has_table(&text),
            has_formula: self.detector.has_formula(&text),
            has_numeric_content: has_digits(&text),
            start_offset,
            end_offset,
            overlap_len,
            source_metadata: self.metadata.clone(),
            text,
        });
        self.previous_body = Some(body);
        Ok(())
    }
}

fn compose(overlap: &str, body: &str) -> String {
    if overlap.is_empty() {
        body.to_string()
    } else {
        format!("{overlap}\n{body}")
    }
}

fn has_digits(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit())
}

/// Byte spans of whitespace-separated words.
fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (index, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(begin) = start.take() {
                spans.push((begin, index));
            }
        } else if start.is_none() {
            start = Some(index);
        }
    }
    if let Some(begin) = start {
        spans.push((begin, text.len()));
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::WordTokenizer;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn chunker(chunk_tokens: usize, overlap_tokens: usize) -> DocumentChunker {
        DocumentChunker::new(
            ChunkerConfig {
                chunk_tokens,
                overlap_tokens,
            },
            Arc::new(WordTokenizer::new()),
        )
    }

    fn sentence(n: usize) -> String {
        format!("Sentence {n} explains how contribution rules apply to savers.")
    }

    #[test]
    fn test_empty_input_yields_no_passages() {
        let passages = chunker(50, 10).chunk(" \r\n\t\n", "doc", &Metadata::new());
        assert!(passages.is_empty());
    }

    #[test]
    fn test_small_document_single_passage() {
        let text = "# Roth IRA\n\nContributions are made after tax.\nQualified withdrawals are tax free.";
        let passages = chunker(50, 10).chunk(text, "roth", &Metadata::new());

        assert_eq!(passages.len(), 1);
        let passage = &passages[0];
        assert_eq!(passage.passage_id, "roth_0");
        assert_eq!(passage.sequence, 0);
        assert_eq!(passage.section.as_deref(), Some("Roth IRA"));
        assert_eq!(passage.overlap_len, 0);
        assert_eq!(passage.text, normalize(text));
        assert!(!passage.has_table);
        assert!(!passage.has_numeric_content);
    }

    #[test]
    fn test_overlap_carries_previous_tail() {
        let text: String = (0..12).map(sentence).collect::<Vec<_>>().join("\n");
        let passages = chunker(30, 5).chunk(&text, "doc", &Metadata::new());

        assert!(passages.len() > 1);
        for pair in passages.windows(2) {
            let expected = WordTokenizer::new().tail(pair[0].body(), 5).unwrap();
            assert_eq!(pair[1].overlap(), expected);
            assert!(pair[1].token_count <= 30);
        }
        for (index, passage) in passages.iter().enumerate() {
            assert_eq!(passage.sequence, index);
            assert_eq!(passage.passage_id, format!("doc_{index}"));
        }
    }

    #[test]
    fn test_table_is_not_split() {
        let mut lines: Vec<String> = (0..3).map(sentence).collect();
        lines.push("| Year | Limit | Catch-up |".to_string());
        lines.push("|------|-------|----------|".to_string());
        lines.push("| 2023 | 6500 | 1000 |".to_string());
        lines.push("| 2024 | 7000 | 1000 |".to_string());
        lines.push(sentence(4));
        let text = lines.join("\n");

        let passages = chunker(40, 5).chunk(&text, "limits", &Metadata::new());

        let table_passages: Vec<_> = passages.iter().filter(|p| p.has_table).collect();
        assert!(!table_passages.is_empty());
        let holder = passages
            .iter()
            .find(|p| p.body().contains("| Year |"))
            .unwrap();
        assert!(holder.body().contains("| 2024 | 7000 | 1000 |"));
        assert!(holder.token_count <= 40);
    }

    #[test]
    fn test_oversized_line_becomes_own_passage() {
        let long_line = vec!["word"; 120].join(" ");
        let text = format!("Short intro line.\n{long_line}\nShort outro line.");
        let passages = chunker(50, 5).chunk(&text, "big", &Metadata::new());

        let oversized: Vec<_> = passages.iter().filter(|p| p.token_count > 50).collect();
        assert_eq!(oversized.len(), 1);
        assert_eq!(oversized[0].text, long_line);
        assert_eq!(oversized[0].overlap_len, 0);
    }

    #[test]
    fn test_dollar_paragraph_is_one_oversized_passage() {
        let paragraph: Vec<String> = (0..40)
            .map(|n| format!("Savers in bracket {n} may set aside ${n},000 before the deadline"))
            .collect();
        let paragraph = paragraph.join("\n");
        let text = format!("Plain intro.\n{paragraph}\nClosing note.");
        let passages = chunker(20, 5).chunk(&text, "dollars", &Metadata::new());

        let oversized: Vec<_> = passages.iter().filter(|p| p.token_count > 20).collect();
        assert_eq!(oversized.len(), 1);
        assert_eq!(oversized[0].text, paragraph);
        assert!(oversized[0].has_formula);
        assert_eq!(oversized[0].overlap_len, 0);
    }

    #[test]
    fn test_section_context_reaches_mid_section_passages() {
        let mut lines = vec!["# Health Savings Accounts".to_string(), "## Eligibility".to_string()];
        lines.extend((0..10).map(sentence));
        lines.push("# Flexible Spending Accounts".to_string());
        lines.push(sentence(99));
        let text = lines.join("\n");

        let passages = chunker(25, 0).chunk(&text, "hsa", &Metadata::new());

        assert!(passages.len() > 2);
        let middle = &passages[1];
        assert!(!middle.body().starts_with('#'));
        assert_eq!(middle.section.as_deref(), Some("Health Savings Accounts"));
        assert_eq!(middle.subsection.as_deref(), Some("Eligibility"));

        let last = passages.last().unwrap();
        assert!(last.body().contains("Sentence 99"));
        assert_eq!(last.section.as_deref(), Some("Flexible Spending Accounts"));
    }

    #[test]
    fn test_metadata_is_copied_and_flags_computed() {
        let mut metadata = Metadata::new();
        metadata.insert("category".into(), json!("tax"));
        metadata.insert("has_formula".into(), json!(false));

        let passages = chunker(50, 0).chunk("Taxable income = $80000 - $14600", "calc", &metadata);

        assert_eq!(passages.len(), 1);
        assert!(passages[0].has_formula);
        assert!(passages[0].has_numeric_content);
        assert_eq!(passages[0].source_str("category"), Some("tax"));
        assert_eq!(passages[0].to_metadata().get("has_formula"), Some(&json!(true)));
    }

    #[test]
    fn test_fixed_fallback_covers_text_without_overlap() {
        let normalized = normalize("| a | b |\nalpha beta gamma\ndelta $5 epsilon");
        let passages = chunker(3, 2).chunk_fixed(&normalized, "fallback", &Metadata::new());

        assert_eq!(passages.len(), 4);
        assert!(passages.iter().all(|p| !p.has_table && !p.has_formula));
        assert!(passages.iter().all(|p| p.overlap_len == 0));
        assert_eq!(passages[0].text, "| a |");
        assert_eq!(passages[0].token_count, 3);
        let rebuilt: Vec<&str> = passages
            .iter()
            .map(|p| &normalized[p.start_offset..p.end_offset])
            .collect();
        assert_eq!(
            rebuilt.join(" ").split_whitespace().collect::<Vec<_>>(),
            normalized.split_whitespace().collect::<Vec<_>>()
        );
    }
}
