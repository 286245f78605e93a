//! Properties of the chunker over a realistic financial guide.

use std::path::PathBuf;
use std::sync::Arc;

use finrag_passages::{
    BoundaryDetector, BpeTokenizer, ChunkError, ChunkerConfig, DocumentChunker, Metadata, Passage,
    Tokenizer, WordTokenizer, normalize,
};
use pretty_assertions::assert_eq;
use serde_json::json;

const BUDGET: usize = 80;

fn fixture() -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/ira_guide.md");
    std::fs::read_to_string(path).unwrap()
}

fn bpe_chunker() -> (DocumentChunker, Arc<BpeTokenizer>) {
    let tokenizer = Arc::new(BpeTokenizer::cl100k().unwrap());
    let chunker = DocumentChunker::new(
        ChunkerConfig {
            chunk_tokens: BUDGET,
            overlap_tokens: 20,
        },
        tokenizer.clone(),
    );
    (chunker, tokenizer)
}

fn metadata() -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("source".into(), json!("IRS Publication 590"));
    metadata.insert("category".into(), json!("retirement"));
    metadata
}

/// Body regions must tile the normalized text, separated only by line breaks.
fn assert_covers(normalized: &str, passages: &[Passage]) {
    let mut cursor = 0;
    for passage in passages {
        let gap = &normalized[cursor..passage.start_offset];
        assert!(
            gap.chars().all(|c| c == '\n'),
            "passage {} leaves {gap:?} uncovered",
            passage.passage_id
        );
        assert_eq!(
            &normalized[passage.start_offset..passage.end_offset],
            passage.body()
        );
        cursor = passage.end_offset;
    }
    assert_eq!(cursor, normalized.len());
}

#[test]
fn test_passages_cover_the_document() {
    let (chunker, _) = bpe_chunker();
    let text = fixture();
    let passages = chunker.chunk(&text, "pub590", &metadata());

    assert!(passages.len() > 3, "got {} passages", passages.len());
    assert_covers(&normalize(&text), &passages);
}

/// A passage over `budget` must be a single line or a single structural
/// unit, and carries no overlap.
fn assert_oversized_are_single_units(passages: &[Passage], budget: usize) -> usize {
    let detector = BoundaryDetector::new().unwrap();
    let mut oversized = 0;
    for passage in passages.iter().filter(|p| p.token_count > budget) {
        oversized += 1;
        assert_eq!(passage.overlap_len, 0, "{}", passage.passage_id);
        let lines: Vec<&str> = passage.body().split('\n').collect();
        if lines.len() > 1 {
            let (_, end) = detector
                .unit_end(&lines, 0)
                .unwrap_or_else(|| panic!("{} is not a structural unit", passage.passage_id));
            assert_eq!(end, lines.len(), "{} spans several units", passage.passage_id);
        }
    }
    oversized
}

#[test]
fn test_token_budget_respected() {
    let (chunker, tokenizer) = bpe_chunker();
    let passages = chunker.chunk(&fixture(), "pub590", &metadata());

    for passage in &passages {
        assert_eq!(passage.token_count, tokenizer.count(&passage.text).max(1));
    }
    assert_oversized_are_single_units(&passages, BUDGET);
}

#[test]
fn test_tight_budget_only_units_overflow() {
    let tokenizer = Arc::new(BpeTokenizer::cl100k().unwrap());
    let chunker = DocumentChunker::new(
        ChunkerConfig {
            chunk_tokens: 20,
            overlap_tokens: 5,
        },
        tokenizer,
    );
    let passages = chunker.chunk(&fixture(), "pub590", &metadata());

    assert!(assert_oversized_are_single_units(&passages, 20) > 0);
    let table: Vec<_> = passages
        .iter()
        .filter(|p| p.body().contains("| 2023 | $6,500 | $7,500 |"))
        .collect();
    assert_eq!(table.len(), 1);
    assert!(table[0].body().starts_with("| Tax year |"));
    assert!(table[0].body().ends_with("| 2024 | $7,000 | $8,000 |"));
}

#[test]
fn test_sequences_and_metadata() {
    let (chunker, _) = bpe_chunker();
    let passages = chunker.chunk(&fixture(), "pub590", &metadata());

    for (index, passage) in passages.iter().enumerate() {
        assert_eq!(passage.sequence, index);
        assert_eq!(passage.passage_id, format!("pub590_{index}"));
        assert_eq!(passage.document_id, "pub590");
        assert_eq!(passage.source_str("category"), Some("retirement"));
        assert!(!passage.text.is_empty());
        assert_eq!(passage.text, passage.text.trim());
    }
}

#[test]
fn test_contribution_table_stays_together() {
    let (chunker, _) = bpe_chunker();
    let passages = chunker.chunk(&fixture(), "pub590", &metadata());

    let holders: Vec<_> = passages
        .iter()
        .filter(|p| p.body().contains("| 2023 | $6,500 | $7,500 |"))
        .collect();
    assert_eq!(holders.len(), 1);

    let holder = holders[0];
    assert!(holder.body().contains("| Tax year |"));
    assert!(holder.body().contains("| 2024 | $7,000 | $8,000 |"));
    assert!(holder.has_table);
    assert!(holder.has_numeric_content);
    assert_eq!(holder.section.as_deref(), Some("Individual Retirement Arrangements"));
    assert_eq!(holder.subsection.as_deref(), Some("Contribution Limits"));
}

#[test]
fn test_sections_follow_headers() {
    let (chunker, _) = bpe_chunker();
    let text = fixture();
    let normalized = normalize(&text);
    let passages = chunker.chunk(&text, "pub590", &metadata());

    let rmd_start = normalized.find("# Required Minimum Distributions").unwrap();
    let qcd_start = normalized.find("QUALIFIED CHARITABLE DISTRIBUTIONS").unwrap();

    let rmd: Vec<_> = passages
        .iter()
        .filter(|p| p.start_offset >= rmd_start && p.start_offset < qcd_start)
        .collect();
    assert!(!rmd.is_empty());
    for passage in rmd {
        assert_eq!(passage.section.as_deref(), Some("Required Minimum Distributions"));
        assert_eq!(passage.subsection, None);
    }

    let last = passages.last().unwrap();
    assert!(last.body().contains("qualified charity"));
    if last.start_offset >= qcd_start {
        assert_eq!(
            last.section.as_deref(),
            Some("QUALIFIED CHARITABLE DISTRIBUTIONS")
        );
    }
}

#[test]
fn test_chunking_is_deterministic() {
    let (chunker, _) = bpe_chunker();
    let text = fixture();
    assert_eq!(
        chunker.chunk(&text, "pub590", &metadata()),
        chunker.chunk(&text, "pub590", &metadata())
    );
}

#[test]
fn test_whitespace_only_document() {
    let (chunker, _) = bpe_chunker();
    assert!(chunker.chunk("\n\n   \r\n", "blank", &metadata()).is_empty());
}

/// Counts like [`WordTokenizer`] but cannot produce overlaps.
struct TailFailingTokenizer;

impl Tokenizer for TailFailingTokenizer {
    fn name(&self) -> &str {
        "tail-failing"
    }

    fn count(&self, text: &str) -> usize {
        WordTokenizer::new().count(text)
    }

    fn tail(&self, _text: &str, _max_tokens: usize) -> finrag_passages::Result<String> {
        Err(ChunkError::Tokenizer("decode failed".to_string()))
    }
}

#[test]
fn test_structural_failure_falls_back_to_fixed_chunks() {
    let chunker = DocumentChunker::new(
        ChunkerConfig {
            chunk_tokens: 40,
            overlap_tokens: 10,
        },
        Arc::new(TailFailingTokenizer),
    );
    let text = fixture();
    let normalized = normalize(&text);
    let passages = chunker.chunk(&text, "pub590", &metadata());

    let words = normalized.split_whitespace().count();
    assert_eq!(passages.len(), words.div_ceil(40));
    for passage in &passages {
        assert_eq!(passage.overlap_len, 0);
        assert_eq!(passage.section, None);
        assert!(!passage.has_table);
        assert!(passage.token_count <= 40);
        assert_eq!(
            &normalized[passage.start_offset..passage.end_offset],
            passage.text
        );
    }
    assert_eq!(passages[0].start_offset, 0);
    assert_eq!(passages.last().unwrap().end_offset, normalized.len());
}

/// Counts with the BPE vocabulary but cannot produce overlaps.
struct BpeTailFailingTokenizer(BpeTokenizer);

impl Tokenizer for BpeTailFailingTokenizer {
    fn name(&self) -> &str {
        "bpe-tail-failing"
    }

    fn count(&self, text: &str) -> usize {
        self.0.count(text)
    }

    fn tail(&self, _text: &str, _max_tokens: usize) -> finrag_passages::Result<String> {
        Err(ChunkError::Tokenizer("decode failed".to_string()))
    }
}

#[test]
fn test_fixed_chunks_report_tokenizer_counts() {
    let bpe = BpeTokenizer::cl100k().unwrap();
    let chunker = DocumentChunker::new(
        ChunkerConfig {
            chunk_tokens: 20,
            overlap_tokens: 5,
        },
        Arc::new(BpeTailFailingTokenizer(BpeTokenizer::cl100k().unwrap())),
    );
    let passages = chunker.chunk(&fixture(), "pub590", &metadata());

    assert!(passages.len() > 1);
    assert!(passages.iter().all(|p| p.overlap_len == 0 && p.section.is_none()));
    for passage in &passages {
        assert_eq!(
            passage.token_count,
            bpe.count(&passage.text).max(1),
            "{}",
            passage.passage_id
        );
    }
    assert!(passages.iter().any(|p| p.token_count > 20));
}
