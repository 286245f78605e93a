//! The passage: the atomic retrievable unit of a document.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Open key/value metadata supplied at ingestion time (category, source,
/// year, ...). Keys are kept sorted so stored records are stable.
pub type Metadata = serde_json::Map<String, Value>;

/// Metadata keys written by [`Passage::to_metadata`].
pub mod keys {
    pub const PASSAGE_ID: &str = "passage_id";
    pub const DOCUMENT_ID: &str = "document_id";
    pub const SEQUENCE: &str = "sequence";
    pub const TOKEN_COUNT: &str = "token_count";
    pub const SECTION: &str = "section";
    pub const SUBSECTION: &str = "subsection";
    pub const HAS_TABLE: &str = "has_table";
    pub const HAS_FORMULA: &str = "has_formula";
    pub const HAS_NUMERIC_CONTENT: &str = "has_numeric_content";
    pub const START_OFFSET: &str = "start_offset";
    pub const END_OFFSET: &str = "end_offset";
    pub const OVERLAP_LEN: &str = "overlap_len";

    /// Every key owned by the passage itself rather than by the caller.
    pub const PASSAGE_KEYS: [&str; 12] = [
        PASSAGE_ID,
        DOCUMENT_ID,
        SEQUENCE,
        TOKEN_COUNT,
        SECTION,
        SUBSECTION,
        HAS_TABLE,
        HAS_FORMULA,
        HAS_NUMERIC_CONTENT,
        START_OFFSET,
        END_OFFSET,
        OVERLAP_LEN,
    ];
}

/// A chunk of a source document, immutable once created by the chunker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// Globally unique identifier, `{document_id}_{sequence}`.
    pub passage_id: String,

    /// Stable identifier of the source document.
    pub document_id: String,

    /// Passage body, trimmed and non-empty. Starts with the overlap carried
    /// from the previous passage, if any.
    pub text: String,

    /// 0-based position within the document.
    pub sequence: usize,

    /// Tokens in `text`, at least 1.
    pub token_count: usize,

    /// Nearest preceding top-level header.
    pub section: Option<String>,

    /// Nearest preceding nested header within `section`.
    pub subsection: Option<String>,

    /// Whether the passage contains a pipe-delimited table row.
    pub has_table: bool,

    /// Whether the passage contains a formula or currency amount.
    pub has_formula: bool,

    /// Whether the passage contains any digits.
    pub has_numeric_content: bool,

    /// Byte offset of the body (non-overlap region) in the normalized text.
    pub start_offset: usize,

    /// Exclusive end byte offset of the body in the normalized text.
    pub end_offset: usize,

    /// Bytes at the start of `text` carried over from the previous passage,
    /// including the joining line break.
    pub overlap_len: usize,

    /// Caller-supplied document metadata.
    pub source_metadata: Metadata,
}

impl Passage {
    /// Build the passage identifier for a document position.
    pub fn make_id(document_id: &str, sequence: usize) -> String {
        format!("{document_id}_{sequence}")
    }

    /// The non-overlap region of the passage.
    pub fn body(&self) -> &str {
        self.text.get(self.overlap_len..).unwrap_or(&self.text)
    }

    /// The region carried over from the previous passage, without the
    /// joining line break.
    pub fn overlap(&self) -> &str {
        self.text
            .get(..self.overlap_len)
            .map(str::trim_end)
            .unwrap_or_default()
    }

    /// A string value from the caller-supplied metadata.
    pub fn source_str(&self, key: &str) -> Option<&str> {
        self.source_metadata.get(key).and_then(Value::as_str)
    }

    /// Flatten the passage into a storage metadata map.
    ///
    /// Caller metadata is written first; passage-level fields are written
    /// last so they win over any document-level key of the same name.
    pub fn to_metadata(&self) -> Metadata {
        let mut metadata = self.source_metadata.clone();
        metadata.insert(keys::PASSAGE_ID.into(), Value::from(self.passage_id.clone()));
        metadata.insert(keys::DOCUMENT_ID.into(), Value::from(self.document_id.clone()));
        metadata.insert(keys::SEQUENCE.into(), Value::from(self.sequence));
        metadata.insert(keys::TOKEN_COUNT.into(), Value::from(self.token_count));
        metadata.insert(keys::SECTION.into(), optional(&self.section));
        metadata.insert(keys::SUBSECTION.into(), optional(&self.subsection));
        metadata.insert(keys::HAS_TABLE.into(), Value::from(self.has_table));
        metadata.insert(keys::HAS_FORMULA.into(), Value::from(self.has_formula));
        metadata.insert(
            keys::HAS_NUMERIC_CONTENT.into(),
            Value::from(self.has_numeric_content),
        );
        metadata.insert(keys::START_OFFSET.into(), Value::from(self.start_offset));
        metadata.insert(keys::END_OFFSET.into(), Value::from(self.end_offset));
        metadata.insert(keys::OVERLAP_LEN.into(), Value::from(self.overlap_len));
        metadata
    }

    /// Rebuild a passage from a stored record.
    ///
    /// Missing fields fall back to neutral defaults so records written by
    /// other tools still load; the explicit `id` wins over the metadata's
    /// `passage_id`.
    pub fn from_record(id: Option<&str>, text: &str, metadata: &Metadata) -> Self {
        let get_str = |key: &str| metadata.get(key).and_then(Value::as_str).map(String::from);
        let get_usize = |key: &str| {
            metadata
                .get(key)
                .and_then(Value::as_u64)
                .map_or(0, |v| v as usize)
        };
        let get_bool = |key: &str| metadata.get(key).and_then(Value::as_bool).unwrap_or(false);

        let source_metadata: Metadata = metadata
            .iter()
            .filter(|(key, _)| !keys::PASSAGE_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let overlap_len = get_usize(keys::OVERLAP_LEN);
        Self {
            passage_id: id
                .map(String::from)
                .or_else(|| get_str(keys::PASSAGE_ID))
                .unwrap_or_default(),
            document_id: get_str(keys::DOCUMENT_ID).unwrap_or_default(),
            text: text.to_string(),
            sequence: get_usize(keys::SEQUENCE),
            token_count: get_usize(keys::TOKEN_COUNT).max(1),
            section: get_str(keys::SECTION),
            subsection: get_str(keys::SUBSECTION),
            has_table: get_bool(keys::HAS_TABLE),
            has_formula: get_bool(keys::HAS_FORMULA),
            has_numeric_content: get_bool(keys::HAS_NUMERIC_CONTENT),
            start_offset: get_usize(keys::START_OFFSET),
            end_offset: get_usize(keys::END_OFFSET),
            overlap_len: if text.is_char_boundary(overlap_len) {
                overlap_len
            } else {
                0
            },
            source_metadata,
        }
    }
}

fn optional(value: &Option<String>) -> Value {
    value.clone().map_or(Value::Null, Value::from)
}
