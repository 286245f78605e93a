//! Vector store contract and the in-memory implementation.
//!
//! The engine reads the store through [`VectorStore`] for both channels:
//! `query` feeds the vector channel, paginated `get` feeds the keyword scan.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use finrag_embeddings::{Embedding, top_k};
use finrag_passages::passage::keys;
use finrag_passages::{Metadata, Passage};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// A passage with its vector, as written by ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPassage {
    pub id: String,
    pub vector: Embedding,
    pub text: String,
    pub metadata: Metadata,
}

impl StoredPassage {
    /// Flatten a passage and its vector into a storable record.
    pub fn new(passage: &Passage, vector: Embedding) -> Self {
        Self {
            id: passage.passage_id.clone(),
            vector,
            text: passage.text.clone(),
            metadata: passage.to_metadata(),
        }
    }
}

/// A record read back from the store. External stores may omit the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Option<String>,
    pub text: String,
    pub metadata: Metadata,
}

impl Record {
    /// Rebuild the passage this record was written from.
    pub fn to_passage(&self) -> Passage {
        Passage::from_record(self.id.as_deref(), &self.text, &self.metadata)
    }
}

/// A similarity query hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub record: Record,

    /// Cosine distance, `1 - cos`.
    pub distance: f32,
}

impl VectorMatch {
    /// Similarity in `[0, 1]`: `max(0, 1 - distance)`.
    pub fn similarity(&self) -> f32 {
        (1.0 - self.distance).max(0.0)
    }
}

/// Which records `get` returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Records with these ids, in the given order. Unknown ids are skipped.
    Ids(Vec<String>),

    /// A window over the filtered records in insertion order.
    Page { limit: usize, offset: usize },
}

/// Inclusive date bounds on a metadata field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// Metadata key holding an ISO date, an RFC 3339 timestamp, or a year.
    pub field: String,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    fn contains(&self, metadata: &Metadata) -> bool {
        let Some(date) = metadata.get(&self.field).and_then(parse_date) else {
            return false;
        };
        self.from.is_none_or(|from| date >= from) && self.to.is_none_or(|to| date <= to)
    }
}

/// Metadata conditions, combined with logical AND. An empty filter matches
/// every record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataFilter {
    /// Allowed values of the `source` key.
    pub sources: Vec<String>,

    /// Allowed values of the `category` key.
    pub categories: Vec<String>,

    /// Allowed values of the `section` key.
    pub sections: Vec<String>,

    /// Required value of `has_table`.
    pub has_table: Option<bool>,

    /// Required value of `has_formula`.
    pub has_formula: Option<bool>,

    /// Inclusive date bounds.
    pub date_range: Option<DateRange>,
}

impl MetadataFilter {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to the given sources.
    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to the given categories.
    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to the given sections.
    pub fn with_sections<I, S>(mut self, sections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sections = sections.into_iter().map(Into::into).collect();
        self
    }

    /// Require a `has_table` value.
    pub fn with_has_table(mut self, has_table: bool) -> Self {
        self.has_table = Some(has_table);
        self
    }

    /// Require a `has_formula` value.
    pub fn with_has_formula(mut self, has_formula: bool) -> Self {
        self.has_formula = Some(has_formula);
        self
    }

    /// Require `field` to fall within `from..=to`.
    pub fn with_date_range(
        mut self,
        field: impl Into<String>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Self {
        self.date_range = Some(DateRange {
            field: field.into(),
            from,
            to,
        });
        self
    }

    /// Whether the filter has no conditions.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
            && self.categories.is_empty()
            && self.sections.is_empty()
            && self.has_table.is_none()
            && self.has_formula.is_none()
            && self.date_range.is_none()
    }

    /// Whether `metadata` satisfies every condition.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        one_of(metadata, "source", &self.sources)
            && one_of(metadata, "category", &self.categories)
            && one_of(metadata, keys::SECTION, &self.sections)
            && flag_is(metadata, keys::HAS_TABLE, self.has_table)
            && flag_is(metadata, keys::HAS_FORMULA, self.has_formula)
            && self
                .date_range
                .as_ref()
                .is_none_or(|range| range.contains(metadata))
    }
}

fn one_of(metadata: &Metadata, key: &str, allowed: &[String]) -> bool {
    allowed.is_empty()
        || metadata
            .get(key)
            .and_then(Value::as_str)
            .is_some_and(|value| allowed.iter().any(|a| a == value))
}

fn flag_is(metadata: &Metadata, key: &str, expected: Option<bool>) -> bool {
    expected.is_none_or(|expected| {
        metadata.get(key).and_then(Value::as_bool).unwrap_or(false) == expected
    })
}

fn parse_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(raw) => {
            let day = raw.get(..10).unwrap_or(raw);
            NaiveDate::parse_from_str(day, "%Y-%m-%d")
                .ok()
                .or_else(|| {
                    raw.trim()
                        .parse::<i32>()
                        .ok()
                        .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1))
                })
        }
        Value::Number(number) => number
            .as_i64()
            .and_then(|year| i32::try_from(year).ok())
            .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1)),
        _ => None,
    }
}

/// Persists passage vectors and answers similarity and scan queries.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace records by id.
    async fn upsert(&self, records: Vec<StoredPassage>) -> StoreResult<()>;

    /// The `top_k` records closest to `vector`, nearest first.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> StoreResult<Vec<VectorMatch>>;

    /// Records by id or by page.
    async fn get(
        &self,
        selector: Selector,
        filter: Option<&MetadataFilter>,
    ) -> StoreResult<Vec<Record>>;

    /// Number of records matching `filter`.
    async fn count(&self, filter: Option<&MetadataFilter>) -> StoreResult<usize>;

    /// Remove every record of a document, returning how many were removed.
    async fn delete_document(&self, document_id: &str) -> StoreResult<usize>;
}

/// In-process [`VectorStore`] with exact cosine search.
pub struct MemoryVectorStore {
    dimension: usize,
    records: RwLock<IndexMap<String, StoredPassage>>,
}

impl MemoryVectorStore {
    /// Create an empty store for `dimension`-length vectors.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            records: RwLock::new(IndexMap::new()),
        }
    }

    /// Vector dimension accepted by this store.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn check_dimension(&self, actual: usize) -> StoreResult<()> {
        if actual == self.dimension {
            Ok(())
        } else {
            Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual,
            })
        }
    }
}

fn passes(filter: Option<&MetadataFilter>, record: &StoredPassage) -> bool {
    filter.is_none_or(|f| f.matches(&record.metadata))
}

fn to_record(stored: &StoredPassage) -> Record {
    Record {
        id: Some(stored.id.clone()),
        text: stored.text.clone(),
        metadata: stored.metadata.clone(),
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, records: Vec<StoredPassage>) -> StoreResult<()> {
        for record in &records {
            self.check_dimension(record.vector.len())?;
            if record.id.is_empty() {
                return Err(StoreError::InvalidRecord("record id is empty".to_string()));
            }
        }

        let mut stored = self.records.write().await;
        let count = records.len();
        for record in records {
            stored.insert(record.id.clone(), record);
        }
        debug!("Upserted {count} records, store holds {}", stored.len());
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k_count: usize,
        filter: Option<&MetadataFilter>,
    ) -> StoreResult<Vec<VectorMatch>> {
        self.check_dimension(vector.len())?;

        let stored = self.records.read().await;
        let candidates = stored
            .values()
            .filter(|record| passes(filter, record))
            .map(|record| (record.id.as_str(), record.vector.as_slice()));

        let ranked = top_k(vector, candidates, top_k_count)
            .map_err(|e| StoreError::InvalidRecord(e.to_string()))?;

        Ok(ranked
            .into_iter()
            .filter_map(|scored| {
                stored.get(&scored.id).map(|record| VectorMatch {
                    record: to_record(record),
                    distance: 1.0 - scored.score,
                })
            })
            .collect())
    }

    async fn get(
        &self,
        selector: Selector,
        filter: Option<&MetadataFilter>,
    ) -> StoreResult<Vec<Record>> {
        let stored = self.records.read().await;
        let records = match selector {
            Selector::Ids(ids) => {
                let mut seen = HashSet::new();
                ids.iter()
                    .filter(|id| seen.insert(id.as_str()))
                    .filter_map(|id| stored.get(id))
                    .filter(|record| passes(filter, record))
                    .map(to_record)
                    .collect()
            }
            Selector::Page { limit, offset } => stored
                .values()
                .filter(|record| passes(filter, record))
                .skip(offset)
                .take(limit)
                .map(to_record)
                .collect(),
        };
        Ok(records)
    }

    async fn count(&self, filter: Option<&MetadataFilter>) -> StoreResult<usize> {
        let stored = self.records.read().await;
        Ok(match filter {
            None => stored.len(),
            Some(filter) => stored.values().filter(|r| filter.matches(&r.metadata)).count(),
        })
    }

    async fn delete_document(&self, document_id: &str) -> StoreResult<usize> {
        let mut stored = self.records.write().await;
        let before = stored.len();
        stored.retain(|_, record| {
            record.metadata.get(keys::DOCUMENT_ID).and_then(Value::as_str) != Some(document_id)
        });
        let removed = before - stored.len();
        debug!("Deleted {removed} records of document {document_id}");
        Ok(removed)
    }
}
