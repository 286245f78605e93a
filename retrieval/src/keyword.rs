//! Lexical relevance over the stored passage population.
//!
//! Scoring is BM25-style term-frequency saturation averaged over the distinct
//! query terms and divided by `k1 + 1`, so every score lies in `[0, 1)` and
//! is comparable across queries of different lengths.
//!
//! The scan reads the store page by page. It stops at the first of:
//!
//! - the planned pages (population bounded by `max_scan`) are exhausted
//! - `min_pages` pages are done and `limit * early_stop_multiple` hits exist
//! - the cancellation token fires, keeping whatever was scored so far

use std::collections::{HashMap, HashSet};

use finrag_passages::{Passage, terms};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::KeywordConfig;
use crate::error::StoreResult;
use crate::store::{MetadataFilter, Record, Selector, VectorStore};

/// A passage with its keyword score.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    pub passage: Passage,
    pub score: f32,
}

/// Counters describing one keyword scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Records read from the store.
    pub scanned: usize,

    /// Pages fetched.
    pub pages: usize,

    /// Passages with a positive score, before truncation to the limit.
    pub matched: usize,

    /// The scan was cut short by cancellation.
    pub cancelled: bool,

    /// The scan ended early because enough hits were found.
    pub stopped_early: bool,
}

/// Result of a keyword scan: the best hits plus scan counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeywordScan {
    pub hits: Vec<KeywordHit>,
    pub stats: ScanStats,
}

/// BM25-style keyword scorer.
#[derive(Debug, Clone, Default)]
pub struct KeywordScorer {
    config: KeywordConfig,
}

impl KeywordScorer {
    /// Create a scorer.
    pub fn new(config: KeywordConfig) -> Self {
        Self { config }
    }

    /// Distinct terms of `query`, in first-seen order.
    pub fn query_terms(query: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        terms(query)
            .into_iter()
            .filter(|term| seen.insert(term.clone()))
            .collect()
    }

    /// Saturated contribution of one term, normalized into `[0, 1)`.
    fn saturation(&self, frequency: usize, doc_len: usize) -> f32 {
        if frequency == 0 {
            return 0.0;
        }
        let KeywordConfig { k1, b, avg_doc_len, .. } = self.config;
        let tf = frequency as f32;
        let length_norm = 1.0 - b + b * (doc_len as f32 / avg_doc_len);
        let saturated = tf * (k1 + 1.0) / (tf + k1 * length_norm);
        saturated / (k1 + 1.0)
    }

    /// Score `text` against distinct `query_terms`.
    pub fn score_text(&self, query_terms: &[String], text: &str) -> f32 {
        if query_terms.is_empty() {
            return 0.0;
        }

        let doc_terms = terms(text);
        let mut frequencies: HashMap<&str, usize> = HashMap::new();
        for term in &doc_terms {
            *frequencies.entry(term.as_str()).or_default() += 1;
        }

        let total: f32 = query_terms
            .iter()
            .map(|term| {
                let frequency = frequencies.get(term.as_str()).copied().unwrap_or(0);
                self.saturation(frequency, doc_terms.len())
            })
            .sum();
        total / query_terms.len() as f32
    }

    /// Rank `passages` against `query_terms`, dropping non-matches.
    ///
    /// Equal scores keep input order.
    pub fn score(&self, query_terms: &[String], passages: Vec<Passage>) -> Vec<KeywordHit> {
        let mut hits: Vec<KeywordHit> = passages
            .into_iter()
            .filter_map(|passage| {
                let score = self.score_text(query_terms, &passage.text);
                (score > 0.0).then_some(KeywordHit { passage, score })
            })
            .collect();
        hits.sort_by_key(|hit| std::cmp::Reverse(OrderedFloat(hit.score)));
        hits
    }

    /// Pages needed to cover `total_population_estimate` passages, bounded
    /// by the scan ceiling.
    pub fn plan_pages(&self, total_population_estimate: usize) -> usize {
        total_population_estimate
            .min(self.config.max_scan)
            .div_ceil(self.config.page_size.max(1))
    }

    /// Scan the store for the `limit` best keyword matches of `query`.
    ///
    /// Cancellation is not an error: the returned scan is marked
    /// `cancelled` and holds the hits scored before the token fired.
    pub async fn search(
        &self,
        store: &dyn VectorStore,
        query: &str,
        limit: usize,
        filter: Option<&MetadataFilter>,
        cancel: &CancellationToken,
    ) -> StoreResult<KeywordScan> {
        let query_terms = Self::query_terms(query);
        if query_terms.is_empty() || limit == 0 {
            return Ok(KeywordScan::default());
        }

        let population = store.count(filter).await?;
        let ceiling = population.min(self.config.max_scan);
        let page_size = self.config.page_size.max(1);
        let planned = self.plan_pages(population);
        let early_stop_at = limit.saturating_mul(self.config.early_stop_multiple);

        let mut stats = ScanStats::default();
        let mut hits = Vec::new();

        for page in 0..planned {
            if cancel.is_cancelled() {
                stats.cancelled = true;
                break;
            }

            let offset = page * page_size;
            let selector = Selector::Page {
                limit: page_size.min(ceiling - offset),
                offset,
            };

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                records = store.get(selector, filter) => Some(records?),
            };
            let Some(records) = fetched else {
                stats.cancelled = true;
                break;
            };
            if records.is_empty() {
                break;
            }

            stats.pages += 1;
            stats.scanned += records.len();
            let passages = records.iter().map(Record::to_passage).collect();
            hits.extend(self.score(&query_terms, passages));

            if early_stop_at > 0
                && stats.pages >= self.config.min_pages
                && hits.len() >= early_stop_at
                && page + 1 < planned
            {
                stats.stopped_early = true;
                break;
            }
        }

        if stats.cancelled {
            warn!(
                "Keyword scan cancelled after {} pages ({} passages, {} hits)",
                stats.pages,
                stats.scanned,
                hits.len()
            );
        }

        hits.sort_by_key(|hit| std::cmp::Reverse(OrderedFloat(hit.score)));
        stats.matched = hits.len();
        hits.truncate(limit);

        debug!(
            "Keyword scan: {} of {population} passages in {} pages, {} matches",
            stats.scanned, stats.pages, stats.matched
        );

        Ok(KeywordScan { hits, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryVectorStore, StoredPassage};
    use finrag_passages::Metadata;
    use pretty_assertions::assert_eq;

    fn passage(id: &str, text: &str) -> Passage {
        Passage::from_record(Some(id), text, &Metadata::new())
    }

    async fn store_with(texts: &[String]) -> MemoryVectorStore {
        let store = MemoryVectorStore::new(2);
        let records = texts
            .iter()
            .enumerate()
            .map(|(i, text)| StoredPassage::new(&passage(&format!("doc_{i}"), text), vec![1.0, 0.0]))
            .collect();
        store.upsert(records).await.unwrap();
        store
    }

    #[test]
    fn test_scores_are_normalized_means() {
        let scorer = KeywordScorer::default();
        let query = KeywordScorer::query_terms("catch-up contribution limit");

        let full = scorer.score_text(&query, "catch-up contribution limit 2024");
        let partial = scorer.score_text(&query, "the contribution deadline");
        let none = scorer.score_text(&query, "mortgage escrow");

        assert!(full > partial && partial > 0.0);
        assert!(full < 1.0);
        assert_eq!(none, 0.0);
    }

    #[test]
    fn test_saturation_and_length_normalization() {
        let scorer = KeywordScorer::default();
        let query = KeywordScorer::query_terms("ira");

        let once = scorer.score_text(&query, "ira rules");
        let thrice = scorer.score_text(&query, "ira ira ira rules");
        assert!(thrice > once);
        assert!(thrice - once < once);

        let padding = vec!["filler"; 300].join(" ");
        let long = scorer.score_text(&query, &format!("ira {padding}"));
        assert!(long < once);
    }

    #[test]
    fn test_score_ranks_and_filters() {
        let scorer = KeywordScorer::default();
        let query = KeywordScorer::query_terms("roth conversion");
        let hits = scorer.score(
            &query,
            vec![
                passage("a", "traditional ira basics"),
                passage("b", "roth conversion ladder and roth conversion taxes"),
                passage("c", "roth accounts"),
            ],
        );

        let ids: Vec<_> = hits.iter().map(|h| h.passage.passage_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_plan_pages_respects_ceiling() {
        let scorer = KeywordScorer::new(KeywordConfig {
            page_size: 100,
            max_scan: 250,
            ..KeywordConfig::default()
        });
        assert_eq!(scorer.plan_pages(0), 0);
        assert_eq!(scorer.plan_pages(101), 2);
        assert_eq!(scorer.plan_pages(10_000), 3);
    }

    #[tokio::test]
    async fn test_search_scans_pages_until_ceiling() {
        let texts: Vec<String> = (0..25).map(|i| format!("passage {i} about budgeting")).collect();
        let store = store_with(&texts).await;
        let scorer = KeywordScorer::new(KeywordConfig {
            page_size: 10,
            max_scan: 25,
            early_stop_multiple: 0,
            ..KeywordConfig::default()
        });

        let scan = scorer
            .search(&store, "budgeting", 5, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(scan.stats.pages, 3);
        assert_eq!(scan.stats.scanned, 25);
        assert_eq!(scan.stats.matched, 25);
        assert_eq!(scan.hits.len(), 5);
        assert!(!scan.stats.stopped_early && !scan.stats.cancelled);
    }

    #[tokio::test]
    async fn test_search_stops_early() {
        let texts: Vec<String> = (0..100).map(|i| format!("hsa rule {i}")).collect();
        let store = store_with(&texts).await;
        let scorer = KeywordScorer::new(KeywordConfig {
            page_size: 10,
            min_pages: 2,
            early_stop_multiple: 3,
            ..KeywordConfig::default()
        });

        let scan = scorer
            .search(&store, "hsa", 5, None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(scan.stats.stopped_early);
        assert_eq!(scan.stats.pages, 2);
        assert_eq!(scan.stats.matched, 20);
    }

    #[tokio::test]
    async fn test_cancelled_search_returns_partial_scan() {
        let texts = vec!["fsa limits".to_string()];
        let store = store_with(&texts).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let scan = KeywordScorer::default()
            .search(&store, "fsa", 5, None, &cancel)
            .await
            .unwrap();

        assert!(scan.stats.cancelled);
        assert!(scan.hits.is_empty());
        assert_eq!(scan.stats.pages, 0);
    }

    #[tokio::test]
    async fn test_short_query_terms_are_ignored() {
        let store = store_with(&["an ira".to_string()]).await;
        let scan = KeywordScorer::default()
            .search(&store, "an a", 5, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(scan, KeywordScan::default());
    }
}
