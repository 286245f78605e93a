//! The retrieval orchestrator and ingestion entry points.

use std::sync::Arc;
use std::time::{Duration, Instant};

use finrag_embeddings::{
    Embedding, EmbeddingError, EmbeddingProvider, EmbeddingRequest, HashingEmbedder,
};
use finrag_passages::{
    BpeTokenizer, DocumentChunker, Metadata, Passage, Tokenizer, WordTokenizer, passage::keys,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bias::apply_section_bias;
use crate::config::RetrievalConfig;
use crate::diversify::select;
use crate::error::{Result, RetrievalError, StoreResult};
use crate::expansion::{ExpandedQuery, QueryExpander};
use crate::fusion::{Channel, ScoredCandidate, fuse, sort_by_score};
use crate::generation::TextGenerator;
use crate::keyword::{KeywordScan, KeywordScorer, ScanStats};
use crate::profile::UserProfile;
use crate::store::{MemoryVectorStore, MetadataFilter, StoredPassage, VectorStore};

/// Hex characters of the content digest used as a generated document id.
const DOCUMENT_DIGEST_CHARS: usize = 16;

/// One retrieval call.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub query: String,
    pub profile: Option<UserProfile>,
    pub filters: Option<MetadataFilter>,

    /// Passages wanted. Defaults to `search.top_k`.
    pub k: Option<usize>,

    /// Cancelling this token cuts the keyword scan short.
    pub cancel: CancellationToken,
}

impl RetrievalRequest {
    /// Create a request for `query`.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            profile: None,
            filters: None,
            k: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_profile(mut self, profile: UserProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn with_filters(mut self, filters: MetadataFilter) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Which embedder produced the query vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingSource {
    Provider,
    /// The configured provider failed and the local hashing embedder was used.
    Fallback,
}

/// Ranked passages plus how they were found.
///
/// An empty `passages` list is a successful search with no matches; failures
/// are reported as [`RetrievalError`].
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub query: ExpandedQuery,
    pub passages: Vec<ScoredCandidate>,
    pub embedding_source: EmbeddingSource,
    pub keyword: ScanStats,
    pub elapsed_ms: u64,
}

impl RetrievalResult {
    /// Whether nothing matched.
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Render the passages as numbered, section-labelled blocks for an
    /// answer prompt.
    pub fn context_block(&self) -> String {
        self.passages
            .iter()
            .enumerate()
            .map(|(index, candidate)| {
                let passage = &candidate.passage;
                let label = match (&passage.section, &passage.subsection) {
                    (Some(section), Some(subsection)) => format!("{section} > {subsection}"),
                    (Some(section), None) => section.clone(),
                    (None, Some(subsection)) => subsection.clone(),
                    (None, None) => passage.document_id.clone(),
                };
                format!("[{}] {label}\n{}", index + 1, passage.text)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Outcome of ingesting one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub document_id: String,

    /// Passages written.
    pub passages: usize,

    /// Passages embedded by the local fallback.
    pub fallback_embeddings: usize,

    /// Passages of a previous version that were deleted.
    pub replaced: usize,
}

/// Hybrid retrieval over a passage store.
///
/// Every collaborator is injected through [`RetrievalEngineBuilder`]; the
/// engine holds no global state and can serve concurrent calls.
pub struct RetrievalEngine {
    config: RetrievalConfig,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    fallback: HashingEmbedder,
    expander: QueryExpander,
    keyword: KeywordScorer,
    chunker: DocumentChunker,
}

impl RetrievalEngine {
    /// Create a new engine builder.
    pub fn builder() -> RetrievalEngineBuilder {
        RetrievalEngineBuilder::new()
    }

    /// The engine's configuration.
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Find the `k` best passages for a request.
    ///
    /// Expand → vector and keyword search concurrently → fuse → section
    /// bias → re-sort → MMR.
    pub async fn retrieve(&self, request: RetrievalRequest) -> Result<RetrievalResult> {
        let started = Instant::now();
        let query = request.query.trim();
        if query.is_empty() {
            return Err(RetrievalError::InvalidRequest("query is empty".to_string()));
        }
        let k = request.k.unwrap_or(self.config.search.top_k);
        if k == 0 {
            return Err(RetrievalError::InvalidRequest("k must be positive".to_string()));
        }
        let filter = request.filters.as_ref().filter(|f| !f.is_empty());

        let expanded = self.expander.expand(query, request.profile.as_ref()).await;
        debug!("Expanded query ({:?}): {}", expanded.source, expanded.expanded);

        let pool = self.config.search.pool_size(k);
        let scan_token = request.cancel.child_token();
        let timer = self.config.keyword.scan_timeout_ms.map(|ms| {
            let token = scan_token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                token.cancel();
            })
        });

        let (vector, keyword) = tokio::join!(
            self.vector_channel(&expanded.expanded, pool, filter),
            self.keyword
                .search(self.store.as_ref(), &expanded.expanded, pool, filter, &scan_token),
        );
        if let Some(timer) = timer {
            timer.abort();
        }

        let (vector_hits, embedding_source) = vector?;
        let KeywordScan { hits, stats } = keyword?;
        debug!(
            "Channels returned {} vector and {} keyword candidates",
            vector_hits.len(),
            hits.len()
        );

        let keyword_hits = hits
            .into_iter()
            .map(|hit| ScoredCandidate::new(hit.passage, hit.score, Channel::Keyword))
            .collect();
        let mut candidates = fuse(vector_hits, keyword_hits, self.config.search.alpha);

        let boosted = apply_section_bias(&mut candidates, &expanded.priority_sections, &self.config.bias);
        sort_by_score(&mut candidates);
        let passages = select(candidates, k, self.config.search.lambda);

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            "Retrieved {} passages for {query:?} in {elapsed_ms}ms ({boosted} boosted, keyword scan cancelled: {})",
            passages.len(),
            stats.cancelled
        );

        Ok(RetrievalResult {
            query: expanded,
            passages,
            embedding_source,
            keyword: stats,
            elapsed_ms,
        })
    }

    async fn vector_channel(
        &self,
        text: &str,
        pool: usize,
        filter: Option<&MetadataFilter>,
    ) -> StoreResult<(Vec<ScoredCandidate>, EmbeddingSource)> {
        let (vector, source) = match self.embed_with_provider(text).await {
            Ok(vector) => (vector, EmbeddingSource::Provider),
            Err(e) => {
                warn!("Query embedding via {} failed, using local fallback: {e}", self.embedder.name());
                (self.fallback.embed_text(text), EmbeddingSource::Fallback)
            }
        };

        let matches = self.store.query(&vector, pool, filter).await?;
        let candidates = matches
            .iter()
            .map(|m| ScoredCandidate::new(m.record.to_passage(), m.similarity(), Channel::Vector))
            .collect();
        Ok((candidates, source))
    }

    async fn embed_with_provider(&self, text: &str) -> finrag_embeddings::Result<Embedding> {
        let dimension = self.config.embedding.dimension;
        let response = self
            .embedder
            .embed(EmbeddingRequest::new(text).with_dimensions(dimension))
            .await?;
        check_dimension(response.embedding, dimension)
    }

    async fn embed_passages(&self, passages: &[Passage]) -> finrag_embeddings::Result<Vec<Embedding>> {
        let dimension = self.config.embedding.dimension;
        let requests = passages
            .iter()
            .map(|p| EmbeddingRequest::new(p.text.as_str()).with_dimensions(dimension))
            .collect();
        let responses = self.embedder.embed_batch(requests).await?;
        if responses.len() != passages.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                passages.len(),
                responses.len()
            )));
        }
        responses
            .into_iter()
            .map(|response| check_dimension(response.embedding, dimension))
            .collect()
    }

    /// Chunk, embed and store a document.
    ///
    /// The document id is taken from the `document_id` metadata key, or
    /// derived from a digest of the text. If the provider cannot embed the
    /// passages, all of them are embedded by the local fallback.
    pub async fn add_document(&self, text: &str, metadata: Metadata) -> Result<IngestReport> {
        let document_id = metadata
            .get(keys::DOCUMENT_ID)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map_or_else(|| content_document_id(text), String::from);

        let passages = self.chunker.chunk(text, &document_id, &metadata);
        if passages.is_empty() {
            debug!("Document {document_id} produced no passages");
            return Ok(IngestReport {
                document_id,
                passages: 0,
                fallback_embeddings: 0,
                replaced: 0,
            });
        }

        let (vectors, fallback_embeddings) = match self.embed_passages(&passages).await {
            Ok(vectors) => (vectors, 0),
            Err(e) => {
                warn!(
                    "Embedding {} passages of {document_id} via {} failed, using local fallback: {e}",
                    passages.len(),
                    self.embedder.name()
                );
                let vectors = passages
                    .iter()
                    .map(|p| self.fallback.embed_text(&p.text))
                    .collect();
                (vectors, passages.len())
            }
        };

        let records = passages
            .iter()
            .zip(vectors)
            .map(|(passage, vector)| StoredPassage::new(passage, vector))
            .collect();
        self.store.upsert(records).await?;

        info!(
            "Ingested {document_id}: {} passages ({fallback_embeddings} fallback embeddings)",
            passages.len()
        );

        Ok(IngestReport {
            document_id,
            passages: passages.len(),
            fallback_embeddings,
            replaced: 0,
        })
    }

    /// Delete every passage of `document_id`, then ingest `text` under it.
    pub async fn replace_document(
        &self,
        document_id: &str,
        text: &str,
        mut metadata: Metadata,
    ) -> Result<IngestReport> {
        if document_id.trim().is_empty() {
            return Err(RetrievalError::InvalidRequest("document id is empty".to_string()));
        }
        metadata.insert(keys::DOCUMENT_ID.to_string(), Value::from(document_id));

        let replaced = self.store.delete_document(document_id).await?;
        debug!("Deleted {replaced} passages of {document_id}");

        let mut report = self.add_document(text, metadata).await?;
        report.replaced = replaced;
        Ok(report)
    }
}

fn check_dimension(embedding: Embedding, expected: usize) -> finrag_embeddings::Result<Embedding> {
    if embedding.len() == expected {
        Ok(embedding)
    } else {
        Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: embedding.len(),
        })
    }
}

fn content_document_id(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    format!("doc-{}", &hex[..DOCUMENT_DIGEST_CHARS])
}

/// Builder for [`RetrievalEngine`].
pub struct RetrievalEngineBuilder {
    config: RetrievalConfig,
    store: Option<Arc<dyn VectorStore>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    generator: Option<Arc<dyn TextGenerator>>,
    tokenizer: Option<Arc<dyn Tokenizer>>,
}

impl RetrievalEngineBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: RetrievalConfig::default(),
            store: None,
            embedder: None,
            generator: None,
            tokenizer: None,
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: RetrievalConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the vector store. Defaults to an empty in-memory store.
    pub fn with_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the embedding provider. Defaults to the local hashing embedder.
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Set the text generator used for query expansion.
    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Set the chunking tokenizer. Defaults to `cl100k_base`.
    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    /// Validate the configuration and build the engine.
    pub fn build(self) -> Result<RetrievalEngine> {
        let config = self.config;
        config.validate()?;

        let dimension = config.embedding.dimension;
        let fallback = HashingEmbedder::new(dimension).with_max_terms(config.embedding.fallback_terms);

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryVectorStore::new(dimension)));
        let embedder = self
            .embedder
            .unwrap_or_else(|| Arc::new(fallback.clone()));
        let tokenizer: Arc<dyn Tokenizer> = match self.tokenizer {
            Some(tokenizer) => tokenizer,
            None => match BpeTokenizer::cl100k() {
                Ok(bpe) => Arc::new(bpe),
                Err(e) => {
                    warn!("BPE tokenizer unavailable, counting whitespace tokens: {e}");
                    Arc::new(WordTokenizer::new())
                }
            },
        };

        info!(
            "Building retrieval engine: embedder {}, dimension {dimension}, generator {}",
            embedder.name(),
            self.generator.as_ref().map_or("none", |g| g.name())
        );

        Ok(RetrievalEngine {
            expander: QueryExpander::new(self.generator, config.expansion.clone()),
            keyword: KeywordScorer::new(config.keyword.clone()),
            chunker: DocumentChunker::new(config.chunking.clone(), tokenizer),
            config,
            store,
            embedder,
            fallback,
        })
    }
}

impl Default for RetrievalEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
