//! The two-stage retrieval pipeline.
//!
//! Stage one embeds the query and shortlists nearest items from the vector
//! store; stage two resolves candidate content and reranks the shortlist
//! with a cross-encoder. Each stage degrades to an empty result when its
//! optional collaborator is missing, while embedding-path errors and
//! invalid arguments always surface.

use std::sync::Arc;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use engram_embeddings::service::with_timeout;
use engram_embeddings::{EmbeddingService, VectorStore};

use crate::config::RetrievalConfig;
use crate::content::ContentStore;
use crate::error::{Result, RetrievalError};
use crate::rerank::{Reranker, normalize_scores};

/// A coarse-search candidate: item id plus store-reported similarity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    /// ID of the candidate item.
    pub id: String,

    /// Coarse similarity score.
    pub score: f32,
}

/// A reranked result with its score normalized into [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankResult {
    /// ID of the ranked item.
    pub id: String,

    /// Normalized cross-encoder score.
    pub score: f32,
}

/// Which stages produced a combined search outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPhase {
    /// Only coarse search ran: the reranker was unavailable or there was
    /// nothing to rerank.
    CoarseOnly,
    /// The shortlist was reranked by the cross-encoder.
    Reranked,
}

/// Outcome of a combined coarse-search + rerank run.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// How far the pipeline got.
    pub phase: SearchPhase,

    /// The coarse shortlist, in store order.
    pub candidates: Vec<RetrievalCandidate>,

    /// Reranked results; empty when `phase` is `CoarseOnly`.
    pub results: Vec<RerankResult>,
}

/// Coarse vector search followed by cross-encoder reranking.
pub struct RetrievalPipeline {
    config: RetrievalConfig,
    embeddings: Arc<EmbeddingService>,
    store: Arc<dyn VectorStore>,
    content: Arc<dyn ContentStore>,
    reranker: Reranker,
}

impl RetrievalPipeline {
    /// Create a pipeline over the given collaborators.
    pub fn new(
        config: RetrievalConfig,
        embeddings: Arc<EmbeddingService>,
        store: Arc<dyn VectorStore>,
        content: Arc<dyn ContentStore>,
    ) -> Self {
        let reranker = Reranker::new(config.rerank.clone());
        Self {
            config,
            embeddings,
            store,
            content,
            reranker,
        }
    }

    /// Replace the reranker (e.g. with an injected encoder).
    pub fn with_reranker(mut self, reranker: Reranker) -> Self {
        self.reranker = reranker;
        self
    }

    /// The reranker handle, exposing its availability probe.
    pub fn reranker(&self) -> &Reranker {
        &self.reranker
    }

    /// Default candidate count from configuration.
    pub fn default_top_k(&self) -> usize {
        self.config.top_k
    }

    /// Stage one: embed the query and shortlist the nearest items.
    ///
    /// `top_k == 0` is rejected before any collaborator is contacted.
    /// Embedding errors surface to the caller; an unreachable store
    /// degrades to an empty candidate list since coarse search is a
    /// best-effort, latency-sensitive stage.
    pub async fn coarse_search(
        &self,
        query_text: &str,
        top_k: usize,
        filter: Option<&serde_json::Value>,
    ) -> Result<Vec<RetrievalCandidate>> {
        if top_k == 0 {
            return Err(RetrievalError::InvalidArgument(
                "top_k must be positive".to_string(),
            ));
        }

        // Queries are one-shot; only corpus items go through the cache.
        let query_vector = self.embeddings.generate_embedding(query_text).await?;

        let hits = with_timeout(
            "similarity search",
            self.config.store_timeout(),
            self.store.similarity_search(
                &self.config.store_table,
                &query_vector,
                &self.config.store_column,
                top_k,
                filter,
            ),
        )
        .await;

        match hits {
            Ok(hits) => Ok(hits
                .into_iter()
                .map(|hit| RetrievalCandidate {
                    id: hit.id,
                    score: hit.score,
                })
                .collect()),
            Err(err) => {
                warn!(error = %err, "coarse search degraded to empty results");
                Ok(Vec::new())
            }
        }
    }

    /// Stage two: rerank candidates with the cross-encoder.
    ///
    /// Candidates whose content cannot be resolved are skipped (logged,
    /// not fatal). An unavailable reranker yields an empty list rather
    /// than coarse scores, so callers can tell the difference. Results
    /// are sorted by normalized score descending; exact ties keep the
    /// coarse-search order.
    pub async fn rerank(
        &self,
        query_text: &str,
        candidates: &[RetrievalCandidate],
    ) -> Result<Vec<RerankResult>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let limit = self.config.rerank.max_candidates.max(1);
        if candidates.len() > limit {
            debug!(
                scored = limit,
                dropped = candidates.len() - limit,
                "capping rerank batch"
            );
        }

        let mut ids = Vec::with_capacity(candidates.len().min(limit));
        let mut pairs = Vec::with_capacity(candidates.len().min(limit));
        for candidate in candidates.iter().take(limit) {
            match self.content_text(&candidate.id).await {
                Ok(Some(text)) => {
                    ids.push(candidate.id.clone());
                    pairs.push((query_text.to_string(), text));
                }
                Ok(None) => {
                    debug!(id = %candidate.id, "skipping candidate without content");
                }
                Err(err) => {
                    debug!(id = %candidate.id, error = %err, "skipping candidate whose content failed to load");
                }
            }
        }

        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        let Some(raw) = self.reranker.score(&pairs).await? else {
            return Ok(Vec::new());
        };

        let normalized = normalize_scores(&raw);
        let mut results: Vec<RerankResult> = ids
            .into_iter()
            .zip(normalized)
            .map(|(id, score)| RerankResult { id, score })
            .collect();

        // sort_by is stable, so equal scores keep their input order.
        results.sort_by(|a, b| OrderedFloat(b.score).cmp(&OrderedFloat(a.score)));

        Ok(results)
    }

    /// Run both stages and report how far the pipeline got.
    pub async fn search(&self, query_text: &str, top_k: usize) -> Result<SearchOutcome> {
        let candidates = self.coarse_search(query_text, top_k, None).await?;
        if candidates.is_empty() {
            return Ok(SearchOutcome {
                phase: SearchPhase::CoarseOnly,
                candidates,
                results: Vec::new(),
            });
        }

        let results = self.rerank(query_text, &candidates).await?;
        let phase = if results.is_empty() {
            SearchPhase::CoarseOnly
        } else {
            SearchPhase::Reranked
        };

        Ok(SearchOutcome {
            phase,
            candidates,
            results,
        })
    }

    async fn content_text(&self, id: &str) -> Result<Option<String>> {
        match tokio::time::timeout(self.config.content_timeout(), self.content.get_text(id)).await
        {
            Ok(result) => result,
            Err(_) => Err(RetrievalError::Content(format!(
                "content lookup for {id} timed out"
            ))),
        }
    }
}
