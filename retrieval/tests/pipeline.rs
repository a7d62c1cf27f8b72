//! End-to-end pipeline scenarios over in-memory collaborators.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use engram_embeddings::{
    Embedding, EmbeddingConfig, EmbeddingError, EmbeddingProvider, EmbeddingRequest,
    EmbeddingResponse, EmbeddingService, MemoryVectorStore, StoreHit, VectorStore,
};
use engram_retrieval::{
    CrossEncoder, MemoryContentStore, Reranker, Result, RetrievalConfig, RetrievalError,
    RetrievalPipeline, SearchPhase,
};

/// Provider that embeds every text as the same fixed query vector and
/// counts its calls.
struct FixedProvider {
    vector: Embedding,
    calls: AtomicUsize,
}

impl FixedProvider {
    fn new(vector: Embedding) -> Self {
        Self {
            vector,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FixedProvider {
    fn name(&self) -> &str {
        "fixed"
    }

    fn model(&self) -> &str {
        "fixed"
    }

    fn dimension(&self) -> usize {
        self.vector.len()
    }

    fn max_input_chars(&self) -> usize {
        256
    }

    fn max_batch_size(&self) -> usize {
        8
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn embed(
        &self,
        _request: EmbeddingRequest,
    ) -> engram_embeddings::Result<EmbeddingResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(EmbeddingResponse {
            embedding: self.vector.clone(),
            model: "fixed".to_string(),
            dimension: self.vector.len(),
            tokens_used: None,
        })
    }
}

/// Store whose every call fails, standing in for an unreachable backend.
struct UnreachableStore;

#[async_trait]
impl VectorStore for UnreachableStore {
    async fn similarity_search(
        &self,
        _table: &str,
        _vector: &[f32],
        _column: &str,
        _top_k: usize,
        _filter: Option<&serde_json::Value>,
    ) -> engram_embeddings::Result<Vec<StoreHit>> {
        Err(EmbeddingError::StoreUnavailable("connection refused".to_string()))
    }

    async fn add_embedding(
        &self,
        _table: &str,
        _id: &str,
        _vector: &[f32],
        _column: &str,
        _metadata: Option<serde_json::Value>,
    ) -> engram_embeddings::Result<()> {
        Err(EmbeddingError::StoreUnavailable("connection refused".to_string()))
    }

    async fn get_embedding(
        &self,
        _table: &str,
        _id: &str,
        _column: &str,
    ) -> engram_embeddings::Result<Option<Embedding>> {
        Err(EmbeddingError::StoreUnavailable("connection refused".to_string()))
    }
}

/// Encoder that scores by candidate text length.
struct LengthEncoder;

impl CrossEncoder for LengthEncoder {
    fn score(&self, pairs: &[(String, String)]) -> Result<Vec<f32>> {
        Ok(pairs.iter().map(|(_, text)| text.len() as f32).collect())
    }
}

/// Encoder that gives every pair the same score.
struct ConstantEncoder;

impl CrossEncoder for ConstantEncoder {
    fn score(&self, pairs: &[(String, String)]) -> Result<Vec<f32>> {
        Ok(vec![0.5; pairs.len()])
    }
}

fn embedding_service(provider: Arc<dyn EmbeddingProvider>) -> Arc<EmbeddingService> {
    Arc::new(EmbeddingService::with_provider(
        EmbeddingConfig::default(),
        provider,
    ))
}

async fn seeded_store() -> Arc<MemoryVectorStore> {
    let store = Arc::new(MemoryVectorStore::new());
    // Query vector is [1, 0]: "best" is closest, then "mid", then "worst".
    store
        .add_embedding("episodes", "best", &[1.0, 0.0], "embedding", None)
        .await
        .unwrap();
    store
        .add_embedding("episodes", "mid", &[0.7, 0.7], "embedding", None)
        .await
        .unwrap();
    store
        .add_embedding("episodes", "worst", &[0.0, 1.0], "embedding", None)
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn coarse_search_orders_candidates_by_store_similarity() {
    let store = seeded_store().await;
    let pipeline = RetrievalPipeline::new(
        RetrievalConfig::default(),
        embedding_service(Arc::new(FixedProvider::new(vec![1.0, 0.0]))),
        store,
        Arc::new(MemoryContentStore::new()),
    );

    let candidates = pipeline.coarse_search("query", 2, None).await.unwrap();
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].id, "best");
    assert_eq!(candidates[1].id, "mid");
    assert!(candidates[0].score >= candidates[1].score);
}

#[tokio::test]
async fn coarse_search_against_unreachable_store_is_empty() {
    let pipeline = RetrievalPipeline::new(
        RetrievalConfig::default(),
        embedding_service(Arc::new(FixedProvider::new(vec![1.0, 0.0]))),
        Arc::new(UnreachableStore),
        Arc::new(MemoryContentStore::new()),
    );

    let candidates = pipeline.coarse_search("query", 5, None).await.unwrap();
    assert!(candidates.is_empty());
}

#[tokio::test]
async fn zero_top_k_is_rejected_before_any_collaborator_call() {
    let provider = Arc::new(FixedProvider::new(vec![1.0, 0.0]));
    let pipeline = RetrievalPipeline::new(
        RetrievalConfig::default(),
        embedding_service(provider.clone()),
        Arc::new(UnreachableStore),
        Arc::new(MemoryContentStore::new()),
    );

    let err = pipeline.coarse_search("query", 0, None).await.unwrap_err();
    assert!(matches!(err, RetrievalError::InvalidArgument(_)));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn search_reranks_with_injected_encoder() {
    let store = seeded_store().await;
    let content = Arc::new(MemoryContentStore::new());
    content.insert("best", "short").await;
    content.insert("mid", "a much longer candidate text").await;
    content.insert("worst", "middle-sized text").await;

    let pipeline = RetrievalPipeline::new(
        RetrievalConfig::default(),
        embedding_service(Arc::new(FixedProvider::new(vec![1.0, 0.0]))),
        store,
        content,
    )
    .with_reranker(Reranker::with_encoder(Arc::new(LengthEncoder)));

    let outcome = pipeline.search("query", 3).await.unwrap();
    assert_eq!(outcome.phase, SearchPhase::Reranked);
    assert_eq!(outcome.candidates.len(), 3);
    assert_eq!(outcome.results.len(), 3);

    // Longest content wins under the length encoder.
    assert_eq!(outcome.results[0].id, "mid");
    assert_eq!(outcome.results[1].id, "worst");
    assert_eq!(outcome.results[2].id, "best");

    // Normalized scores: descending, inside [0, 1], extremes at the bounds.
    for pair in outcome.results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert!((outcome.results[0].score - 1.0).abs() < 1e-5);
    assert!(outcome.results[2].score.abs() < 1e-5);
}

#[tokio::test]
async fn search_without_reranker_reports_coarse_only() {
    let store = seeded_store().await;
    let pipeline = RetrievalPipeline::new(
        RetrievalConfig::default(),
        embedding_service(Arc::new(FixedProvider::new(vec![1.0, 0.0]))),
        store,
        Arc::new(MemoryContentStore::new()),
    );

    assert!(!pipeline.reranker().is_available().await);

    let outcome = pipeline.search("query", 3).await.unwrap();
    assert_eq!(outcome.phase, SearchPhase::CoarseOnly);
    assert_eq!(outcome.candidates.len(), 3);
    assert!(outcome.results.is_empty());
}

#[tokio::test]
async fn tied_scores_keep_coarse_order() {
    let store = seeded_store().await;
    let content = Arc::new(MemoryContentStore::new());
    content.insert("best", "one").await;
    content.insert("mid", "two").await;
    content.insert("worst", "three").await;

    let pipeline = RetrievalPipeline::new(
        RetrievalConfig::default(),
        embedding_service(Arc::new(FixedProvider::new(vec![1.0, 0.0]))),
        store,
        content,
    )
    .with_reranker(Reranker::with_encoder(Arc::new(ConstantEncoder)));

    let results = pipeline
        .rerank(
            "query",
            &pipeline.coarse_search("query", 3, None).await.unwrap(),
        )
        .await
        .unwrap();

    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["best", "mid", "worst"]);
    // All-equal raw scores normalize to zero.
    assert!(results.iter().all(|r| r.score == 0.0));
}

#[tokio::test]
async fn candidates_without_content_are_skipped() {
    let store = seeded_store().await;
    let content = Arc::new(MemoryContentStore::new());
    content.insert("best", "resolved text").await;
    // "mid" and "worst" have no content.

    let pipeline = RetrievalPipeline::new(
        RetrievalConfig::default(),
        embedding_service(Arc::new(FixedProvider::new(vec![1.0, 0.0]))),
        store,
        content,
    )
    .with_reranker(Reranker::with_encoder(Arc::new(LengthEncoder)));

    let candidates = pipeline.coarse_search("query", 3, None).await.unwrap();
    let results = pipeline.rerank("query", &candidates).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "best");
}

#[tokio::test]
async fn rerank_of_empty_candidates_is_empty() {
    let pipeline = RetrievalPipeline::new(
        RetrievalConfig::default(),
        embedding_service(Arc::new(FixedProvider::new(vec![1.0, 0.0]))),
        Arc::new(UnreachableStore),
        Arc::new(MemoryContentStore::new()),
    )
    .with_reranker(Reranker::with_encoder(Arc::new(LengthEncoder)));

    let results = pipeline.rerank("query", &[]).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn metadata_filter_narrows_coarse_search() {
    let store = Arc::new(MemoryVectorStore::new());
    store
        .add_embedding(
            "episodes",
            "work",
            &[1.0, 0.0],
            "embedding",
            Some(serde_json::json!({"topic": "work"})),
        )
        .await
        .unwrap();
    store
        .add_embedding(
            "episodes",
            "home",
            &[1.0, 0.0],
            "embedding",
            Some(serde_json::json!({"topic": "home"})),
        )
        .await
        .unwrap();

    let pipeline = RetrievalPipeline::new(
        RetrievalConfig::default(),
        embedding_service(Arc::new(FixedProvider::new(vec![1.0, 0.0]))),
        store,
        Arc::new(MemoryContentStore::new()),
    );

    let filter = serde_json::json!({"topic": "work"});
    let candidates = pipeline
        .coarse_search("query", 5, Some(&filter))
        .await
        .unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].id, "work");
}
