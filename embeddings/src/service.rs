//! The embedding service facade.
//!
//! Owns the provider handle, the bounded vector cache, and (optionally) a
//! durable vector-store handle. All state is tied to the service instance,
//! so independent instances can live side by side in one process.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::Embedding;
use crate::cache::{BoundedVectorCache, CacheStats};
use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, Result};
use crate::normalize::normalize;
use crate::provider::{EmbeddingProvider, EmbeddingRequest, create_provider};
use crate::store::VectorStore;

/// Await `future` under a deadline, mapping expiry to a typed error.
///
/// No retry happens here; retry policy belongs to the caller.
pub async fn with_timeout<T, F>(operation: &'static str, timeout: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(EmbeddingError::Timeout { operation, timeout }),
    }
}

/// Embedding generation and caching for one configured provider.
pub struct EmbeddingService {
    config: EmbeddingConfig,
    provider: Arc<dyn EmbeddingProvider>,
    cache: BoundedVectorCache,
    store: Option<Arc<dyn VectorStore>>,
    dimension: usize,
}

impl EmbeddingService {
    /// Create a service with the provider selected by the configuration.
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let provider = create_provider(&config)?;
        Ok(Self::with_provider(config, provider))
    }

    /// Create a service around an existing provider handle.
    pub fn with_provider(config: EmbeddingConfig, provider: Arc<dyn EmbeddingProvider>) -> Self {
        let cache = BoundedVectorCache::new(config.cache_capacity);
        let dimension = provider.dimension();
        Self {
            config,
            provider,
            cache,
            store: None,
            dimension,
        }
    }

    /// Attach a durable vector store.
    pub fn with_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// The provider this service was constructed with.
    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Embedding dimension for the configured (provider, model) pair.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn text_budget(&self) -> usize {
        self.config
            .max_text_chars
            .unwrap_or_else(|| self.provider.max_input_chars())
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Generate an embedding for one text.
    ///
    /// The text is normalized and truncated to the provider's budget first.
    /// Errors from the generation path always surface to the caller.
    pub async fn generate_embedding(&self, text: &str) -> Result<Embedding> {
        let request = EmbeddingRequest::new(normalize(text, self.text_budget()));
        let response = with_timeout(
            "embedding generation",
            self.config.request_timeout(),
            self.provider.embed(request),
        )
        .await?;

        self.check_dimension(&response.embedding)?;
        Ok(response.embedding)
    }

    /// Generate embeddings for multiple texts in one provider call.
    ///
    /// The output is one vector per input, in input order. A failure
    /// anywhere fails the whole batch.
    pub async fn generate_embeddings_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let budget = self.text_budget();
        let requests: Vec<EmbeddingRequest> = texts
            .iter()
            .map(|text| EmbeddingRequest::new(normalize(text, budget)))
            .collect();
        let count = requests.len();

        let responses = with_timeout(
            "batch embedding generation",
            self.config.request_timeout(),
            self.provider.embed_batch(requests),
        )
        .await?;

        if responses.len() != count {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {count} embeddings, got {}",
                responses.len()
            )));
        }

        let mut vectors = Vec::with_capacity(count);
        for response in responses {
            self.check_dimension(&response.embedding)?;
            vectors.push(response.embedding);
        }
        Ok(vectors)
    }

    /// Cache a vector under `key`, optionally persisting a durable copy.
    ///
    /// Persistence is best-effort: a store failure is logged and never
    /// surfaced, and the in-memory cache is updated regardless.
    pub async fn cache_put(&self, key: &str, vector: Embedding, persist: bool) -> Result<()> {
        self.check_dimension(&vector)?;

        if persist && let Some(store) = &self.store {
            let written = with_timeout(
                "store write",
                self.config.store_timeout(),
                store.add_embedding(
                    &self.config.store_table,
                    key,
                    &vector,
                    &self.config.store_column,
                    None,
                ),
            )
            .await;
            if let Err(err) = written {
                warn!(%key, error = %err, "best-effort store write failed");
            }
        }

        self.cache.put(key, vector);
        Ok(())
    }

    /// Fetch a cached vector, falling through to the durable store on miss.
    ///
    /// Store errors are treated as an absent entry; a store-filled vector
    /// with the wrong dimension is a hard error.
    pub async fn cache_get(&self, key: &str) -> Result<Option<Embedding>> {
        if let Some(vector) = self.cache.get(key) {
            return Ok(Some(vector));
        }

        let Some(store) = &self.store else {
            return Ok(None);
        };

        let fetched = with_timeout(
            "store read",
            self.config.store_timeout(),
            store.get_embedding(&self.config.store_table, key, &self.config.store_column),
        )
        .await;

        match fetched {
            Ok(Some(vector)) => {
                self.check_dimension(&vector)?;
                self.cache.put(key, vector.clone());
                Ok(Some(vector))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                warn!(%key, error = %err, "store read failed, treating entry as absent");
                Ok(None)
            }
        }
    }

    /// Explicitly drop a cached vector. Returns whether it was present.
    pub fn cache_invalidate(&self, key: &str) -> bool {
        self.cache.invalidate(key)
    }

    /// Read-only cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
