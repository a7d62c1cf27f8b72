//! Embedding providers.
//!
//! One capability trait with three variants: a local in-process model and
//! two cloud embedding APIs. The variant is chosen once, by the factory, at
//! service construction time.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Embedding;
use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, Result};
use crate::local::LocalProvider;
use crate::openai::OpenAiProvider;
use crate::voyage::VoyageProvider;

/// Which embedding provider variant a service instance uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Local in-process model.
    #[default]
    Local,
    /// OpenAI embeddings API.
    OpenAi,
    /// Voyage AI embeddings API.
    Voyage,
}

impl FromStr for ProviderKind {
    type Err = EmbeddingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "openai" => Ok(Self::OpenAi),
            "voyage" => Ok(Self::Voyage),
            other => Err(EmbeddingError::InvalidArgument(format!(
                "unknown embedding provider {other:?}"
            ))),
        }
    }
}

/// Request for generating an embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// Text to embed.
    pub text: String,

    /// Model to use (provider-specific default otherwise).
    pub model: Option<String>,
}

impl EmbeddingRequest {
    /// Create a new embedding request.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: None,
        }
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Response from embedding generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// The generated embedding.
    pub embedding: Embedding,

    /// Model used to generate the embedding.
    pub model: String,

    /// Dimension of the embedding.
    pub dimension: usize,

    /// Token usage (if reported by the provider).
    pub tokens_used: Option<u64>,
}

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Get the name of this provider.
    fn name(&self) -> &str;

    /// Get the model this provider was configured with.
    fn model(&self) -> &str;

    /// Get the embedding dimension for the configured model.
    ///
    /// Constant for a given (provider, model) pair; callers validate
    /// produced vectors against it before caching.
    fn dimension(&self) -> usize;

    /// Character budget applied by callers before embedding.
    fn max_input_chars(&self) -> usize;

    /// Largest number of texts a single upstream call accepts. Larger
    /// batches are chunked internally by `embed_batch`.
    fn max_batch_size(&self) -> usize;

    /// Check if the provider is usable (credential set, runtime present).
    fn is_available(&self) -> bool;

    /// Generate an embedding for the given text.
    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse>;

    /// Generate embeddings for multiple texts.
    ///
    /// The returned sequence matches the request order one-to-one. A
    /// failure anywhere fails the whole batch; no partial success is
    /// surfaced.
    async fn embed_batch(&self, requests: Vec<EmbeddingRequest>) -> Result<Vec<EmbeddingResponse>> {
        // Default implementation: process sequentially
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.embed(request).await?);
        }
        Ok(results)
    }
}

/// Construct the provider variant selected by the configuration.
///
/// This is the only place the provider choice is dispatched; the returned
/// handle is immutable for the lifetime of the service instance.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider {
        ProviderKind::Local => Arc::new(LocalProvider::from_config(config)),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::from_config(config)?),
        ProviderKind::Voyage => Arc::new(VoyageProvider::from_config(config)?),
    };
    Ok(provider)
}
