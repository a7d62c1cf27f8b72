//! Configuration for embedding generation.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EmbeddingError, Result};
use crate::provider::ProviderKind;

/// Default number of entries held by the in-memory vector cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STORE_TIMEOUT_SECS: u64 = 5;

/// Configuration for the embedding service.
///
/// The provider variant is fixed at construction time; there is no runtime
/// provider hot-swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Which provider to use.
    pub provider: ProviderKind,

    /// Model override (provider-specific default otherwise).
    pub model: Option<String>,

    /// API credential for the cloud providers. Falls back to the
    /// provider's environment variable when unset.
    pub api_key: Option<String>,

    /// Maximum number of cached vectors.
    pub cache_capacity: usize,

    /// Override for the per-provider text truncation budget, in characters.
    pub max_text_chars: Option<usize>,

    /// Path to the local ONNX model file.
    pub model_path: Option<PathBuf>,

    /// Path to the local tokenizer file.
    pub tokenizer_path: Option<PathBuf>,

    /// Deadline for provider calls, in seconds.
    pub request_timeout_secs: u64,

    /// Deadline for vector-store round-trips, in seconds.
    pub store_timeout_secs: u64,

    /// Vector-store table holding corpus embeddings.
    pub store_table: String,

    /// Vector-store column holding the embedding vectors.
    pub store_column: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Local,
            model: None,
            api_key: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            max_text_chars: None,
            model_path: None,
            tokenizer_path: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            store_timeout_secs: DEFAULT_STORE_TIMEOUT_SECS,
            store_table: "episodes".to_string(),
            store_column: "embedding".to_string(),
        }
    }
}

impl EmbeddingConfig {
    /// Build a configuration from environment variables.
    ///
    /// Recognized keys: `ENGRAM_EMBEDDING_PROVIDER`, `ENGRAM_EMBEDDING_MODEL`,
    /// `ENGRAM_CACHE_CAPACITY`, `ENGRAM_MAX_TEXT_CHARS`,
    /// `ENGRAM_LOCAL_MODEL_PATH`, `ENGRAM_LOCAL_TOKENIZER_PATH`,
    /// `ENGRAM_REQUEST_TIMEOUT_SECS`, `ENGRAM_STORE_TIMEOUT_SECS`,
    /// `ENGRAM_STORE_TABLE`, `ENGRAM_STORE_COLUMN`. Credentials are read by
    /// the providers themselves (`OPENAI_API_KEY`, `VOYAGE_API_KEY`).
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = env_var("ENGRAM_EMBEDDING_PROVIDER") {
            config.provider = value.parse()?;
        }
        config.model = env_var("ENGRAM_EMBEDDING_MODEL");
        if let Some(value) = env_var("ENGRAM_CACHE_CAPACITY") {
            config.cache_capacity = parse_usize("ENGRAM_CACHE_CAPACITY", &value)?;
        }
        if let Some(value) = env_var("ENGRAM_MAX_TEXT_CHARS") {
            config.max_text_chars = Some(parse_usize("ENGRAM_MAX_TEXT_CHARS", &value)?);
        }
        config.model_path = env_var("ENGRAM_LOCAL_MODEL_PATH").map(PathBuf::from);
        config.tokenizer_path = env_var("ENGRAM_LOCAL_TOKENIZER_PATH").map(PathBuf::from);
        if let Some(value) = env_var("ENGRAM_REQUEST_TIMEOUT_SECS") {
            config.request_timeout_secs = parse_u64("ENGRAM_REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = env_var("ENGRAM_STORE_TIMEOUT_SECS") {
            config.store_timeout_secs = parse_u64("ENGRAM_STORE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = env_var("ENGRAM_STORE_TABLE") {
            config.store_table = value;
        }
        if let Some(value) = env_var("ENGRAM_STORE_COLUMN") {
            config.store_column = value;
        }

        Ok(config)
    }

    /// Set the provider.
    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = provider;
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the API credential.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the cache capacity.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Set the local model asset paths.
    pub fn with_local_model(
        mut self,
        model_path: impl Into<PathBuf>,
        tokenizer_path: impl Into<PathBuf>,
    ) -> Self {
        self.model_path = Some(model_path.into());
        self.tokenizer_path = Some(tokenizer_path.into());
        self
    }

    /// Deadline applied to provider calls.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Deadline applied to vector-store round-trips.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn parse_usize(key: &str, value: &str) -> Result<usize> {
    value
        .parse()
        .map_err(|_| EmbeddingError::InvalidArgument(format!("{key} must be an integer, got {value:?}")))
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| EmbeddingError::InvalidArgument(format!("{key} must be an integer, got {value:?}")))
}
