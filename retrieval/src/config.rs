//! Configuration for the retrieval pipeline.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};

const DEFAULT_TOP_K: usize = 10;
const DEFAULT_STORE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_CONTENT_TIMEOUT_SECS: u64 = 5;

/// Configuration for the retrieval pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Default number of coarse candidates to fetch.
    pub top_k: usize,

    /// Vector-store table holding corpus embeddings.
    pub store_table: String,

    /// Vector-store column holding the embedding vectors.
    pub store_column: String,

    /// Deadline for vector-store round-trips, in seconds.
    pub store_timeout_secs: u64,

    /// Deadline for per-candidate content lookups, in seconds.
    pub content_timeout_secs: u64,

    /// Reranker configuration.
    pub rerank: RerankConfig,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            store_table: "episodes".to_string(),
            store_column: "embedding".to_string(),
            store_timeout_secs: DEFAULT_STORE_TIMEOUT_SECS,
            content_timeout_secs: DEFAULT_CONTENT_TIMEOUT_SECS,
            rerank: RerankConfig::default(),
        }
    }
}

impl RetrievalConfig {
    /// Build a configuration from environment variables.
    ///
    /// Recognized keys: `ENGRAM_RETRIEVAL_TOP_K`, `ENGRAM_STORE_TABLE`,
    /// `ENGRAM_STORE_COLUMN`, `ENGRAM_STORE_TIMEOUT_SECS`,
    /// `ENGRAM_CONTENT_TIMEOUT_SECS`, `ENGRAM_RERANK_MODEL_PATH`,
    /// `ENGRAM_RERANK_TOKENIZER_PATH`, `ENGRAM_RERANK_MAX_CANDIDATES`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = env_var("ENGRAM_RETRIEVAL_TOP_K") {
            config.top_k = parse_number("ENGRAM_RETRIEVAL_TOP_K", &value)?;
        }
        if let Some(value) = env_var("ENGRAM_STORE_TABLE") {
            config.store_table = value;
        }
        if let Some(value) = env_var("ENGRAM_STORE_COLUMN") {
            config.store_column = value;
        }
        if let Some(value) = env_var("ENGRAM_STORE_TIMEOUT_SECS") {
            config.store_timeout_secs = parse_number("ENGRAM_STORE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = env_var("ENGRAM_CONTENT_TIMEOUT_SECS") {
            config.content_timeout_secs = parse_number("ENGRAM_CONTENT_TIMEOUT_SECS", &value)?;
        }
        config.rerank.model_path = env_var("ENGRAM_RERANK_MODEL_PATH").map(PathBuf::from);
        config.rerank.tokenizer_path = env_var("ENGRAM_RERANK_TOKENIZER_PATH").map(PathBuf::from);
        if let Some(value) = env_var("ENGRAM_RERANK_MAX_CANDIDATES") {
            config.rerank.max_candidates = parse_number("ENGRAM_RERANK_MAX_CANDIDATES", &value)?;
        }

        Ok(config)
    }

    /// Set the default candidate count.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Set the vector-store table and column.
    pub fn with_store_location(
        mut self,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        self.store_table = table.into();
        self.store_column = column.into();
        self
    }

    /// Set the reranker configuration.
    pub fn with_rerank(mut self, rerank: RerankConfig) -> Self {
        self.rerank = rerank;
        self
    }

    /// Deadline applied to vector-store round-trips.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    /// Deadline applied to content lookups.
    pub fn content_timeout(&self) -> Duration {
        Duration::from_secs(self.content_timeout_secs)
    }
}

/// Configuration for the cross-encoder reranker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    /// Path to the cross-encoder ONNX model file.
    pub model_path: Option<PathBuf>,

    /// Path to the cross-encoder tokenizer file.
    pub tokenizer_path: Option<PathBuf>,

    /// Largest number of candidates scored per rerank call; extra
    /// candidates are dropped (logged, not silent).
    pub max_candidates: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            tokenizer_path: None,
            max_candidates: 32,
        }
    }
}

impl RerankConfig {
    /// Set the cross-encoder asset paths.
    pub fn with_assets(
        mut self,
        model_path: impl Into<PathBuf>,
        tokenizer_path: impl Into<PathBuf>,
    ) -> Self {
        self.model_path = Some(model_path.into());
        self.tokenizer_path = Some(tokenizer_path.into());
        self
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        RetrievalError::InvalidArgument(format!("{key} must be an integer, got {value:?}"))
    })
}
