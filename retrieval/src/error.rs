//! Error types for the retrieval pipeline.

use thiserror::Error;

use engram_embeddings::EmbeddingError;

/// Result type alias for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Errors that can occur in the retrieval pipeline.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Embedding error.
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Caller-supplied argument rejected before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Content store error.
    #[error("content store error: {0}")]
    Content(String),

    /// Reranker error.
    #[error("rerank error: {0}")]
    Rerank(String),
}
