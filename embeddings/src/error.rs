//! Error types for the embeddings system.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Errors that can occur in the embeddings system.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// The backing model or client could not be initialized.
    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// A remote provider call failed or returned a non-success status.
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Local model inference failed.
    #[error("inference failed: {0}")]
    Inference(String),

    /// The provider returned no vector for non-empty input.
    #[error("provider returned no embedding for non-empty input")]
    EmptyResult,

    /// Vector length inconsistent with the expected model dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// An external call exceeded its deadline.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The vector store is unreachable.
    #[error("vector store unavailable: {0}")]
    StoreUnavailable(String),

    /// Caller-supplied argument rejected before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid response from provider.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
