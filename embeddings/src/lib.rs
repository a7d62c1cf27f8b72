//! # Embeddings
//!
//! This crate turns text into dense vectors and keeps the hot ones close:
//! pluggable embedding providers, a bounded LRU vector cache, and the
//! vector-store boundary used by the retrieval pipeline.
//!
//! ## Features
//!
//! - **Embedding Generation**: Convert text to dense vectors via a local
//!   model or a cloud embeddings API
//! - **Bounded Caching**: Fixed-capacity LRU cache with O(1) touch/evict
//! - **Durable Store Boundary**: `VectorStore` trait with best-effort,
//!   failure-tolerant persistence
//! - **Normalization**: Deterministic text preprocessing with per-provider
//!   character budgets
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Embedding Service                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  TextNormalizer ──► EmbeddingProvider ──► BoundedVectorCache    │
//! │                          │                       │              │
//! │                          ▼                       ▼              │
//! │                  Local / OpenAI / Voyage    VectorStore         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The provider variant is chosen once at construction and never
//! re-dispatched per call; the service instance owns all of its state, so
//! independent instances can coexist in one process.

pub mod cache;
pub mod config;
pub mod error;
pub mod local;
pub mod normalize;
pub mod openai;
pub mod provider;
pub mod service;
pub mod similarity;
pub mod store;
pub mod voyage;

pub use cache::{BoundedVectorCache, CacheStats};
pub use config::EmbeddingConfig;
pub use error::{EmbeddingError, Result};
pub use local::LocalProvider;
pub use normalize::normalize;
pub use openai::OpenAiProvider;
pub use provider::{
    EmbeddingProvider, EmbeddingRequest, EmbeddingResponse, ProviderKind, create_provider,
};
pub use service::EmbeddingService;
pub use similarity::{SimilarityResult, cosine_similarity, find_top_k, l2_normalize};
pub use store::{DistanceMetric, MemoryVectorStore, StoreHit, VectorStore};
pub use voyage::VoyageProvider;

/// A dense vector embedding.
pub type Embedding = Vec<f32>;
