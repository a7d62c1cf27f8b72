//! # Retrieval
//!
//! Two-stage retrieval for the engram memory system: a fast coarse vector
//! search produces a candidate shortlist, then a cross-encoder reranks it
//! for precision.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Retrieval Pipeline                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  query ──► EmbeddingService ──► VectorStore ──► candidates      │
//! │                                                     │           │
//! │                                                     ▼           │
//! │              ContentStore ──► Reranker ──► ranked results       │
//! │                                                                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both external collaborators are optional capabilities at runtime: an
//! unreachable vector store degrades coarse search to an empty shortlist,
//! and a missing cross-encoder degrades rerank to an empty list instead of
//! silently reusing coarse scores. The combined [`RetrievalPipeline::search`]
//! reports which stages actually ran.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use engram_retrieval::{RetrievalConfig, RetrievalPipeline};
//!
//! let pipeline = RetrievalPipeline::new(config, embeddings, store, content);
//! let outcome = pipeline.search("what did we decide last week?", 10).await?;
//! ```

pub mod config;
pub mod content;
pub mod error;
pub mod pipeline;
pub mod rerank;

pub use config::{RerankConfig, RetrievalConfig};
pub use content::{ContentStore, MemoryContentStore};
pub use error::{Result, RetrievalError};
pub use pipeline::{
    RerankResult, RetrievalCandidate, RetrievalPipeline, SearchOutcome, SearchPhase,
};
pub use rerank::{CrossEncoder, Reranker, SCORE_EPSILON, normalize_scores};

// Re-export from dependencies for convenience
pub use engram_embeddings::{EmbeddingService, MemoryVectorStore, VectorStore};
