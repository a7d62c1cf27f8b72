//! The durable vector-store boundary.
//!
//! The store is an external collaborator: this crate only defines the trait
//! it is consumed through, plus an in-memory reference implementation used
//! in tests and small deployments. Callers on the best-effort persistence
//! paths suppress `StoreUnavailable` rather than surfacing it.

use std::collections::HashMap;

use async_trait::async_trait;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::similarity::{cosine_similarity, dot_product, euclidean_distance};

/// A similarity-search row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreHit {
    /// ID of the matched item.
    pub id: String,

    /// Store-reported similarity score.
    pub score: f32,
}

/// Distance metric used for similarity search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Cosine similarity (default).
    #[default]
    Cosine,
    /// Dot product.
    Dot,
    /// Euclidean distance (negated so higher is always better).
    Euclidean,
}

/// Durable vector storage with similarity search.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Return up to `top_k` nearest rows to `vector`, best first.
    ///
    /// `filter` is an optional JSON object of metadata key/value pairs a
    /// row must carry to match.
    async fn similarity_search(
        &self,
        table: &str,
        vector: &[f32],
        column: &str,
        top_k: usize,
        filter: Option<&serde_json::Value>,
    ) -> Result<Vec<StoreHit>>;

    /// Insert or replace the vector stored for `id`.
    async fn add_embedding(
        &self,
        table: &str,
        id: &str,
        vector: &[f32],
        column: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<()>;

    /// Fetch the vector stored for `id`, if any.
    async fn get_embedding(&self, table: &str, id: &str, column: &str)
    -> Result<Option<Embedding>>;
}

#[derive(Debug, Clone)]
struct StoredEntry {
    vector: Embedding,
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Default)]
struct ColumnData {
    /// Pinned on first insert; all later vectors must match.
    dimension: Option<usize>,
    entries: HashMap<String, StoredEntry>,
}

/// In-memory vector store.
///
/// Keeps one entry map per `(table, column)` pair and pins the vector
/// dimension on first insert, mirroring what a real vector column enforces.
pub struct MemoryVectorStore {
    metric: DistanceMetric,
    tables: RwLock<HashMap<(String, String), ColumnData>>,
}

impl MemoryVectorStore {
    /// Create an empty store using cosine similarity.
    pub fn new() -> Self {
        Self {
            metric: DistanceMetric::Cosine,
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Use a different distance metric.
    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    /// Number of entries stored under `(table, column)`.
    pub async fn count(&self, table: &str, column: &str) -> usize {
        self.tables
            .read()
            .await
            .get(&(table.to_string(), column.to_string()))
            .map_or(0, |data| data.entries.len())
    }

    fn score(&self, query: &[f32], candidate: &[f32]) -> Result<f32> {
        match self.metric {
            DistanceMetric::Cosine => cosine_similarity(query, candidate),
            DistanceMetric::Dot => dot_product(query, candidate),
            DistanceMetric::Euclidean => euclidean_distance(query, candidate).map(|d| -d),
        }
    }
}

impl Default for MemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_filter(metadata: Option<&serde_json::Value>, filter: &serde_json::Value) -> bool {
    match (metadata, filter) {
        (Some(serde_json::Value::Object(have)), serde_json::Value::Object(want)) => {
            want.iter().all(|(key, value)| have.get(key) == Some(value))
        }
        _ => false,
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn similarity_search(
        &self,
        table: &str,
        vector: &[f32],
        column: &str,
        top_k: usize,
        filter: Option<&serde_json::Value>,
    ) -> Result<Vec<StoreHit>> {
        let tables = self.tables.read().await;
        let Some(data) = tables.get(&(table.to_string(), column.to_string())) else {
            return Ok(Vec::new());
        };

        if let Some(dimension) = data.dimension
            && vector.len() != dimension
        {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            });
        }

        let mut scored: Vec<(OrderedFloat<f32>, String)> = Vec::with_capacity(data.entries.len());
        for (id, entry) in &data.entries {
            if let Some(filter) = filter
                && !matches_filter(entry.metadata.as_ref(), filter)
            {
                continue;
            }
            let score = self.score(vector, &entry.vector)?;
            scored.push((OrderedFloat(score), id.clone()));
        }

        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, id)| StoreHit { id, score: score.0 })
            .collect())
    }

    async fn add_embedding(
        &self,
        table: &str,
        id: &str,
        vector: &[f32],
        column: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let data = tables
            .entry((table.to_string(), column.to_string()))
            .or_default();

        match data.dimension {
            Some(dimension) if dimension != vector.len() => {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            None => data.dimension = Some(vector.len()),
            _ => {}
        }

        data.entries.insert(
            id.to_string(),
            StoredEntry {
                vector: vector.to_vec(),
                metadata,
            },
        );
        debug!(%table, %column, %id, "stored embedding");
        Ok(())
    }

    async fn get_embedding(
        &self,
        table: &str,
        id: &str,
        column: &str,
    ) -> Result<Option<Embedding>> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(&(table.to_string(), column.to_string()))
            .and_then(|data| data.entries.get(id))
            .map(|entry| entry.vector.clone()))
    }
}
