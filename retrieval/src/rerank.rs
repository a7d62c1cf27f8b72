//! Cross-encoder reranking.
//!
//! A cross-encoder scores (query, candidate) pairs jointly, which is more
//! accurate than vector similarity but far more expensive, so it only ever
//! sees the coarse-search shortlist. The encoder is an optional capability:
//! when it cannot be constructed, reranking reports itself unavailable
//! instead of silently falling back to coarse scores.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::warn;

use crate::config::RerankConfig;
use crate::error::{Result, RetrievalError};

/// Floor added to the score spread during min-max scaling.
pub const SCORE_EPSILON: f32 = 1e-6;

/// Scores (query, candidate text) pairs.
///
/// Implementations return one raw score per pair, preserving pair order.
/// Scoring may block (model inference); the `Reranker` wrapper offloads it
/// accordingly.
pub trait CrossEncoder: Send + Sync {
    /// Score each pair; higher means more relevant.
    fn score(&self, pairs: &[(String, String)]) -> Result<Vec<f32>>;
}

/// Lazily-constructed cross-encoder handle.
///
/// Construction is attempted at most once per instance. A failure is
/// recorded and latched, so subsequent calls short-circuit to
/// "unavailable" instead of retrying construction every time.
pub struct Reranker {
    config: RerankConfig,
    encoder: OnceCell<Option<Arc<dyn CrossEncoder>>>,
}

impl Reranker {
    /// Create a reranker that loads its encoder from configuration on
    /// first use.
    pub fn new(config: RerankConfig) -> Self {
        Self {
            config,
            encoder: OnceCell::new(),
        }
    }

    /// Use a pre-built encoder instead of loading one from configuration.
    pub fn with_encoder(encoder: Arc<dyn CrossEncoder>) -> Self {
        let cell = OnceCell::new();
        // A fresh cell accepts exactly one value.
        let _ = cell.set(Some(encoder));
        Self {
            config: RerankConfig::default(),
            encoder: cell,
        }
    }

    async fn encoder(&self) -> Option<Arc<dyn CrossEncoder>> {
        self.encoder
            .get_or_init(|| async {
                match self.build_encoder().await {
                    Ok(encoder) => Some(encoder),
                    Err(err) => {
                        warn!(error = %err, "cross-encoder unavailable; rerank degrades to empty results");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    /// Whether an encoder is present (constructing it if not yet tried).
    pub async fn is_available(&self) -> bool {
        self.encoder().await.is_some()
    }

    /// Score pairs with the cross-encoder.
    ///
    /// Returns `None` when no encoder is available, so callers can tell
    /// "no rerank happened" apart from an empty batch.
    pub async fn score(&self, pairs: &[(String, String)]) -> Result<Option<Vec<f32>>> {
        if pairs.is_empty() {
            return Ok(Some(Vec::new()));
        }

        let Some(encoder) = self.encoder().await else {
            return Ok(None);
        };

        let owned = pairs.to_vec();
        let scores = tokio::task::spawn_blocking(move || encoder.score(&owned))
            .await
            .map_err(|e| RetrievalError::Rerank(format!("scoring task failed: {e}")))??;

        if scores.len() != pairs.len() {
            return Err(RetrievalError::Rerank(format!(
                "encoder produced {} scores for {} pairs",
                scores.len(),
                pairs.len()
            )));
        }

        Ok(Some(scores))
    }

    #[cfg(feature = "rerank")]
    async fn build_encoder(&self) -> Result<Arc<dyn CrossEncoder>> {
        let model_path = self.config.model_path.clone().ok_or_else(|| {
            RetrievalError::Rerank("cross-encoder model path not configured".to_string())
        })?;
        let tokenizer_path = self.config.tokenizer_path.clone().ok_or_else(|| {
            RetrievalError::Rerank("cross-encoder tokenizer path not configured".to_string())
        })?;

        let encoder = tokio::task::spawn_blocking(move || {
            onnx::OrtCrossEncoder::load(&model_path, &tokenizer_path)
        })
        .await
        .map_err(|e| RetrievalError::Rerank(format!("encoder load task failed: {e}")))??;

        Ok(Arc::new(encoder))
    }

    #[cfg(not(feature = "rerank"))]
    async fn build_encoder(&self) -> Result<Arc<dyn CrossEncoder>> {
        tracing::debug!(model = ?self.config.model_path, "rerank feature not compiled in");
        Err(RetrievalError::Rerank(
            "cross-encoder support is not compiled in (enable the `rerank` feature)".to_string(),
        ))
    }
}

/// Min-max scale raw scores into [0, 1].
///
/// The epsilon keeps the division defined when every raw score is equal;
/// such a batch normalizes to all zeros.
pub fn normalize_scores(raw: &[f32]) -> Vec<f32> {
    if raw.is_empty() {
        return Vec::new();
    }

    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &score in raw {
        min = min.min(score);
        max = max.max(score);
    }

    let spread = max - min + SCORE_EPSILON;
    raw.iter().map(|&score| (score - min) / spread).collect()
}

#[cfg(feature = "rerank")]
mod onnx {
    use std::path::Path;
    use std::sync::Mutex;

    use ort::session::Session;
    use ort::value::Tensor;
    use tokenizers::Tokenizer;

    use super::CrossEncoder;
    use crate::error::{Result, RetrievalError};

    /// Token window of the supported cross-encoder models.
    const MAX_SEQUENCE_LENGTH: usize = 512;

    fn rerank_err(message: impl Into<String>) -> RetrievalError {
        RetrievalError::Rerank(message.into())
    }

    /// ONNX cross-encoder: (query, text) pairs in, relevance logits out.
    pub(super) struct OrtCrossEncoder {
        session: Mutex<Session>,
        tokenizer: Tokenizer,
    }

    impl OrtCrossEncoder {
        pub(super) fn load(model_path: &Path, tokenizer_path: &Path) -> Result<Self> {
            if !model_path.exists() {
                return Err(rerank_err(format!(
                    "model file not found: {}",
                    model_path.display()
                )));
            }
            if !tokenizer_path.exists() {
                return Err(rerank_err(format!(
                    "tokenizer file not found: {}",
                    tokenizer_path.display()
                )));
            }

            let tokenizer = Tokenizer::from_file(tokenizer_path)
                .map_err(|e| rerank_err(format!("tokenizer load failed: {e}")))?;

            let session = Session::builder()
                .map_err(|e| rerank_err(e.to_string()))?
                .with_intra_threads(2)
                .map_err(|e| rerank_err(e.to_string()))?
                .commit_from_file(model_path)
                .map_err(|e| rerank_err(e.to_string()))?;

            Ok(Self {
                session: Mutex::new(session),
                tokenizer,
            })
        }
    }

    impl CrossEncoder for OrtCrossEncoder {
        fn score(&self, pairs: &[(String, String)]) -> Result<Vec<f32>> {
            if pairs.is_empty() {
                return Ok(Vec::new());
            }

            let encodings = self
                .tokenizer
                .encode_batch(pairs.to_vec(), true)
                .map_err(|e| rerank_err(format!("tokenization failed: {e}")))?;

            let batch = encodings.len();
            let seq_len = encodings
                .iter()
                .map(|e| e.get_ids().len().min(MAX_SEQUENCE_LENGTH))
                .max()
                .unwrap_or(1)
                .max(1);

            let mut input_ids = Vec::with_capacity(batch * seq_len);
            let mut attention_mask = Vec::with_capacity(batch * seq_len);
            let mut token_type_ids = Vec::with_capacity(batch * seq_len);
            for encoding in &encodings {
                let ids = encoding.get_ids();
                let types = encoding.get_type_ids();
                let len = ids.len().min(seq_len);
                input_ids.extend(ids[..len].iter().map(|&id| id as i64));
                token_type_ids.extend(types[..len].iter().map(|&id| id as i64));
                attention_mask.extend(std::iter::repeat_n(1i64, len));
                let pad = seq_len - len;
                input_ids.extend(std::iter::repeat_n(0i64, pad));
                token_type_ids.extend(std::iter::repeat_n(0i64, pad));
                attention_mask.extend(std::iter::repeat_n(0i64, pad));
            }

            let shape = vec![batch as i64, seq_len as i64];
            let ids_tensor = Tensor::from_array((shape.clone(), input_ids))
                .map_err(|e| rerank_err(format!("tensor creation failed: {e}")))?;
            let mask_tensor = Tensor::from_array((shape.clone(), attention_mask))
                .map_err(|e| rerank_err(format!("tensor creation failed: {e}")))?;

            let mut session = self
                .session
                .lock()
                .map_err(|e| rerank_err(format!("session lock poisoned: {e}")))?;

            let outputs = if session.inputs.len() == 3 {
                let type_tensor = Tensor::from_array((shape, token_type_ids))
                    .map_err(|e| rerank_err(format!("tensor creation failed: {e}")))?;
                session
                    .run(ort::inputs![ids_tensor, mask_tensor, type_tensor])
                    .map_err(|e| rerank_err(e.to_string()))?
            } else {
                session
                    .run(ort::inputs![ids_tensor, mask_tensor])
                    .map_err(|e| rerank_err(e.to_string()))?
            };

            let (_name, output) = outputs
                .iter()
                .next()
                .ok_or_else(|| rerank_err("model returned no outputs".to_string()))?;
            let (out_shape, data) = output
                .try_extract_tensor::<f32>()
                .map_err(|e| rerank_err(format!("tensor extraction failed: {e}")))?;

            // Relevance logits come out as [batch, 1] or [batch].
            let scores = match out_shape.len() {
                1 => data.to_vec(),
                2 if out_shape[1] == 1 => data.to_vec(),
                _ => {
                    return Err(rerank_err(format!(
                        "unexpected output shape: {out_shape:?}"
                    )));
                }
            };

            if scores.len() != batch {
                return Err(rerank_err(format!(
                    "model produced {} scores for {batch} pairs",
                    scores.len()
                )));
            }

            Ok(scores)
        }
    }
}
