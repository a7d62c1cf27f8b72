//! Local in-process embedding provider.
//!
//! Runs sentence-embedding inference through ONNX Runtime when the `onnx`
//! feature is enabled. The model handle is initialized on first use behind a
//! construct-once guard and reused for the lifetime of the provider
//! instance; inference runs on the blocking thread pool so it cannot starve
//! concurrent tasks. Without the feature (or without model assets on disk)
//! every call reports `ProviderUnavailable`.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::Embedding;
use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse};

const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Character budget applied by callers before embedding.
const MAX_INPUT_CHARS: usize = 2048;

/// Token window of the supported sentence-embedding models.
#[cfg(feature = "onnx")]
const MAX_SEQUENCE_LENGTH: usize = 512;

/// Texts per padded inference run; larger batches are chunked.
const MAX_BATCH_SIZE: usize = 32;

fn dimension_for(model: &str) -> usize {
    match model {
        "all-MiniLM-L6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        _ => 384,
    }
}

/// Local embedding provider backed by an ONNX sentence-embedding model.
pub struct LocalProvider {
    model: String,
    dimension: usize,
    model_path: Option<PathBuf>,
    tokenizer_path: Option<PathBuf>,
    #[cfg(feature = "onnx")]
    handle: tokio::sync::OnceCell<std::sync::Arc<onnx::LocalModel>>,
}

impl LocalProvider {
    /// Create a provider from configuration. Model assets are not touched
    /// until the first embedding call.
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Self {
            dimension: dimension_for(&model),
            model,
            model_path: config.model_path.clone(),
            tokenizer_path: config.tokenizer_path.clone(),
            #[cfg(feature = "onnx")]
            handle: tokio::sync::OnceCell::new(),
        }
    }

    /// Set the model asset paths.
    pub fn with_assets(
        mut self,
        model_path: impl Into<PathBuf>,
        tokenizer_path: impl Into<PathBuf>,
    ) -> Self {
        self.model_path = Some(model_path.into());
        self.tokenizer_path = Some(tokenizer_path.into());
        self
    }

    fn assets_present(&self) -> bool {
        cfg!(feature = "onnx")
            && matches!(
                (&self.model_path, &self.tokenizer_path),
                (Some(model), Some(tokenizer)) if model.exists() && tokenizer.exists()
            )
    }

    #[cfg(feature = "onnx")]
    async fn model_handle(&self) -> Result<&std::sync::Arc<onnx::LocalModel>> {
        self.handle
            .get_or_try_init(|| async {
                let model_path = self.model_path.clone().ok_or_else(|| {
                    EmbeddingError::ProviderUnavailable(
                        "local model path not configured".to_string(),
                    )
                })?;
                let tokenizer_path = self.tokenizer_path.clone().ok_or_else(|| {
                    EmbeddingError::ProviderUnavailable(
                        "local tokenizer path not configured".to_string(),
                    )
                })?;

                let model = tokio::task::spawn_blocking(move || {
                    onnx::LocalModel::load(&model_path, &tokenizer_path, MAX_SEQUENCE_LENGTH)
                })
                .await
                .map_err(|e| {
                    EmbeddingError::ProviderUnavailable(format!("model load task failed: {e}"))
                })??;

                tracing::info!(model = %self.model, "local embedding model loaded");
                Ok(std::sync::Arc::new(model))
            })
            .await
    }

    #[cfg(feature = "onnx")]
    async fn infer(&self, texts: Vec<String>) -> Result<Vec<Embedding>> {
        let model = std::sync::Arc::clone(self.model_handle().await?);
        tokio::task::spawn_blocking(move || {
            let mut vectors = Vec::with_capacity(texts.len());
            for chunk in texts.chunks(MAX_BATCH_SIZE) {
                vectors.extend(model.embed_batch(chunk)?);
            }
            Ok(vectors)
        })
        .await
        .map_err(|e| EmbeddingError::Inference(format!("inference task failed: {e}")))?
    }

    #[cfg(not(feature = "onnx"))]
    async fn infer(&self, _texts: Vec<String>) -> Result<Vec<Embedding>> {
        Err(EmbeddingError::ProviderUnavailable(
            "local inference is not compiled in (enable the `onnx` feature)".to_string(),
        ))
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_input_chars(&self) -> usize {
        MAX_INPUT_CHARS
    }

    fn max_batch_size(&self) -> usize {
        MAX_BATCH_SIZE
    }

    fn is_available(&self) -> bool {
        self.assets_present()
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let vectors = self.infer(vec![request.text]).await?;
        let embedding = vectors.into_iter().next().ok_or(EmbeddingError::EmptyResult)?;
        let dimension = embedding.len();

        Ok(EmbeddingResponse {
            embedding,
            model: self.model.clone(),
            dimension,
            tokens_used: None,
        })
    }

    async fn embed_batch(&self, requests: Vec<EmbeddingRequest>) -> Result<Vec<EmbeddingResponse>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let count = requests.len();
        let texts: Vec<String> = requests.into_iter().map(|r| r.text).collect();
        debug!(count, "embedding batch with local model");

        let vectors = self.infer(texts).await?;
        if vectors.len() != count {
            return Err(EmbeddingError::InvalidResponse(format!(
                "model produced {} embeddings for {count} inputs",
                vectors.len()
            )));
        }

        Ok(vectors
            .into_iter()
            .map(|embedding| {
                let dimension = embedding.len();
                EmbeddingResponse {
                    embedding,
                    model: self.model.clone(),
                    dimension,
                    tokens_used: None,
                }
            })
            .collect())
    }
}

#[cfg(feature = "onnx")]
mod onnx {
    use std::path::Path;
    use std::sync::Mutex;

    use ort::session::Session;
    use ort::value::Tensor;
    use tokenizers::Tokenizer;

    use crate::Embedding;
    use crate::error::{EmbeddingError, Result};
    use crate::similarity::l2_normalize;

    fn unavailable(message: impl Into<String>) -> EmbeddingError {
        EmbeddingError::ProviderUnavailable(message.into())
    }

    fn inference(message: impl Into<String>) -> EmbeddingError {
        EmbeddingError::Inference(message.into())
    }

    /// A loaded model plus tokenizer. `Session::run` needs `&mut self`, so
    /// the session sits behind a mutex to satisfy shared use.
    pub(super) struct LocalModel {
        session: Mutex<Session>,
        tokenizer: Tokenizer,
        max_seq_len: usize,
    }

    impl LocalModel {
        pub(super) fn load(
            model_path: &Path,
            tokenizer_path: &Path,
            max_seq_len: usize,
        ) -> Result<Self> {
            if !model_path.exists() {
                return Err(unavailable(format!(
                    "model file not found: {}",
                    model_path.display()
                )));
            }
            if !tokenizer_path.exists() {
                return Err(unavailable(format!(
                    "tokenizer file not found: {}",
                    tokenizer_path.display()
                )));
            }

            let tokenizer = Tokenizer::from_file(tokenizer_path)
                .map_err(|e| unavailable(format!("tokenizer load failed: {e}")))?;

            let session = Session::builder()
                .map_err(|e| unavailable(e.to_string()))?
                .with_intra_threads(2)
                .map_err(|e| unavailable(e.to_string()))?
                .commit_from_file(model_path)
                .map_err(|e| unavailable(e.to_string()))?;

            Ok(Self {
                session: Mutex::new(session),
                tokenizer,
                max_seq_len,
            })
        }

        /// Embed one chunk of texts as a single padded batch run.
        pub(super) fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }

            let encodings = self
                .tokenizer
                .encode_batch(texts.to_vec(), true)
                .map_err(|e| inference(format!("tokenization failed: {e}")))?;

            let batch = encodings.len();
            let seq_len = encodings
                .iter()
                .map(|e| e.get_ids().len().min(self.max_seq_len))
                .max()
                .unwrap_or(1)
                .max(1);

            let mut input_ids = Vec::with_capacity(batch * seq_len);
            let mut attention_mask = Vec::with_capacity(batch * seq_len);
            for encoding in &encodings {
                let ids = encoding.get_ids();
                let len = ids.len().min(seq_len);
                input_ids.extend(ids[..len].iter().map(|&id| id as i64));
                attention_mask.extend(std::iter::repeat_n(1i64, len));
                let pad = seq_len - len;
                input_ids.extend(std::iter::repeat_n(0i64, pad));
                attention_mask.extend(std::iter::repeat_n(0i64, pad));
            }

            let shape = vec![batch as i64, seq_len as i64];
            let ids_tensor = Tensor::from_array((shape.clone(), input_ids))
                .map_err(|e| inference(format!("tensor creation failed: {e}")))?;
            let mask_tensor = Tensor::from_array((shape.clone(), attention_mask.clone()))
                .map_err(|e| inference(format!("tensor creation failed: {e}")))?;

            let mut session = self
                .session
                .lock()
                .map_err(|e| inference(format!("session lock poisoned: {e}")))?;

            // Standard sentence-embedding exports take either two inputs or
            // three (with token_type_ids), in this order.
            let outputs = if session.inputs.len() == 3 {
                let type_tensor = Tensor::from_array((shape, vec![0i64; batch * seq_len]))
                    .map_err(|e| inference(format!("tensor creation failed: {e}")))?;
                session
                    .run(ort::inputs![ids_tensor, mask_tensor, type_tensor])
                    .map_err(|e| inference(e.to_string()))?
            } else {
                session
                    .run(ort::inputs![ids_tensor, mask_tensor])
                    .map_err(|e| inference(e.to_string()))?
            };

            let (_name, output) = outputs
                .iter()
                .next()
                .ok_or_else(|| inference("model returned no outputs".to_string()))?;
            let (out_shape, data) = output
                .try_extract_tensor::<f32>()
                .map_err(|e| inference(format!("tensor extraction failed: {e}")))?;

            if out_shape.len() == 3 {
                // [batch, seq, hidden] — mean pool over unmasked positions.
                let seq = out_shape[1] as usize;
                let hidden = out_shape[2] as usize;
                let mut vectors = Vec::with_capacity(batch);
                for b in 0..batch {
                    let mut pooled = vec![0.0f32; hidden];
                    let mut count = 0.0f32;
                    for s in 0..seq {
                        if attention_mask[b * seq + s] == 0 {
                            continue;
                        }
                        count += 1.0;
                        let base = (b * seq + s) * hidden;
                        for d in 0..hidden {
                            pooled[d] += data[base + d];
                        }
                    }
                    if count > 0.0 {
                        for v in &mut pooled {
                            *v /= count;
                        }
                    }
                    l2_normalize(&mut pooled);
                    vectors.push(pooled);
                }
                Ok(vectors)
            } else if out_shape.len() == 2 {
                // [batch, hidden] — already pooled.
                let hidden = out_shape[1] as usize;
                let mut vectors = Vec::with_capacity(batch);
                for b in 0..batch {
                    let mut row = data[b * hidden..(b + 1) * hidden].to_vec();
                    l2_normalize(&mut row);
                    vectors.push(row);
                }
                Ok(vectors)
            } else {
                Err(inference(format!("unexpected output shape: {out_shape:?}")))
            }
        }
    }
}
