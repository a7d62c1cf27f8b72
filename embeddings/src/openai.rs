//! OpenAI embeddings API provider.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse};

const DEFAULT_MODEL: &str = "text-embedding-3-small";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Largest number of inputs the embeddings endpoint accepts per request.
const MAX_BATCH_SIZE: usize = 2048;

/// Character budget applied by callers before text is sent upstream.
const MAX_INPUT_CHARS: usize = 16_000;

/// OpenAI embedding provider.
pub struct OpenAiProvider {
    /// API key.
    api_key: Option<String>,

    /// API base URL.
    base_url: String,

    /// HTTP client.
    client: reqwest::Client,

    /// Configured model.
    model: String,

    /// Upstream batch limit; larger batches are chunked.
    max_batch: usize,
}

impl OpenAiProvider {
    /// Create a provider from configuration, falling back to the
    /// `OPENAI_API_KEY` environment variable for the credential.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            api_key: config
                .api_key
                .clone()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok()),
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_batch: MAX_BATCH_SIZE,
        })
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Lower the upstream batch limit (e.g. for proxies with tighter caps).
    pub fn with_max_batch_size(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            EmbeddingError::ProviderUnavailable("OPENAI_API_KEY is not configured".to_string())
        })
    }

    /// Issue one embeddings request and return rows in input order.
    async fn request_embeddings(
        &self,
        model: &str,
        input: serde_json::Value,
        expected: usize,
    ) -> Result<Vec<EmbeddingResponse>> {
        let api_key = self.api_key()?;
        let body = serde_json::json!({
            "input": input,
            "model": model
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);

            return Err(EmbeddingError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ApiRequest(format!("{status}: {error_text}")));
        }

        let WireResponse { mut data, model, usage } = response.json().await?;

        if data.is_empty() && expected > 0 {
            return Err(EmbeddingError::EmptyResult);
        }
        if data.len() != expected {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {expected} embeddings, got {}",
                data.len()
            )));
        }

        // Rows carry an explicit index and are not guaranteed to arrive in
        // input order.
        data.sort_by_key(|item| item.index);

        let tokens_used = if expected == 1 {
            usage.map(|u| u.total_tokens)
        } else {
            None
        };

        Ok(data
            .into_iter()
            .map(|item| {
                let dimension = item.embedding.len();
                EmbeddingResponse {
                    embedding: item.embedding,
                    model: model.clone(),
                    dimension,
                    tokens_used,
                }
            })
            .collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        match self.model.as_str() {
            "text-embedding-3-small" => 1536,
            "text-embedding-3-large" => 3072,
            "text-embedding-ada-002" => 1536,
            _ => 1536,
        }
    }

    fn max_input_chars(&self) -> usize {
        MAX_INPUT_CHARS
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let model = request.model.unwrap_or_else(|| self.model.clone());

        debug!("Generating embedding with model: {model}");

        let responses = self
            .request_embeddings(&model, serde_json::json!(request.text), 1)
            .await?;

        responses.into_iter().next().ok_or(EmbeddingError::EmptyResult)
    }

    async fn embed_batch(&self, requests: Vec<EmbeddingRequest>) -> Result<Vec<EmbeddingResponse>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let model = requests[0]
            .model
            .clone()
            .unwrap_or_else(|| self.model.clone());

        let texts: Vec<&str> = requests.iter().map(|r| r.text.as_str()).collect();

        debug!(
            "Generating batch embeddings for {} texts with model: {model}",
            texts.len()
        );

        let mut results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.max_batch) {
            let responses = self
                .request_embeddings(&model, serde_json::json!(chunk), chunk.len())
                .await?;
            results.extend(responses);
        }

        info!("Generated {} batch embeddings", results.len());

        Ok(results)
    }
}

/// OpenAI API response format.
#[derive(Debug, Deserialize)]
struct WireResponse {
    data: Vec<WireEmbedding>,
    model: String,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireEmbedding {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    total_tokens: u64,
}
