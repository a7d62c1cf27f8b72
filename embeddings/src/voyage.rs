//! Voyage AI embeddings API provider.
//!
//! Same wire shape as the OpenAI endpoint but a much smaller batch window,
//! so large corpus batches fan out across several requests.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse};

const DEFAULT_MODEL: &str = "voyage-3";
const DEFAULT_BASE_URL: &str = "https://api.voyageai.com/v1";

/// Largest number of inputs the endpoint accepts per request.
const MAX_BATCH_SIZE: usize = 128;

/// Character budget applied by callers before text is sent upstream.
const MAX_INPUT_CHARS: usize = 8_000;

/// Voyage AI embedding provider.
pub struct VoyageProvider {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
    model: String,
    max_batch: usize,
}

impl VoyageProvider {
    /// Create a provider from configuration, falling back to the
    /// `VOYAGE_API_KEY` environment variable for the credential.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            api_key: config
                .api_key
                .clone()
                .or_else(|| std::env::var("VOYAGE_API_KEY").ok()),
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

    /// Lower the upstream batch limit.
    pub fn with_max_batch_size(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            EmbeddingError::ProviderUnavailable("VOYAGE_API_KEY is not configured".to_string())
        })
    }

    async fn request_embeddings(
        &self,
        model: &str,
        texts: &[&str],
    ) -> Result<Vec<EmbeddingResponse>> {
        let api_key = self.api_key()?;
        let body = serde_json::json!({
            "input": texts,
            "model": model
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
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

        let WireResponse { mut data, model } = response.json().await?;

        if data.is_empty() && !texts.is_empty() {
            return Err(EmbeddingError::EmptyResult);
        }
        if data.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                data.len()
            )));
        }

        data.sort_by_key(|item| item.index);

        Ok(data
            .into_iter()
            .map(|item| {
                let dimension = item.embedding.len();
                EmbeddingResponse {
                    embedding: item.embedding,
                    model: model.clone(),
                    dimension,
                    tokens_used: None,
                }
            })
            .collect())
    }
}

#[async_trait]
impl EmbeddingProvider for VoyageProvider {
    fn name(&self) -> &str {
        "voyage"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        match self.model.as_str() {
            "voyage-3-lite" => 512,
            _ => 1024,
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
        let responses = self
            .request_embeddings(&model, &[request.text.as_str()])
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
        debug!(count = texts.len(), %model, "embedding batch via voyage");

        let mut results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.max_batch) {
            results.extend(self.request_embeddings(&model, chunk).await?);
        }

        Ok(results)
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    data: Vec<WireEmbedding>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct WireEmbedding {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> VoyageProvider {
        VoyageProvider::from_config(&EmbeddingConfig::default())
            .unwrap()
            .with_api_key("test-key")
            .with_base_url(server.uri())
    }

    #[test]
    fn lite_model_has_smaller_dimension() {
        let provider = VoyageProvider::from_config(
            &EmbeddingConfig::default().with_model("voyage-3-lite"),
        )
        .unwrap();
        assert_eq!(provider.dimension(), 512);
    }

    #[tokio::test]
    async fn batch_chunks_at_provider_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    { "index": 0, "embedding": [1.0] },
                    { "index": 1, "embedding": [2.0] },
                    { "index": 2, "embedding": [3.0] },
                ],
                "model": "voyage-3"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let requests: Vec<_> = (0..6)
            .map(|i| EmbeddingRequest::new(format!("text-{i}")))
            .collect();
        let responses = provider_for(&server)
            .with_max_batch_size(3)
            .embed_batch(requests)
            .await
            .unwrap();

        assert_eq!(responses.len(), 6);
        assert_eq!(responses[3].embedding, vec![1.0]);
    }

    #[tokio::test]
    async fn mismatched_row_count_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [ { "index": 0, "embedding": [1.0] } ],
                "model": "voyage-3"
            })))
            .mount(&server)
            .await;

        let requests = vec![EmbeddingRequest::new("a"), EmbeddingRequest::new("b")];
        let err = provider_for(&server).embed_batch(requests).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidResponse(_)));
    }
}
