//! OpenAI-compatible embeddings adapter.

use super::{EmbeddingError, EmbeddingProvider, ensure_dimension};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Embedding client for `POST {base}/embeddings`.
pub struct OpenAiEmbedder {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimension: usize,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    /// Build a client for the given API base URL and model; each request is bounded by `timeout`.
    pub fn new(
        base_url: &str,
        api_key: String,
        model: &str,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        if dimension == 0 {
            return Err(EmbeddingError::Configuration(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        let http = Client::builder()
            .user_agent("policy-qa/embeddings")
            .timeout(timeout)
            .build()
            .map_err(|error| EmbeddingError::Configuration(error.to_string()))?;
        Ok(Self {
            http,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            api_key,
            model: model.to_string(),
            dimension,
        })
    }

    async fn request(&self, input: serde_json::Value) -> Result<Vec<EmbeddingItem>, EmbeddingError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": self.model, "input": input }))
            .send()
            .await
            .map_err(|error| EmbeddingError::GenerationFailed(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, model = %self.model, "OpenAI embeddings request failed");
            return Err(EmbeddingError::GenerationFailed(format!(
                "OpenAI responded with {status}: {body}"
            )));
        }

        let payload: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|error| EmbeddingError::Malformed(error.to_string()))?;
        Ok(payload.data)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut items = self.request(json!(text)).await?;
        let item = items
            .pop()
            .ok_or_else(|| EmbeddingError::Malformed("response contained no vectors".into()))?;
        ensure_dimension(item.embedding, self.dimension)
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        if texts.is_empty() {
            return Vec::new();
        }

        match self.request(json!(texts)).await {
            Ok(items) => {
                let mut vectors: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
                for item in items {
                    let Some(slot) = vectors.get_mut(item.index) else {
                        tracing::warn!(index = item.index, "Embedding index out of range");
                        continue;
                    };
                    match ensure_dimension(item.embedding, self.dimension) {
                        Ok(vector) => *slot = Some(vector),
                        Err(error) => {
                            tracing::warn!(index = item.index, error = %error, "Discarding malformed embedding");
                        }
                    }
                }
                vectors
            }
            Err(error) => {
                tracing::warn!(error = %error, count = texts.len(), "Batch embedding failed; retrying per item");
                let mut vectors = Vec::with_capacity(texts.len());
                for text in texts {
                    vectors.push(self.embed(text).await.ok());
                }
                vectors
            }
        }
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
