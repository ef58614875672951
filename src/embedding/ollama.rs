//! Ollama embeddings adapter using the runtime's HTTP API directly.

use super::{EmbeddingError, EmbeddingProvider, ensure_dimension};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Embedding client for `POST {base}/api/embed`.
pub struct OllamaEmbedder {
    http: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    /// Build a client for the Ollama runtime at `base_url`; each request is bounded by `timeout`.
    pub fn new(
        base_url: &str,
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
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimension,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embed", self.base_url)
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let response = self
            .http
            .post(self.endpoint())
            .json(&json!({ "model": self.model, "input": input }))
            .send()
            .await
            .map_err(|error| {
                EmbeddingError::GenerationFailed(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(EmbeddingError::GenerationFailed(format!(
                "model '{}' is not available in Ollama",
                self.model
            )));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::GenerationFailed(format!(
                "Ollama responded with {status}: {body}"
            )));
        }

        let payload: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|error| EmbeddingError::Malformed(error.to_string()))?;
        if payload.embeddings.len() != input.len() {
            return Err(EmbeddingError::Malformed(format!(
                "expected {} vectors, got {}",
                input.len(),
                payload.embeddings.len()
            )));
        }
        Ok(payload.embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Malformed("response contained no vectors".into()))?;
        ensure_dimension(vector, self.dimension)
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        if texts.is_empty() {
            return Vec::new();
        }
        match self.request(texts).await {
            Ok(vectors) => vectors
                .into_iter()
                .map(|vector| ensure_dimension(vector, self.dimension).ok())
                .collect(),
            Err(error) => {
                tracing::warn!(error = %error, count = texts.len(), "Ollama batch embedding failed");
                vec![None; texts.len()]
            }
        }
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}
