//! Embedding provider abstraction and adapters.
//!
//! Validation and indexing only see [`EmbeddingProvider`]; the concrete adapter is picked
//! once from configuration by [`build_embedding_provider`].

mod hashing;
mod ollama;
mod openai;

use crate::config::{Config, EmbeddingBackend};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use hashing::HashingEmbedder;
pub use ollama::OllamaEmbedder;
pub use openai::OpenAiEmbedder;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Provider could not be reached or rejected the request.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider answered with data that cannot be used as a vector.
    #[error("Malformed embedding response: {0}")]
    Malformed(String),
    /// Adapter was constructed with unusable settings.
    #[error("Embedding provider misconfigured: {0}")]
    Configuration(String),
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Produce an embedding vector for a single piece of text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Produce embeddings for several texts, in input order.
    ///
    /// Failures are reported per item as `None` so one bad input does not sink the batch.
    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            match self.embed(text).await {
                Ok(vector) => vectors.push(Some(vector)),
                Err(error) => {
                    tracing::warn!(error = %error, "Embedding failed for batch item");
                    vectors.push(None);
                }
            }
        }
        vectors
    }

    /// Width of every vector produced by this provider.
    fn dimension(&self) -> usize;

    /// Short identifier used in logs and reports.
    fn name(&self) -> &'static str;
}

/// Build the embedding provider selected by configuration.
pub fn build_embedding_provider(
    config: &Config,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    tracing::debug!(
        provider = ?config.embedding_provider,
        model = %config.embedding_model,
        dimension = config.embedding_dimension,
        "Initializing embedding provider"
    );
    let provider: Arc<dyn EmbeddingProvider> = match config.embedding_provider {
        EmbeddingBackend::OpenAI => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                EmbeddingError::Configuration("OPENAI_API_KEY is not set".to_string())
            })?;
            Arc::new(OpenAiEmbedder::new(
                &config.openai_base_url,
                api_key,
                &config.embedding_model,
                config.embedding_dimension,
                config.external_call_timeout,
            )?)
        }
        EmbeddingBackend::Ollama => Arc::new(OllamaEmbedder::new(
            &config.ollama_url,
            &config.embedding_model,
            config.embedding_dimension,
            config.external_call_timeout,
        )?),
        EmbeddingBackend::Hashing => Arc::new(HashingEmbedder::new(config.embedding_dimension)?),
    };
    Ok(provider)
}

/// Reject vectors whose width disagrees with the provider's declared dimension.
pub(crate) fn ensure_dimension(vector: Vec<f32>, expected: usize) -> Result<Vec<f32>, EmbeddingError> {
    if vector.len() != expected {
        return Err(EmbeddingError::Malformed(format!(
            "expected {expected} dimensions, got {}",
            vector.len()
        )));
    }
    if vector.iter().any(|value| !value.is_finite()) {
        return Err(EmbeddingError::Malformed(
            "vector contains non-finite values".to_string(),
        ));
    }
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_dimension_rejects_wrong_width() {
        let error = ensure_dimension(vec![0.1, 0.2], 3).unwrap_err();
        assert!(matches!(error, EmbeddingError::Malformed(_)));
        assert!(ensure_dimension(vec![0.1, 0.2, 0.3], 3).is_ok());
    }

    #[test]
    fn ensure_dimension_rejects_nan() {
        assert!(ensure_dimension(vec![f32::NAN, 0.0], 2).is_err());
    }

    #[tokio::test]
    async fn default_batch_maps_failures_to_none() {
        struct EvenOnly;

        #[async_trait]
        impl EmbeddingProvider for EvenOnly {
            async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
                if text.len() % 2 == 0 {
                    Ok(vec![1.0])
                } else {
                    Err(EmbeddingError::GenerationFailed("odd".into()))
                }
            }

            fn dimension(&self) -> usize {
                1
            }

            fn name(&self) -> &'static str {
                "even-only"
            }
        }

        let vectors = EvenOnly
            .embed_batch(&["ab".to_string(), "abc".to_string()])
            .await;
        assert_eq!(vectors, vec![Some(vec![1.0]), None]);
    }
}
