//! Write path: chunk, embed, and store a document's chunks.

use crate::{
    embedding::EmbeddingProvider,
    index::{Chunk, VectorIndex},
    metrics::PipelineMetrics,
    processing::{
        chunking::{ChunkingSettings, chunk_document},
        types::{IngestOutcome, ProcessingError},
    },
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Per-call budget used until [`IndexingService::with_call_timeout`] overrides it.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates the embedding stage over explicitly supplied collaborators.
///
/// Construct once near process start; the provider and index are shared with validation.
pub struct IndexingService {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    chunking: ChunkingSettings,
    metrics: Arc<PipelineMetrics>,
    call_timeout: Duration,
}

impl IndexingService {
    /// Build a service over the given provider, index, and chunking settings.
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        chunking: ChunkingSettings,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            embedder,
            index,
            chunking,
            metrics,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Bound each embedding batch and index write by `timeout`.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Shared handle to the vector index.
    pub fn index(&self) -> Arc<dyn VectorIndex> {
        Arc::clone(&self.index)
    }

    /// Chunk `text` and embed the result.
    pub async fn ingest_text(
        &self,
        document_id: &str,
        text: &str,
    ) -> Result<IngestOutcome, ProcessingError> {
        tracing::info!(document_id, chars = text.len(), "Processing document");
        let chunks = chunk_document(document_id, text, &self.chunking)?;
        self.embed_chunks(document_id, chunks).await
    }

    /// Embed externally produced chunks and store the ones that embedded successfully.
    pub async fn embed_chunks(
        &self,
        document_id: &str,
        chunks: Vec<Chunk>,
    ) -> Result<IngestOutcome, ProcessingError> {
        if chunks.is_empty() {
            return Err(ProcessingError::NoChunks {
                document_id: document_id.to_string(),
            });
        }

        let total_chunks = chunks.len();
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let embeddings = self
            .bounded("embedding", self.embedder.embed_batch(&texts))
            .await?;

        let (kept, vectors): (Vec<Chunk>, Vec<Vec<f32>>) = chunks
            .into_iter()
            .zip(embeddings)
            .filter_map(|(chunk, vector)| vector.map(|vector| (chunk, vector)))
            .unzip();

        if kept.is_empty() {
            tracing::error!(document_id, total_chunks, "No chunk could be embedded");
            return Err(ProcessingError::NoEmbeddings {
                document_id: document_id.to_string(),
            });
        }
        if kept.len() < total_chunks {
            tracing::warn!(
                document_id,
                failed = total_chunks - kept.len(),
                "Dropping chunks whose embedding failed"
            );
        }

        let summary = self
            .bounded("index insert", self.index.insert(document_id, kept, vectors))
            .await??;
        self.metrics.record_document(summary.inserted as u64);
        tracing::info!(
            document_id,
            chunks = total_chunks,
            embeddings = summary.inserted,
            backend = self.index.backend(),
            "Document indexed"
        );

        Ok(IngestOutcome {
            document_id: document_id.to_string(),
            total_chunks,
            total_embeddings: summary.inserted,
            embedding_dimension: self.index.dimension(),
            vector_store: self.index.backend().to_string(),
        })
    }

    async fn bounded<F, T>(&self, operation: &'static str, future: F) -> Result<T, ProcessingError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(self.call_timeout, future)
            .await
            .map_err(|_| {
                tracing::warn!(operation, timeout = ?self.call_timeout, "External call timed out");
                ProcessingError::Timeout {
                    operation,
                    timeout: self.call_timeout,
                }
            })
    }
}
