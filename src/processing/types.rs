//! Error definitions and outcomes for the chunking and embedding stages.

use crate::embedding::EmbeddingError;
use crate::index::IndexError;
use anyhow::Error as TokenizerError;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Errors produced while turning raw text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Ingestion configured an impossible token budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Tokenizer resources were unavailable for the configured model.
    #[error("failed to initialize tokenizer for model '{model}': {source}")]
    Tokenizer {
        /// Embedding model we attempted to load.
        model: String,
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: TokenizerError,
    },
}

/// Errors emitted by the chunk → embed → index write path.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Chunking step failed to segment the document.
    #[error("Failed to chunk document: {0}")]
    Chunking(#[from] ChunkingError),
    /// Embedding provider failed outright.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingError),
    /// Vector index rejected the write or read.
    #[error("Vector index error: {0}")]
    Index(#[from] IndexError),
    /// Nothing was left to embed for the document.
    #[error("No chunks to embed for document {document_id}")]
    NoChunks {
        /// Document being processed.
        document_id: String,
    },
    /// Every chunk failed to embed.
    #[error("Failed to generate any embeddings for document {document_id}")]
    NoEmbeddings {
        /// Document being processed.
        document_id: String,
    },
    /// An embedding or index call exceeded its budget.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Call that was abandoned.
        operation: &'static str,
        /// Budget that elapsed.
        timeout: Duration,
    },
}

/// Summary of a completed embedding run produced by [`crate::processing::IndexingService`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    /// Document the chunks belong to.
    pub document_id: String,
    /// Chunks handed to the embedding stage.
    pub total_chunks: usize,
    /// Chunks that were embedded and stored.
    pub total_embeddings: usize,
    /// Width of the stored vectors.
    pub embedding_dimension: usize,
    /// Backend the vectors were written to.
    pub vector_store: String,
}
