//! Records stored in and returned by vector indexes.

use crate::qdrant::QdrantError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by [`crate::index::VectorIndex`] implementations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// A vector's width disagrees with the index configuration.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Width the index was opened with.
        expected: usize,
        /// Width of the offending vector.
        actual: usize,
    },
    /// Insert was called with differently sized chunk and vector lists.
    #[error("Chunks and vectors must have the same length ({chunks} chunks, {vectors} vectors)")]
    LengthMismatch {
        /// Number of chunks supplied.
        chunks: usize,
        /// Number of vectors supplied.
        vectors: usize,
    },
    /// Index was configured with a zero dimension.
    #[error("Index dimension must be greater than zero")]
    InvalidDimension,
    /// Reading or writing the index files failed.
    #[error("Index I/O failed for {path}: {source}")]
    Io {
        /// File being read or written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Index files could not be encoded or decoded.
    #[error("Index serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Persisted state is inconsistent in a way that cannot be reconciled.
    #[error("Index state is corrupt: {0}")]
    Corrupt(String),
    /// Qdrant backend request failed.
    #[error("Qdrant request failed: {0}")]
    Qdrant(#[from] QdrantError),
}

/// Position of a chunk within its document.
///
/// Regular chunks carry an ordinal; chunks produced by re-splitting an oversized chunk carry a
/// composite string such as `"3_1"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChunkIndex {
    /// Plain ordinal index.
    Ordinal(u64),
    /// Composite sub-index from oversized-chunk splitting.
    Composite(String),
}

impl Default for ChunkIndex {
    fn default() -> Self {
        Self::Ordinal(0)
    }
}

impl From<u64> for ChunkIndex {
    fn from(value: u64) -> Self {
        Self::Ordinal(value)
    }
}

impl From<&str> for ChunkIndex {
    fn from(value: &str) -> Self {
        Self::Composite(value.to_string())
    }
}

impl fmt::Display for ChunkIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ordinal(value) => write!(f, "{value}"),
            Self::Composite(value) => f.write_str(value),
        }
    }
}

/// Bounded segment of a document's text, the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Identifier unique within the owning document.
    pub chunk_id: String,
    /// Owning document.
    #[serde(default)]
    pub document_id: String,
    /// Ordinal or composite position within the document.
    #[serde(default)]
    pub chunk_index: ChunkIndex,
    /// Chunk text.
    pub text: String,
    /// Length of `text` in characters.
    #[serde(default)]
    pub text_length: usize,
    /// Token count reported by the chunking stage.
    #[serde(default)]
    pub token_count: usize,
    /// Free-form metadata carried from the chunking stage.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Chunk {
    /// Build a chunk, deriving `text_length` from the text.
    pub fn new(
        document_id: impl Into<String>,
        chunk_id: impl Into<String>,
        chunk_index: impl Into<ChunkIndex>,
        text: impl Into<String>,
        token_count: usize,
    ) -> Self {
        let text = text.into();
        Self {
            chunk_id: chunk_id.into(),
            document_id: document_id.into(),
            chunk_index: chunk_index.into(),
            text_length: text.chars().count(),
            text,
            token_count,
            metadata: Map::new(),
        }
    }
}

/// Chunk plus vector as held by an index at a fixed position.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Dense insertion position, never reused.
    pub position: u64,
    /// Stored copy of the chunk.
    pub chunk: Chunk,
    /// Embedding of the chunk text.
    pub vector: Vec<f32>,
}

/// One nearest-neighbour hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    /// Identifier of the matching chunk.
    pub chunk_id: String,
    /// Position of the chunk within its document.
    pub chunk_index: ChunkIndex,
    /// Chunk text, possibly truncated for previews.
    pub text: String,
    /// Similarity in `(0, 1]`; higher is more similar.
    pub similarity: f32,
    /// Backend distance the similarity was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_distance: Option<f32>,
}

/// Outcome of a successful insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InsertSummary {
    /// Number of entries appended.
    pub inserted: usize,
    /// Position assigned to the first appended entry.
    pub first_position: u64,
}
