//! Nearest-neighbour storage over document chunks.
//!
//! [`VectorIndex`] is the single seam between the pipeline and its storage backend. Two
//! implementations exist and are chosen once at construction time by [`open_vector_index`]:
//!
//! - [`FlatIndex`]: brute-force squared-L2 search over an in-memory table persisted as a
//!   vector file plus a JSON metadata sidecar. Document filtering happens after an over-fetch
//!   of `2k` candidates, so a document whose chunks are sparse among many others can get
//!   fewer than `k` results.
//! - [`QdrantIndex`]: a Qdrant collection with a keyword payload index on `document_id`;
//!   filtering is native, so results are the exact top-k within the document.
//!
//! Both backends map the squared L2 distance to a similarity with `1 / (1 + d²)`, which is
//! monotonically decreasing and lands in `(0, 1]`. Qdrant reports plain Euclidean distance,
//! so [`QdrantIndex`] squares it first; identical vectors score identically on either backend.

mod flat;
mod qdrant;
pub mod types;

use crate::config::{Config, VectorBackend};
use async_trait::async_trait;
use std::sync::Arc;

pub use flat::FlatIndex;
pub use qdrant::QdrantIndex;
pub use types::{Chunk, ChunkIndex, IndexEntry, IndexError, InsertSummary, SimilarityResult};

/// Candidate multiplier applied before post-search document filtering.
pub const OVERFETCH_FACTOR: usize = 2;

/// Append-only nearest-neighbour store over chunks of many documents.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Width every stored and queried vector must have.
    fn dimension(&self) -> usize;

    /// Short backend identifier used in logs and reports.
    fn backend(&self) -> &'static str;

    /// Append `(chunk, vector)` pairs for `document_id`, all or nothing.
    ///
    /// Each stored chunk copy has its `document_id` set to the argument.
    async fn insert(
        &self,
        document_id: &str,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<InsertSummary, IndexError>;

    /// Return up to `k` hits ordered by descending similarity, optionally restricted to one
    /// document. An unknown document yields an empty list.
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<SimilarityResult>, IndexError>;

    /// All chunks stored for `document_id`, ordered by chunk index.
    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>, IndexError>;
}

/// Open the index backend selected by configuration.
pub async fn open_vector_index(
    config: &Config,
    dimension: usize,
) -> Result<Arc<dyn VectorIndex>, IndexError> {
    let index: Arc<dyn VectorIndex> = match config.vector_db {
        VectorBackend::Flat => Arc::new(FlatIndex::open(&config.flat_index_path, dimension).await?),
        VectorBackend::Qdrant => {
            let settings = crate::qdrant::QdrantSettings {
                url: config
                    .qdrant_url
                    .clone()
                    .ok_or_else(|| IndexError::Corrupt("QDRANT_URL is not configured".into()))?,
                collection: config.qdrant_collection_name.clone(),
                api_key: config.qdrant_api_key.clone(),
                timeout: config.external_call_timeout,
            };
            Arc::new(QdrantIndex::connect(settings, dimension).await?)
        }
    };
    tracing::info!(backend = index.backend(), dimension, "Vector index ready");
    Ok(index)
}

/// Map a non-negative distance onto a `(0, 1]` similarity.
pub fn similarity_from_distance(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}

/// Check insert preconditions shared by every backend.
pub(crate) fn validate_batch(
    dimension: usize,
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
) -> Result<(), IndexError> {
    if chunks.len() != vectors.len() {
        return Err(IndexError::LengthMismatch {
            chunks: chunks.len(),
            vectors: vectors.len(),
        });
    }
    ensure_dimensions(dimension, vectors)
}

pub(crate) fn ensure_dimensions(dimension: usize, vectors: &[Vec<f32>]) -> Result<(), IndexError> {
    if let Some(bad) = vectors.iter().find(|vector| vector.len() != dimension) {
        return Err(IndexError::DimensionMismatch {
            expected: dimension,
            actual: bad.len(),
        });
    }
    Ok(())
}

/// Pair chunks with their vectors at positions `first..`, stamping the owning document.
pub(crate) fn stamp_entries(
    document_id: &str,
    first: u64,
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
) -> Vec<IndexEntry> {
    chunks
        .into_iter()
        .zip(vectors)
        .enumerate()
        .map(|(offset, (mut chunk, vector))| {
            chunk.document_id = document_id.to_string();
            if chunk.text_length == 0 {
                chunk.text_length = chunk.text.chars().count();
            }
            IndexEntry {
                position: first + offset as u64,
                chunk,
                vector,
            }
        })
        .collect()
}

/// Sort chunks by index: as text when any composite index is present, else numerically.
pub(crate) fn sort_chunks(chunks: &mut [Chunk]) {
    let has_composite = chunks
        .iter()
        .any(|chunk| matches!(chunk.chunk_index, ChunkIndex::Composite(_)));
    if has_composite {
        chunks.sort_by_cached_key(|chunk| chunk.chunk_index.to_string());
    } else {
        chunks.sort_by_key(|chunk| match chunk.chunk_index {
            ChunkIndex::Ordinal(value) => value,
            ChunkIndex::Composite(_) => 0,
        });
    }
}
