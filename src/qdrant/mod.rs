//! Qdrant REST transport used by the managed vector index backend.

pub mod client;
pub mod payload;
pub mod types;

pub use client::QdrantService;
pub use payload::compute_chunk_hash;
pub(crate) use payload::{
    build_payload, chunk_from_payload, current_timestamp_rfc3339, document_filter,
};
pub use types::{QdrantError, QdrantSettings, ScoredPoint};
