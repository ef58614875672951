//! Document write path: chunking, embedding, and vector index writes.

pub mod chunking;
mod service;
pub mod types;

pub use chunking::{ChunkingSettings, chunk_document};
pub use service::{DEFAULT_CALL_TIMEOUT, IndexingService};
pub use types::{ChunkingError, IngestOutcome, ProcessingError};
