#![deny(missing_docs)]

//! Retrieval-grounded QA for generated policy-document summaries.
//!
//! Documents are chunked, embedded, and stored in a [`index::VectorIndex`]; summaries are
//! then checked against their document's chunks by [`validation::ValidationOrchestrator`].

/// Environment-driven configuration management.
pub mod config;
/// Embedding provider abstraction and adapters.
pub mod embedding;
/// Vector index abstraction with flat and Qdrant backends.
pub mod index;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline counters.
pub mod metrics;
/// Chunking and embedding write path.
pub mod processing;
/// Qdrant REST transport.
pub mod qdrant;
/// Summary validation and hallucination detection.
pub mod validation;
