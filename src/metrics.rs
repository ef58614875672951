use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing indexing and validation activity.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_indexed: AtomicU64,
    chunks_indexed: AtomicU64,
    validation_runs: AtomicU64,
    invalid_granularities: AtomicU64,
    hallucinations_flagged: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an indexed document and the number of chunks stored for it.
    pub fn record_document(&self, chunk_count: u64) {
        self.documents_indexed.fetch_add(1, Ordering::Relaxed);
        self.chunks_indexed.fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record one validation run along with its invalid granularities and flagged issues.
    pub fn record_validation(&self, invalid_granularities: u64, hallucinations: u64) {
        self.validation_runs.fetch_add(1, Ordering::Relaxed);
        self.invalid_granularities
            .fetch_add(invalid_granularities, Ordering::Relaxed);
        self.hallucinations_flagged
            .fetch_add(hallucinations, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_indexed: self.documents_indexed.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            validation_runs: self.validation_runs.load(Ordering::Relaxed),
            invalid_granularities: self.invalid_granularities.load(Ordering::Relaxed),
            hallucinations_flagged: self.hallucinations_flagged.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Number of documents indexed since startup.
    pub documents_indexed: u64,
    /// Total chunk count stored across all indexed documents.
    pub chunks_indexed: u64,
    /// Number of `validate_all` runs completed.
    pub validation_runs: u64,
    /// Summary granularities that came back invalid, for any reason.
    pub invalid_granularities: u64,
    /// Hallucination issues raised across all runs.
    pub hallucinations_flagged: u64,
}
