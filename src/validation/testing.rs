//! Deterministic collaborators for validation tests.

use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::index::{Chunk, FlatIndex, VectorIndex};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// Embedder answering from a fixed text → vector table.
pub(crate) struct StubEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    fallback: Vec<f32>,
    failing: HashSet<String>,
    slow: HashSet<String>,
    delay: Duration,
}

impl StubEmbedder {
    pub(crate) fn new(fallback: Vec<f32>) -> Self {
        Self {
            vectors: HashMap::new(),
            fallback,
            failing: HashSet::new(),
            slow: HashSet::new(),
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    pub(crate) fn failing(mut self, text: &str) -> Self {
        self.failing.insert(text.to_string());
        self
    }

    pub(crate) fn slow(mut self, text: &str, delay: Duration) -> Self {
        self.slow.insert(text.to_string());
        self.delay = delay;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if self.slow.contains(text) {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.contains(text) {
            return Err(EmbeddingError::GenerationFailed("stub failure".into()));
        }
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone()))
    }

    fn dimension(&self) -> usize {
        self.fallback.len()
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// Embedder that records how many calls overlap; every call answers `[1, 0]` after `delay`.
pub(crate) struct CountingEmbedder {
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl CountingEmbedder {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Highest number of calls observed running at once.
    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for CountingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![1.0, 0.0])
    }

    fn dimension(&self) -> usize {
        2
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

/// Two-dimensional flat index holding `doc-1` chunks at `[1, 0]` and `[0.9, 0.1]`.
pub(crate) async fn seeded_index(dir: &TempDir) -> Arc<dyn VectorIndex> {
    let index = FlatIndex::open(dir.path().join("index"), 2)
        .await
        .expect("open flat index");
    index
        .insert(
            "doc-1",
            vec![
                Chunk::new("doc-1", "doc-1_chunk_0", 0_u64, "Fire damage is covered.", 5),
                Chunk::new("doc-1", "doc-1_chunk_1", 1_u64, "Smoke damage is covered.", 5),
            ],
            vec![vec![1.0, 0.0], vec![0.9, 0.1]],
        )
        .await
        .expect("seed index");
    Arc::new(index)
}
