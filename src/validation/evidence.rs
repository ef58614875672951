//! Turns candidate text into retrieved evidence and a similarity score.

use super::types::{EvidenceError, EvidenceSet};
use crate::embedding::EmbeddingProvider;
use crate::index::{SimilarityResult, VectorIndex};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Embedding calls allowed in flight when no cap is configured.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// Embeds text and retrieves its nearest chunks within one document.
///
/// Every provider and index call runs under the configured timeout. Clones share one
/// embedding budget, so concurrent checks over several summaries never exceed the cap.
#[derive(Clone)]
pub struct EvidenceAggregator {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    timeout: Duration,
    embed_permits: Arc<Semaphore>,
}

impl EvidenceAggregator {
    /// Build an aggregator over explicit collaborators.
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            index,
            timeout,
            embed_permits: Arc::new(Semaphore::new(DEFAULT_MAX_IN_FLIGHT)),
        }
    }

    /// Cap concurrent embedding calls at `max_in_flight` (at least one).
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.embed_permits = Arc::new(Semaphore::new(max_in_flight.max(1)));
        self
    }

    /// Per-call time budget.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Retrieve up to `k` chunks of `document_id` closest to `text`.
    ///
    /// An empty neighbour list is reported as [`EvidenceError::NotFound`] rather than as a
    /// zero similarity.
    pub async fn gather_evidence(
        &self,
        document_id: &str,
        text: &str,
        k: usize,
    ) -> Result<EvidenceSet, EvidenceError> {
        let query_vector = {
            // Waiting for a permit does not count against the call timeout.
            let _permit = self.embed_permits.acquire().await.ok();
            self.bounded("embedding", self.embedder.embed(text)).await??
        };
        let results = self
            .bounded(
                "vector search",
                self.index.search(&query_vector, k, Some(document_id)),
            )
            .await??;

        if results.is_empty() {
            return Err(EvidenceError::NotFound {
                document_id: document_id.to_string(),
            });
        }

        let overall_similarity = mean_similarity(&results);
        tracing::debug!(
            document_id,
            k,
            hits = results.len(),
            overall_similarity,
            "Evidence gathered"
        );
        Ok(EvidenceSet {
            query_vector,
            results,
            overall_similarity,
        })
    }

    async fn bounded<F, T>(&self, operation: &'static str, future: F) -> Result<T, EvidenceError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(self.timeout, future)
            .await
            .map_err(|_| {
                tracing::warn!(operation, timeout = ?self.timeout, "External call timed out");
                EvidenceError::Timeout {
                    operation,
                    timeout: self.timeout,
                }
            })
    }
}

/// Arithmetic mean of result similarities; zero for an empty slice.
pub fn mean_similarity(results: &[SimilarityResult]) -> f32 {
    if results.is_empty() {
        return 0.0;
    }
    let total: f32 = results.iter().map(|result| result.similarity).sum();
    total / results.len() as f32
}
