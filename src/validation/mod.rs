//! Retrieval-grounded validation of generated summaries.
//!
//! A summary is checked twice against its document's chunks: once as a whole, where the
//! mean similarity of the ten nearest chunks must reach the threshold, and once per
//! sentence, where the best of three neighbours must. Failures to embed or search are
//! reported through [`ValidationResult::error`] and never as hallucinations.

mod cancel;
mod detector;
mod evidence;
mod orchestrator;
#[cfg(test)]
mod testing;
pub mod types;

pub use cancel::CancellationToken;
pub use detector::{
    HIGH_SEVERITY_BELOW, HallucinationDetector, MAX_REPORTED_SENTENCES, MAX_SENTENCES,
    MIN_SENTENCE_CHARS, SENTENCE_EVIDENCE_K, SUMMARY_EVIDENCE_K, low_similarity_issue,
    split_sentences,
};
pub use evidence::{DEFAULT_MAX_IN_FLIGHT, EvidenceAggregator, mean_similarity};
pub use orchestrator::{MAX_SECTIONS, ValidationOrchestrator};
pub use types::{
    EvidenceError, EvidenceSet, HallucinationIssue, IssueKind, SectionSummary, SentenceIssue,
    Severity, Summaries, SummaryType, ValidationReport, ValidationResult,
};

use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::index::VectorIndex;
use std::sync::Arc;
use std::time::Duration;

/// Knobs shared by the evidence, detector, and orchestrator layers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationSettings {
    /// Similarity a summary or sentence must reach.
    pub threshold: f32,
    /// Budget for each embedding or search call.
    pub call_timeout: Duration,
    /// In-flight sentence checks per granularity, and embedding calls across all of them.
    pub sentence_concurrency: usize,
}

impl ValidationSettings {
    /// Derive settings from process configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            threshold: config.similarity_threshold,
            call_timeout: config.external_call_timeout,
            sentence_concurrency: config.sentence_check_concurrency,
        }
    }
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            call_timeout: Duration::from_secs(30),
            sentence_concurrency: 4,
        }
    }
}

/// Wire an orchestrator from its collaborators.
pub fn build_orchestrator(
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    settings: ValidationSettings,
) -> ValidationOrchestrator {
    let aggregator = EvidenceAggregator::new(embedder, index, settings.call_timeout)
        .with_max_in_flight(settings.sentence_concurrency);
    let detector = HallucinationDetector::new(aggregator, settings.sentence_concurrency);
    ValidationOrchestrator::new(detector, settings.threshold)
}
