//! Threshold policy over retrieved evidence, at whole-summary and sentence level.

use super::cancel::CancellationToken;
use super::evidence::EvidenceAggregator;
use super::types::{
    HallucinationIssue, IssueKind, SentenceIssue, Severity, SummaryType, ValidationResult,
};
use futures_util::{StreamExt, stream};
use regex::Regex;
use std::sync::LazyLock;

/// Neighbours retrieved for the whole summary.
pub const SUMMARY_EVIDENCE_K: usize = 10;
/// Neighbours retrieved per sentence.
pub const SENTENCE_EVIDENCE_K: usize = 3;
/// Sentences examined per summary.
pub const MAX_SENTENCES: usize = 10;
/// Sentences shorter than this many characters are not checked.
pub const MIN_SENTENCE_CHARS: usize = 20;
/// Flagged sentences listed in a `sentence_level` finding.
pub const MAX_REPORTED_SENTENCES: usize = 5;
/// Below this similarity a `low_similarity` finding is high severity.
pub const HIGH_SEVERITY_BELOW: f32 = 0.5;

const SENTENCE_PREVIEW_CHARS: usize = 100;
const CHUNK_PREVIEW_CHARS: usize = 200;

static SENTENCE_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+\s+").expect("sentence boundary pattern is valid"));

/// Decides whether summary text is supported by a document's chunks.
///
/// Stateless across calls; sentence checks run concurrently up to `sentence_concurrency`.
#[derive(Clone)]
pub struct HallucinationDetector {
    aggregator: EvidenceAggregator,
    sentence_concurrency: usize,
}

impl HallucinationDetector {
    /// Build a detector over `aggregator`, capping in-flight sentence checks.
    pub fn new(aggregator: EvidenceAggregator, sentence_concurrency: usize) -> Self {
        Self {
            aggregator,
            sentence_concurrency: sentence_concurrency.max(1),
        }
    }

    /// Assess `summary_text` against `document_id` at `threshold`.
    pub async fn assess(
        &self,
        document_id: &str,
        summary_text: &str,
        summary_type: SummaryType,
        threshold: f32,
    ) -> ValidationResult {
        self.assess_cancellable(
            document_id,
            summary_text,
            summary_type,
            threshold,
            &CancellationToken::new(),
        )
        .await
    }

    /// Like [`Self::assess`], abandoning outstanding work once `cancel` fires.
    pub async fn assess_cancellable(
        &self,
        document_id: &str,
        summary_text: &str,
        summary_type: SummaryType,
        threshold: f32,
        cancel: &CancellationToken,
    ) -> ValidationResult {
        if summary_text.trim().is_empty() {
            tracing::warn!(document_id, %summary_type, "Summary text is empty");
            return ValidationResult::failed(summary_type, threshold, "summary text is empty");
        }

        let gathered = cancel
            .run_until_cancelled(self.aggregator.gather_evidence(
                document_id,
                summary_text,
                SUMMARY_EVIDENCE_K,
            ))
            .await;
        let evidence = match gathered {
            None => return cancelled(document_id, summary_type, threshold),
            Some(Ok(evidence)) => evidence,
            Some(Err(error)) => {
                tracing::warn!(
                    document_id,
                    %summary_type,
                    error = %error,
                    "Summary could not be validated"
                );
                return ValidationResult::failed(summary_type, threshold, error.to_string());
            }
        };

        let overall_similarity = evidence.overall_similarity;
        let mut hallucinations = Vec::new();
        if let Some(issue) = low_similarity_issue(overall_similarity, threshold) {
            hallucinations.push(issue);
        }

        let Some(sentence_issues) = cancel
            .run_until_cancelled(self.check_sentences(document_id, summary_text, threshold))
            .await
        else {
            return cancelled(document_id, summary_type, threshold);
        };
        if let Some(issue) = sentence_level_issue(sentence_issues, threshold) {
            hallucinations.push(issue);
        }

        let valid = overall_similarity >= threshold && hallucinations.is_empty();
        let top_similar_chunks = evidence
            .results
            .iter()
            .take(3)
            .map(|result| {
                let mut preview = result.clone();
                preview.text = truncate_chars(&result.text, CHUNK_PREVIEW_CHARS);
                preview
            })
            .collect();

        tracing::info!(
            document_id,
            %summary_type,
            valid,
            overall_similarity,
            threshold,
            issues = hallucinations.len(),
            "Summary validated"
        );
        ValidationResult {
            valid,
            overall_similarity,
            threshold,
            hallucinations,
            similar_chunks_count: evidence.results.len(),
            top_similar_chunks,
            summary_type,
            error: None,
        }
    }

    async fn check_sentences(
        &self,
        document_id: &str,
        summary_text: &str,
        threshold: f32,
    ) -> Vec<SentenceIssue> {
        let sentences: Vec<String> = split_sentences(summary_text)
            .into_iter()
            .take(MAX_SENTENCES)
            .filter(|sentence| sentence.chars().count() >= MIN_SENTENCE_CHARS)
            .collect();

        let outcomes: Vec<Option<SentenceIssue>> = stream::iter(sentences)
            .map(|sentence| async move {
                match self
                    .aggregator
                    .gather_evidence(document_id, &sentence, SENTENCE_EVIDENCE_K)
                    .await
                {
                    Ok(evidence) => {
                        let similarity = evidence.max_similarity();
                        (similarity < threshold).then(|| SentenceIssue {
                            sentence: truncate_chars(&sentence, SENTENCE_PREVIEW_CHARS),
                            similarity,
                            threshold,
                        })
                    }
                    Err(error) => {
                        tracing::warn!(document_id, error = %error, "Skipping sentence check");
                        None
                    }
                }
            })
            .buffered(self.sentence_concurrency)
            .collect()
            .await;

        outcomes.into_iter().flatten().collect()
    }
}

/// Split text on `.`, `!` or `?` runs followed by whitespace, dropping trailing punctuation.
pub fn split_sentences(text: &str) -> Vec<String> {
    SENTENCE_BOUNDARY
        .split(text)
        .map(|sentence| sentence.trim().trim_end_matches(['.', '!', '?']).trim_end())
        .filter(|sentence| !sentence.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whole-summary finding when `overall_similarity` is below `threshold`.
pub fn low_similarity_issue(overall_similarity: f32, threshold: f32) -> Option<HallucinationIssue> {
    if overall_similarity >= threshold {
        return None;
    }
    let severity = if overall_similarity < HIGH_SEVERITY_BELOW {
        Severity::High
    } else {
        Severity::Medium
    };
    Some(HallucinationIssue {
        kind: IssueKind::LowSimilarity,
        severity,
        description: format!(
            "Summary has low similarity ({overall_similarity:.2}) to original document (threshold {threshold:.2})"
        ),
        threshold,
        actual_similarity: Some(overall_similarity),
        issues: None,
    })
}

fn sentence_level_issue(
    mut sentence_issues: Vec<SentenceIssue>,
    threshold: f32,
) -> Option<HallucinationIssue> {
    if sentence_issues.is_empty() {
        return None;
    }
    let flagged = sentence_issues.len();
    sentence_issues.truncate(MAX_REPORTED_SENTENCES);
    Some(HallucinationIssue {
        kind: IssueKind::SentenceLevel,
        severity: Severity::Medium,
        description: format!("Found {flagged} sentences with low similarity"),
        threshold,
        actual_similarity: None,
        issues: Some(sentence_issues),
    })
}

fn cancelled(document_id: &str, summary_type: SummaryType, threshold: f32) -> ValidationResult {
    tracing::warn!(document_id, %summary_type, "Validation cancelled");
    ValidationResult::failed(summary_type, threshold, "validation cancelled")
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
