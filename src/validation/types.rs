//! Value types produced by evidence gathering and summary validation.

use crate::embedding::EmbeddingError;
use crate::index::{IndexError, SimilarityResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Reasons evidence could not be gathered for a piece of text.
///
/// None of these mean the text is unsupported; they mean validation could not run.
#[derive(Debug, Error)]
pub enum EvidenceError {
    /// Embedding provider failed or returned unusable data.
    #[error("Failed to generate summary embedding: {0}")]
    Embedding(#[from] EmbeddingError),
    /// Vector index rejected the search.
    #[error("Vector search failed: {0}")]
    Index(#[from] IndexError),
    /// The document has no stored chunks to compare against.
    #[error("No matching chunks found in document {document_id}")]
    NotFound {
        /// Document that was searched.
        document_id: String,
    },
    /// An external call exceeded its time budget.
    #[error("{operation} timed out after {} ms", .timeout.as_millis())]
    Timeout {
        /// Call that timed out (`embedding` or `vector search`).
        operation: &'static str,
        /// Budget that was exceeded.
        timeout: Duration,
    },
}

/// Neighbours retrieved for one piece of candidate text.
#[derive(Debug, Clone)]
pub struct EvidenceSet {
    /// Embedding of the candidate text.
    pub query_vector: Vec<f32>,
    /// Nearest chunks, most similar first. Never empty.
    pub results: Vec<SimilarityResult>,
    /// Arithmetic mean of the result similarities.
    pub overall_similarity: f32,
}

impl EvidenceSet {
    /// Highest similarity among the results.
    pub fn max_similarity(&self) -> f32 {
        self.results
            .iter()
            .map(|result| result.similarity)
            .fold(0.0, f32::max)
    }
}

/// Summary granularity being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryType {
    /// Single free-text overview.
    Overview,
    /// Bullet list, validated as one newline-joined block.
    Bullets,
    /// Per-section summaries, validated as one block.
    Sections,
}

impl SummaryType {
    /// Lowercase label used in reports and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Overview => "overview",
            Self::Bullets => "bullets",
            Self::Sections => "sections",
        }
    }
}

impl fmt::Display for SummaryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a hallucination finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Whole-summary mean similarity fell below the threshold.
    LowSimilarity,
    /// One or more sentences lacked a close enough chunk.
    SentenceLevel,
}

/// How serious a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Weakly supported content.
    Medium,
    /// Content with little support in the document.
    High,
}

/// One unsupported sentence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceIssue {
    /// Sentence text, truncated for display.
    pub sentence: String,
    /// Best similarity found for the sentence.
    pub similarity: f32,
    /// Threshold the sentence was held to.
    pub threshold: f32,
}

/// Explainable finding attached to a [`ValidationResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HallucinationIssue {
    /// Finding category.
    #[serde(rename = "type")]
    pub kind: IssueKind,
    /// Finding severity.
    pub severity: Severity,
    /// Human readable explanation.
    pub description: String,
    /// Threshold in force.
    pub threshold: f32,
    /// Whole-summary similarity for `low_similarity` findings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_similarity: Option<f32>,
    /// Flagged sentences for `sentence_level` findings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issues: Option<Vec<SentenceIssue>>,
}

/// Verdict for one summary granularity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether the summary is supported by the document.
    pub valid: bool,
    /// Mean similarity of the whole summary to its nearest chunks.
    pub overall_similarity: f32,
    /// Threshold in force.
    pub threshold: f32,
    /// Findings; empty when validation could not run.
    pub hallucinations: Vec<HallucinationIssue>,
    /// Number of chunks retrieved for the whole summary.
    pub similar_chunks_count: usize,
    /// Best whole-summary matches with text previews.
    pub top_similar_chunks: Vec<SimilarityResult>,
    /// Granularity that was validated.
    pub summary_type: SummaryType,
    /// Why validation could not run, when it could not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationResult {
    /// Invalid result for a check that could not be performed.
    pub fn failed(summary_type: SummaryType, threshold: f32, error: impl Into<String>) -> Self {
        Self {
            valid: false,
            overall_similarity: 0.0,
            threshold,
            hallucinations: Vec::new(),
            similar_chunks_count: 0,
            top_similar_chunks: Vec::new(),
            summary_type,
            error: Some(error.into()),
        }
    }
}

/// Combined verdict over every summary granularity supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Document the summaries describe.
    pub document_id: String,
    /// Overview verdict, when an overview was supplied.
    pub overview_validation: Option<ValidationResult>,
    /// Bullet verdict, when bullets were supplied.
    pub bullets_validation: Option<ValidationResult>,
    /// Section verdict, when sections were supplied.
    pub sections_validation: Option<ValidationResult>,
    /// Logical AND over every present verdict.
    pub overall_valid: bool,
    /// Completion time in RFC 3339.
    pub validated_at: String,
}

impl ValidationReport {
    /// Present verdicts in overview, bullets, sections order.
    pub fn results(&self) -> impl Iterator<Item = &ValidationResult> {
        [
            self.overview_validation.as_ref(),
            self.bullets_validation.as_ref(),
            self.sections_validation.as_ref(),
        ]
        .into_iter()
        .flatten()
    }
}

/// Previously generated summaries for one document.
///
/// Any field may be absent; absent granularities are skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summaries {
    /// Free-text overview.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
    /// Bullet points.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bullets: Option<Vec<String>>,
    /// Per-section summaries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sections: Option<Vec<SectionSummary>>,
}

/// Summary of one document section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionSummary {
    /// Section heading, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Summary text for the section.
    pub summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn issue_serializes_kind_as_type() {
        let issue = HallucinationIssue {
            kind: IssueKind::LowSimilarity,
            severity: Severity::High,
            description: "low".into(),
            threshold: 0.7,
            actual_similarity: Some(0.4),
            issues: None,
        };
        let value = serde_json::to_value(&issue).expect("serialize");
        assert_eq!(value["type"], "low_similarity");
        assert_eq!(value["severity"], "high");
        assert!(value.get("issues").is_none());
    }

    #[test]
    fn summaries_tolerate_missing_fields_and_extra_section_keys() {
        let summaries: Summaries = serde_json::from_value(json!({
            "overview": "Fire is covered.",
            "sections": [{ "title": "Scope", "summary": "Covers fire.", "page": 3 }]
        }))
        .expect("deserialize");
        assert!(summaries.bullets.is_none());
        let sections = summaries.sections.expect("sections");
        assert_eq!(sections[0].summary, "Covers fire.");
    }

    #[test]
    fn timeout_error_mentions_budget() {
        let error = EvidenceError::Timeout {
            operation: "embedding",
            timeout: Duration::from_millis(250),
        };
        assert_eq!(error.to_string(), "embedding timed out after 250 ms");
    }
}
