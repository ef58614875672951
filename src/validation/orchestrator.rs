//! Runs the detector over every summary granularity and folds the verdicts.

use super::cancel::CancellationToken;
use super::detector::HallucinationDetector;
use super::types::{SummaryType, Summaries, ValidationReport, ValidationResult};
use crate::metrics::PipelineMetrics;
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Section summaries sampled per validation run.
pub const MAX_SECTIONS: usize = 5;

/// Entry point for validating a document's summaries.
pub struct ValidationOrchestrator {
    detector: HallucinationDetector,
    threshold: f32,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl ValidationOrchestrator {
    /// Build an orchestrator applying `threshold` to every granularity.
    pub fn new(detector: HallucinationDetector, threshold: f32) -> Self {
        Self {
            detector,
            threshold,
            metrics: None,
        }
    }

    /// Record every run into `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Similarity threshold in force.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Validate every granularity present in `summaries`.
    pub async fn validate_all(&self, document_id: &str, summaries: &Summaries) -> ValidationReport {
        self.validate_all_cancellable(document_id, summaries, &CancellationToken::new())
            .await
    }

    /// Like [`Self::validate_all`]; granularities still running when `cancel` fires come back
    /// invalid with an error while finished ones keep their verdicts.
    pub async fn validate_all_cancellable(
        &self,
        document_id: &str,
        summaries: &Summaries,
        cancel: &CancellationToken,
    ) -> ValidationReport {
        let overview_text = summaries.overview.clone();
        let bullets_text = summaries.bullets.as_ref().map(|bullets| bullets.join("\n"));
        let sections_text = summaries.sections.as_ref().map(|sections| {
            sections
                .iter()
                .take(MAX_SECTIONS)
                .map(|section| section.summary.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        });

        let (overview_validation, bullets_validation, sections_validation) = tokio::join!(
            self.validate_optional(document_id, overview_text, SummaryType::Overview, cancel),
            self.validate_optional(document_id, bullets_text, SummaryType::Bullets, cancel),
            self.validate_optional(document_id, sections_text, SummaryType::Sections, cancel),
        );

        let mut report = ValidationReport {
            document_id: document_id.to_string(),
            overview_validation,
            bullets_validation,
            sections_validation,
            overall_valid: true,
            validated_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
        };
        let overall_valid = report.results().all(|result| result.valid);
        report.overall_valid = overall_valid;

        let invalid = report.results().filter(|result| !result.valid).count();
        let flagged: usize = report
            .results()
            .map(|result| result.hallucinations.len())
            .sum();
        if let Some(metrics) = &self.metrics {
            metrics.record_validation(invalid as u64, flagged as u64);
        }
        tracing::info!(
            document_id,
            overall_valid = report.overall_valid,
            invalid_granularities = invalid,
            hallucinations = flagged,
            "QA check completed"
        );
        report
    }

    async fn validate_optional(
        &self,
        document_id: &str,
        text: Option<String>,
        summary_type: SummaryType,
        cancel: &CancellationToken,
    ) -> Option<ValidationResult> {
        let text = text?;
        Some(
            self.detector
                .assess_cancellable(document_id, &text, summary_type, self.threshold, cancel)
                .await,
        )
    }
}
