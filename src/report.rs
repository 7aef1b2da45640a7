use serde::{Deserialize, Serialize};

use crate::descriptor::PropertyError;
use crate::engine::{MappingOutcome, MappingWarning};

/// Reporter for turning mapping outcomes into readable diagnostics
pub struct MappingReporter {
    output_format: ReportFormat,
}

/// Available output formats for mapping reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Console,
    Json,
    Yaml,
}

/// Diagnostics for a batch of mappings
#[derive(Debug, Clone, Serialize)]
pub struct MappingReport {
    pub summary: MappingSummary,
    pub warnings: Vec<ReportedWarning>,
    pub errors: Vec<ReportedError>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingSummary {
    pub total: usize,
    pub mapped: usize,
    pub absent: usize,
    pub failed: usize,
    pub with_warnings: usize,
}

/// A warning tagged with the position of the outcome it came from
#[derive(Debug, Clone, Serialize)]
pub struct ReportedWarning {
    pub index: usize,
    #[serde(flatten)]
    pub warning: MappingWarning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportedError {
    pub index: usize,
    pub message: String,
}

impl MappingReporter {
    pub fn new() -> Self {
        Self {
            output_format: ReportFormat::Console,
        }
    }

    pub fn with_format(mut self, format: ReportFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Collect counts, warnings and errors from a batch of outcomes
    pub fn generate_report<T>(&self, outcomes: &[MappingOutcome<T>]) -> MappingReport {
        let mut summary = MappingSummary {
            total: outcomes.len(),
            ..MappingSummary::default()
        };
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        for (index, outcome) in outcomes.iter().enumerate() {
            match (&outcome.value, &outcome.error) {
                (Some(_), _) => summary.mapped += 1,
                (None, Some(e)) => {
                    summary.failed += 1;
                    errors.push(ReportedError {
                        index,
                        message: e.to_string(),
                    });
                }
                (None, None) => summary.absent += 1,
            }

            if outcome.has_warnings() {
                summary.with_warnings += 1;
            }
            warnings.extend(outcome.warnings.iter().cloned().map(|warning| ReportedWarning { index, warning }));
        }

        let recommendations = self.generate_recommendations(&summary, &warnings);
        MappingReport {
            summary,
            warnings,
            errors,
            recommendations,
        }
    }

    /// Format the report according to the configured output format
    pub fn format_report(&self, report: &MappingReport) -> Result<String, ReportError> {
        match self.output_format {
            ReportFormat::Console => Ok(self.format_console_report(report)),
            ReportFormat::Json => {
                serde_json::to_string_pretty(report).map_err(|e| ReportError::SerializationError(e.to_string()))
            }
            ReportFormat::Yaml => serde_yaml::to_string(report).map_err(|e| ReportError::SerializationError(e.to_string())),
        }
    }

    fn generate_recommendations(&self, summary: &MappingSummary, warnings: &[ReportedWarning]) -> Vec<String> {
        let mut recommendations = Vec::new();

        if summary.failed > 0 {
            recommendations.push("Check that every target type is described and has a transform set for its source".to_string());
        }

        if warnings.iter().any(|w| {
            matches!(
                w.warning.error,
                PropertyError::UnknownProperty { .. } | PropertyError::BrokenPath { .. }
            )
        }) {
            recommendations.push("Run the registry audit to find transform paths that do not resolve".to_string());
        }

        if warnings
            .iter()
            .any(|w| matches!(w.warning.error, PropertyError::ElementUnmapped { .. }))
        {
            recommendations.push("Some collection elements were dropped; register transform sets for their types".to_string());
        }

        if recommendations.is_empty() && summary.with_warnings == 0 {
            recommendations.push("All mappings completed without warnings".to_string());
        }

        recommendations
    }

    fn format_console_report(&self, report: &MappingReport) -> String {
        let mut output = String::new();

        output.push_str("=== Mapping Report ===\n\n");
        output.push_str(&format!("Total: {}\n", report.summary.total));
        output.push_str(&format!("Mapped: {}\n", report.summary.mapped));
        output.push_str(&format!("Absent: {}\n", report.summary.absent));
        output.push_str(&format!("Failed: {}\n", report.summary.failed));

        if !report.errors.is_empty() {
            output.push_str("\nErrors:\n");
            for error in &report.errors {
                output.push_str(&format!("  [{}] {}\n", error.index, error.message));
            }
        }

        if !report.warnings.is_empty() {
            output.push_str("\nWarnings:\n");
            for reported in &report.warnings {
                output.push_str(&format!(
                    "  [{}] {}.{}: {}\n",
                    reported.index, reported.warning.target_type, reported.warning.path, reported.warning.error
                ));
            }
        }

        if !report.recommendations.is_empty() {
            output.push_str("\nRecommendations:\n");
            for rec in &report.recommendations {
                output.push_str(&format!("  • {}\n", rec));
            }
        }

        output
    }
}

impl Default for MappingReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
}
