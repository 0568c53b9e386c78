//! Data models for the QC summarizer.
//!
//! This module contains the registry rows, failure descriptions and report
//! structures shared between the study scan, the summary views and the report
//! generator.

use crate::analysis::{Heatmap, QcOverlay, VolumeCounts};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Why a subject could not be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Expected outputs are absent (pipeline did not run or did not finish).
    Missing,
    /// Outputs are present but malformed or inconsistently named.
    Corrupt,
    /// The filesystem refused a read.
    Io,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Missing => write!(f, "Missing"),
            FailureKind::Corrupt => write!(f, "Corrupt"),
            FailureKind::Io => write!(f, "I/O"),
        }
    }
}

impl FailureKind {
    /// Returns an emoji representation of the failure kind.
    pub fn emoji(&self) -> &'static str {
        match self {
            FailureKind::Missing => "🟡",
            FailureKind::Corrupt => "🔴",
            FailureKind::Io => "🟠",
        }
    }
}

/// A per-subject load failure, kept in place of the subject record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// What was found in the raw-data tree for an unregistered subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "value")]
pub enum FailureDiagnostic {
    /// The raw diffusion volume exists; its shape, tuple formatted.
    Shape(String),
    /// The volume is absent; listing of the directory where it was expected.
    Files(Vec<PathBuf>),
    /// The volume exists but its header could not be read.
    Unreadable(String),
}

impl FailureDiagnostic {
    /// Space-separated listing, as shown in the registry table.
    pub fn files_text(files: &[PathBuf]) -> String {
        files
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for FailureDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureDiagnostic::Shape(shape) => write!(f, "shape {}", shape),
            FailureDiagnostic::Files(files) if files.is_empty() => write!(f, "files: (none)"),
            FailureDiagnostic::Files(files) => write!(f, "files: {}", Self::files_text(files)),
            FailureDiagnostic::Unreadable(e) => write!(f, "unreadable: {}", e),
        }
    }
}

/// One row of the registration table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRow {
    /// Subject directory name.
    pub subject: String,
    /// 1 when the subject's outputs loaded, otherwise 0.
    pub registered: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<LoadFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<FailureDiagnostic>,
}

impl RegistryRow {
    /// Shape string from the diagnostics, if one was recorded.
    pub fn shape(&self) -> Option<&str> {
        match &self.diagnostic {
            Some(FailureDiagnostic::Shape(shape)) => Some(shape),
            _ => None,
        }
    }

    /// Directory listing from the diagnostics, if one was recorded.
    pub fn files(&self) -> Option<String> {
        match &self.diagnostic {
            Some(FailureDiagnostic::Files(files)) => Some(FailureDiagnostic::files_text(files)),
            _ => None,
        }
    }
}

/// Counts over the registration table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySummary {
    pub total: usize,
    pub registered: usize,
    pub unregistered: usize,
    pub missing: usize,
    pub corrupt: usize,
    pub io: usize,
}

impl RegistrySummary {
    /// Creates a summary from registry rows.
    pub fn from_rows(rows: &[RegistryRow]) -> Self {
        let mut summary = Self {
            total: rows.len(),
            ..Self::default()
        };

        for row in rows {
            if row.registered == 1 {
                summary.registered += 1;
                continue;
            }
            summary.unregistered += 1;
            match row.failure.as_ref().map(|f| f.kind) {
                Some(FailureKind::Missing) => summary.missing += 1,
                Some(FailureKind::Corrupt) => summary.corrupt += 1,
                Some(FailureKind::Io) => summary.io += 1,
                None => {}
            }
        }

        summary
    }
}

/// Study-wide views computed from the stacked arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateSummary {
    /// Registered subjects, in stacking order.
    pub subjects: Vec<String>,
    pub kl_divergence_shape: Vec<usize>,
    pub qc_shape: Vec<usize>,
    pub confidence_shape: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_kl_divergence: Option<Heatmap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay: Option<QcOverlay>,
    pub volume_counts: Vec<VolumeCounts>,
}

/// Metadata about the summary report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// QC study directory that was scanned.
    pub study_dir: PathBuf,
    /// Raw-data tree used for failure diagnostics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_dir: Option<PathBuf>,
    /// Date and time of the scan.
    pub analysis_date: DateTime<Utc>,
    /// Number of subject directories found.
    pub subjects_scanned: usize,
    /// Number of subjects registered.
    pub subjects_registered: usize,
    /// Duration of the scan in seconds.
    pub duration_seconds: f64,
}

/// The complete study report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub registry: Vec<RegistryRow>,
    pub summary: RegistrySummary,
    /// Present when the registered subjects could be stacked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateSummary>,
    /// Why stacking failed, when it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate_error: Option<String>,
    /// KL map of a single requested subject.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_heatmap: Option<Heatmap>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(subject: &str, failure: Option<FailureKind>) -> RegistryRow {
        RegistryRow {
            subject: subject.to_string(),
            registered: u8::from(failure.is_none()),
            failure: failure.map(|kind| LoadFailure {
                kind,
                message: "test".to_string(),
            }),
            diagnostic: None,
        }
    }

    #[test]
    fn test_registry_summary() {
        let rows = vec![
            row("sub-01", None),
            row("sub-02", Some(FailureKind::Missing)),
            row("sub-03", None),
            row("sub-04", Some(FailureKind::Corrupt)),
            row("sub-05", Some(FailureKind::Missing)),
        ];

        let summary = RegistrySummary::from_rows(&rows);
        assert_eq!(summary.total, 5);
        assert_eq!(summary.registered, 2);
        assert_eq!(summary.unregistered, 3);
        assert_eq!(summary.missing, 2);
        assert_eq!(summary.corrupt, 1);
        assert_eq!(summary.io, 0);
    }

    #[test]
    fn test_diagnostic_accessors() {
        let mut with_shape = row("sub-02", Some(FailureKind::Missing));
        with_shape.diagnostic = Some(FailureDiagnostic::Shape("(96, 96, 60, 70)".to_string()));
        assert_eq!(with_shape.shape(), Some("(96, 96, 60, 70)"));
        assert_eq!(with_shape.files(), None);

        let mut with_files = row("sub-03", Some(FailureKind::Missing));
        with_files.diagnostic = Some(FailureDiagnostic::Files(vec![
            PathBuf::from("/raw/sub-03/dwi/a.bval"),
            PathBuf::from("/raw/sub-03/dwi/a.bvec"),
        ]));
        assert_eq!(
            with_files.files().as_deref(),
            Some("/raw/sub-03/dwi/a.bval /raw/sub-03/dwi/a.bvec")
        );
    }

    #[test]
    fn test_failure_kind_display() {
        assert_eq!(FailureKind::Missing.to_string(), "Missing");
        assert_eq!(FailureKind::Io.to_string(), "I/O");
        assert_eq!(FailureKind::Corrupt.emoji(), "🔴");
    }
}
