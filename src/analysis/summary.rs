//! Summary views over the stacked study arrays.
//!
//! Each function here computes the data behind one of the diagnostic figures:
//! KL-divergence heat-maps, the QC/confidence overlay and per-subject volume
//! counts. Nothing is rendered; the report generator decides how to show them.

use crate::qc::{AggregateError, StudyArrays};
use ndarray::{ArrayD, Axis, Ix2};
use serde::{Deserialize, Serialize};

/// A labelled 2D grid of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heatmap {
    pub title: String,
    pub row_label: String,
    pub col_label: String,
    /// Row-major values.
    pub values: Vec<Vec<f64>>,
}

impl Heatmap {
    /// Build a heat-map from a 2D array. Returns `None` for any other rank.
    pub fn from_array(
        title: &str,
        row_label: &str,
        col_label: &str,
        array: &ArrayD<f64>,
    ) -> Option<Self> {
        let grid = array.view().into_dimensionality::<Ix2>().ok()?;
        Some(Self {
            title: title.to_string(),
            row_label: row_label.to_string(),
            col_label: col_label.to_string(),
            values: grid.rows().into_iter().map(|row| row.to_vec()).collect(),
        })
    }

    pub fn n_rows(&self) -> usize {
        self.values.len()
    }

    pub fn n_cols(&self) -> usize {
        self.values.first().map(Vec::len).unwrap_or(0)
    }

    /// Smallest finite value.
    pub fn min(&self) -> Option<f64> {
        self.finite_values().reduce(f64::min)
    }

    /// Largest finite value.
    pub fn max(&self) -> Option<f64> {
        self.finite_values().reduce(f64::max)
    }

    fn finite_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().flatten().copied().filter(|v| v.is_finite())
    }
}

/// KL-divergence map of a single subject (volumes x slices).
pub fn subject_heatmap(subject: &str, kl_divergence: &ArrayD<f64>) -> Option<Heatmap> {
    Heatmap::from_array(
        &format!("KL divergence: {}", subject),
        "Volume",
        "Z Slice",
        kl_divergence,
    )
}

/// Mean KL-divergence map over the subject axis.
pub fn mean_kl_divergence(arrays: &StudyArrays) -> Option<ArrayD<f64>> {
    let ndim = arrays.kl_divergence.ndim();
    if ndim == 0 {
        return None;
    }
    arrays.kl_divergence.mean_axis(Axis(ndim - 1))
}

/// Mean KL-divergence map as a heat-map.
pub fn mean_kl_heatmap(arrays: &StudyArrays) -> Option<Heatmap> {
    let mean = mean_kl_divergence(arrays)?;
    Heatmap::from_array(
        &format!("Average KL divergence ({} subjects)", arrays.n_subjects()),
        "Volume",
        "Z Slice",
        &mean,
    )
}

/// Number of zero entries in each subject's slice of `stack`.
///
/// The last axis of `stack` indexes subjects.
pub fn zero_counts(stack: &ArrayD<f64>) -> Vec<usize> {
    if stack.ndim() == 0 {
        return Vec::new();
    }
    let subject_axis = Axis(stack.ndim() - 1);
    stack
        .axis_iter(subject_axis)
        .map(|subject| subject.iter().filter(|v| **v == 0.0).count())
        .collect()
}

/// Per-subject number of volumes flagged as failed (`QC == 0`).
pub fn failed_volume_counts(arrays: &StudyArrays) -> Vec<usize> {
    zero_counts(&arrays.qc)
}

/// Per-subject number of volumes with low confidence (`confidence == 0`).
pub fn low_confidence_counts(arrays: &StudyArrays) -> Vec<usize> {
    zero_counts(&arrays.confidence)
}

/// Failed and low-confidence volume counts of one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeCounts {
    pub subject: String,
    pub failed: usize,
    pub low_confidence: usize,
}

/// Failed and low-confidence counts for every stacked subject.
pub fn volume_counts(arrays: &StudyArrays) -> Vec<VolumeCounts> {
    let failed = failed_volume_counts(arrays);
    let low_confidence = low_confidence_counts(arrays);

    arrays
        .subjects
        .iter()
        .zip(failed)
        .zip(low_confidence)
        .map(|((subject, failed), low_confidence)| VolumeCounts {
            subject: subject.clone(),
            failed,
            low_confidence,
        })
        .collect()
}

/// Combined QC verdict and confidence of one volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    PassConfident,
    PassUnsure,
    FailConfident,
    FailUnsure,
}

impl CellStatus {
    pub fn classify(qc: f64, confidence: f64) -> Self {
        match (qc != 0.0, confidence != 0.0) {
            (true, true) => CellStatus::PassConfident,
            (true, false) => CellStatus::PassUnsure,
            (false, true) => CellStatus::FailConfident,
            (false, false) => CellStatus::FailUnsure,
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self, CellStatus::PassConfident | CellStatus::PassUnsure)
    }

    pub fn confident(&self) -> bool {
        matches!(self, CellStatus::PassConfident | CellStatus::FailConfident)
    }

    /// Single-character cell marker for text grids.
    pub fn symbol(&self) -> char {
        match self {
            CellStatus::PassConfident => '.',
            CellStatus::PassUnsure => 'o',
            CellStatus::FailConfident => 'X',
            CellStatus::FailUnsure => '?',
        }
    }
}

/// QC verdicts overlaid with confidence, volumes x subjects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcOverlay {
    pub subjects: Vec<String>,
    /// `cells[volume][subject]`.
    pub cells: Vec<Vec<CellStatus>>,
}

impl QcOverlay {
    pub fn n_volumes(&self) -> usize {
        self.cells.len()
    }

    /// Count of cells with the given status.
    pub fn count(&self, status: CellStatus) -> usize {
        self.cells
            .iter()
            .flatten()
            .filter(|cell| **cell == status)
            .count()
    }
}

/// Overlay the QC and confidence stacks cell by cell.
///
/// Axes other than the subject axis are flattened into rows.
pub fn qc_confidence_overlay(arrays: &StudyArrays) -> Result<QcOverlay, AggregateError> {
    let qc = &arrays.qc;
    let confidence = &arrays.confidence;

    if qc.shape() != confidence.shape() {
        return Err(AggregateError::ShapeMismatch {
            array: "QC/confidence overlay",
            first_subject: "QC".to_string(),
            expected: qc.shape().to_vec(),
            subject: "confidence".to_string(),
            found: confidence.shape().to_vec(),
        });
    }
    if qc.ndim() == 0 {
        return Ok(QcOverlay {
            subjects: arrays.subjects.clone(),
            cells: Vec::new(),
        });
    }

    let subject_axis = Axis(qc.ndim() - 1);
    let n_subjects = qc.len_of(subject_axis);
    let n_volumes = if n_subjects == 0 { 0 } else { qc.len() / n_subjects };

    let mut cells = vec![vec![CellStatus::PassConfident; n_subjects]; n_volumes];
    for (j, (qc_subject, conf_subject)) in qc
        .axis_iter(subject_axis)
        .zip(confidence.axis_iter(subject_axis))
        .enumerate()
    {
        for (i, (q, c)) in qc_subject.iter().zip(conf_subject.iter()).enumerate() {
            cells[i][j] = CellStatus::classify(*q, *c);
        }
    }

    Ok(QcOverlay {
        subjects: arrays.subjects.clone(),
        cells,
    })
}
