//! Stacking per-subject arrays into study-wide arrays.

use ndarray::{ArrayD, Axis};
use thiserror::Error;

/// Errors raised while stacking subjects.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("no registered subjects to aggregate")]
    NoRegisteredSubjects,

    #[error(
        "{array} shape mismatch: {first_subject} has {expected:?} but {subject} has {found:?}"
    )]
    ShapeMismatch {
        array: &'static str,
        first_subject: String,
        expected: Vec<usize>,
        subject: String,
        found: Vec<usize>,
    },

    #[error("stacking failed: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Study-wide arrays; the last axis indexes subjects.
#[derive(Debug, Clone)]
pub struct StudyArrays {
    /// Registered subjects, in stacking order.
    pub subjects: Vec<String>,
    /// KL-divergence maps, volumes x slices x subjects.
    pub kl_divergence: ArrayD<f64>,
    /// Pass/fail flags, volumes x subjects.
    pub qc: ArrayD<f64>,
    /// Confidence flags, volumes x subjects.
    pub confidence: ArrayD<f64>,
}

impl StudyArrays {
    pub fn n_subjects(&self) -> usize {
        self.subjects.len()
    }
}

/// Stack same-shaped arrays along a new trailing axis.
///
/// Inputs are `(subject, array)` pairs in registry order. Shapes are checked up
/// front so the error names the first subject that disagrees.
pub fn stack_subjects(
    array: &'static str,
    inputs: &[(&str, &ArrayD<f64>)],
) -> Result<ArrayD<f64>, AggregateError> {
    let (first_subject, first) = inputs.first().ok_or(AggregateError::NoRegisteredSubjects)?;

    for (subject, candidate) in &inputs[1..] {
        if candidate.shape() != first.shape() {
            return Err(AggregateError::ShapeMismatch {
                array,
                first_subject: first_subject.to_string(),
                expected: first.shape().to_vec(),
                subject: subject.to_string(),
                found: candidate.shape().to_vec(),
            });
        }
    }

    let views: Vec<_> = inputs.iter().map(|(_, a)| a.view()).collect();
    Ok(ndarray::stack(Axis(first.ndim()), &views)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};

    #[test]
    fn test_stack_vectors_along_subject_axis() {
        let a = array![1.0, 0.0, 1.0].into_dyn();
        let b = array![0.0, 0.0, 1.0].into_dyn();

        let stacked = stack_subjects("QC", &[("sub-01", &a), ("sub-02", &b)]).unwrap();

        assert_eq!(stacked.shape(), &[3, 2]);
        assert_eq!(stacked[[0, 0]], 1.0);
        assert_eq!(stacked[[0, 1]], 0.0);
        assert_eq!(stacked[[2, 1]], 1.0);
    }

    #[test]
    fn test_stack_maps_along_third_axis() {
        let a = Array::from_elem((2, 3), 1.0).into_dyn();
        let b = Array::from_elem((2, 3), 2.0).into_dyn();
        let c = Array::from_elem((2, 3), 3.0).into_dyn();

        let stacked = stack_subjects("KLdiv", &[("a", &a), ("b", &b), ("c", &c)]).unwrap();

        assert_eq!(stacked.shape(), &[2, 3, 3]);
        assert_eq!(stacked[[1, 2, 0]], 1.0);
        assert_eq!(stacked[[1, 2, 2]], 3.0);
    }

    #[test]
    fn test_mismatched_shapes_are_rejected() {
        let a = Array::from_elem((2, 3), 1.0).into_dyn();
        let b = Array::from_elem((2, 4), 1.0).into_dyn();

        match stack_subjects("KLdiv", &[("sub-01", &a), ("sub-02", &b)]) {
            Err(AggregateError::ShapeMismatch {
                subject,
                expected,
                found,
                ..
            }) => {
                assert_eq!(subject, "sub-02");
                assert_eq!(expected, vec![2, 3]);
                assert_eq!(found, vec![2, 4]);
            }
            other => panic!("expected shape mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(
            stack_subjects("QC", &[]),
            Err(AggregateError::NoRegisteredSubjects)
        ));
    }
}
