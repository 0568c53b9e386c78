//! Subject loading and study aggregation.

pub mod aggregate;
pub mod study;
pub mod subject;

pub use aggregate::{stack_subjects, AggregateError, StudyArrays};
pub use study::{
    diagnose_subject, list_subject_dirs, DwiLayout, QcStudy, ScanOptions, StudyError,
    SubjectEntry, SubjectOutcome,
};
pub use subject::{derive_name, LoadError, SubjectQc};
