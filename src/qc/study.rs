//! Study-level registry of subject QC outputs.
//!
//! Scans every subject directory under a study root, keeps one entry per
//! subject (loaded record or typed failure) and exposes read-only views over
//! the registered subjects.

use super::aggregate::{stack_subjects, AggregateError, StudyArrays};
use super::subject::{SubjectQc, DEFAULT_RAW_EXTENSION};
use crate::codec::read_shape;
use crate::models::{FailureDiagnostic, LoadFailure, RegistryRow};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::ArrayD;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Errors raised by study-level operations.
#[derive(Debug, Error)]
pub enum StudyError {
    #[error("study directory does not exist or is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("failed to enumerate subjects: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("unknown subject: {0}")]
    UnknownSubject(String),

    #[error("subject {0} is not registered")]
    Unregistered(String),
}

/// Options for scanning a study directory.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Visit subjects in name order instead of filesystem order.
    pub sorted: bool,
    /// Extension of the per-subject marker file.
    pub raw_extension: String,
    /// Whether to show a progress bar.
    pub show_progress: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            sorted: false,
            raw_extension: DEFAULT_RAW_EXTENSION.to_string(),
            show_progress: false,
        }
    }
}

impl From<&crate::config::ScanConfig> for ScanOptions {
    fn from(config: &crate::config::ScanConfig) -> Self {
        Self {
            sorted: config.sorted,
            raw_extension: config.raw_extension.trim_start_matches('.').to_string(),
            show_progress: false,
        }
    }
}

/// Where failure diagnostics look for a subject's raw diffusion volume:
/// `<raw root>/<subject>/<dwi_subdir>/<subject><dwi_suffix>`.
#[derive(Debug, Clone)]
pub struct DwiLayout {
    pub dwi_subdir: String,
    pub dwi_suffix: String,
}

impl Default for DwiLayout {
    fn default() -> Self {
        Self {
            dwi_subdir: "dwi".to_string(),
            dwi_suffix: "_dwi.nii.gz".to_string(),
        }
    }
}

impl From<&crate::config::DiagnosticsConfig> for DwiLayout {
    fn from(config: &crate::config::DiagnosticsConfig) -> Self {
        Self {
            dwi_subdir: config.dwi_subdir.clone(),
            dwi_suffix: config.dwi_suffix.clone(),
        }
    }
}

impl DwiLayout {
    /// Expected location of a subject's raw volume.
    pub fn volume_path(&self, raw_root: &Path, subject: &str) -> PathBuf {
        raw_root
            .join(subject)
            .join(&self.dwi_subdir)
            .join(format!("{}{}", subject, self.dwi_suffix))
    }
}

/// Load outcome of one subject.
#[derive(Debug, Clone)]
pub enum SubjectOutcome {
    Registered(Box<SubjectQc>),
    Unregistered(LoadFailure),
}

/// One subject directory in the registry.
#[derive(Debug, Clone)]
pub struct SubjectEntry {
    pub name: String,
    pub path: PathBuf,
    pub outcome: SubjectOutcome,
    /// Filled by [`QcStudy::failure_info`] for unregistered subjects.
    pub diagnostic: Option<FailureDiagnostic>,
}

impl SubjectEntry {
    pub fn is_registered(&self) -> bool {
        matches!(self.outcome, SubjectOutcome::Registered(_))
    }

    pub fn record(&self) -> Option<&SubjectQc> {
        match &self.outcome {
            SubjectOutcome::Registered(subject) => Some(&**subject),
            SubjectOutcome::Unregistered(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&LoadFailure> {
        match &self.outcome {
            SubjectOutcome::Registered(_) => None,
            SubjectOutcome::Unregistered(failure) => Some(failure),
        }
    }
}

/// Registry of every subject directory under a study root.
#[derive(Debug, Clone)]
pub struct QcStudy {
    root: PathBuf,
    entries: Vec<SubjectEntry>,
}

impl QcStudy {
    /// Scan `root` and attempt to load every immediate subdirectory.
    ///
    /// A subject that fails to load is recorded as unregistered; only a
    /// missing or unreadable study root fails the scan.
    pub fn scan(root: &Path, options: &ScanOptions) -> Result<Self, StudyError> {
        let subject_dirs = list_subject_dirs(root, options.sorted)?;
        info!(
            "Found {} subject directories in {}",
            subject_dirs.len(),
            root.display()
        );

        let progress_bar = if options.show_progress {
            let pb = ProgressBar::new(subject_dirs.len() as u64);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
            ) {
                pb.set_style(style.progress_chars("#>-"));
            }
            Some(pb)
        } else {
            None
        };

        let mut entries = Vec::with_capacity(subject_dirs.len());
        for path in subject_dirs {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            if let Some(ref pb) = progress_bar {
                pb.set_message(name.clone());
            }

            let outcome = match SubjectQc::load_with_extension(&path, &options.raw_extension) {
                Ok(subject) => {
                    info!("Registered {}", name);
                    SubjectOutcome::Registered(Box::new(subject))
                }
                Err(e) => {
                    warn!("Could not register {}: {}", name, e);
                    SubjectOutcome::Unregistered(LoadFailure::from(&e))
                }
            };

            entries.push(SubjectEntry {
                name,
                path,
                outcome,
                diagnostic: None,
            });

            if let Some(ref pb) = progress_bar {
                pb.inc(1);
            }
        }

        if let Some(pb) = progress_bar {
            pb.finish_with_message("Scan complete");
        }

        Ok(Self {
            root: root.to_path_buf(),
            entries,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entries(&self) -> &[SubjectEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Subject names in registry order.
    pub fn subject_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn entry(&self, subject: &str) -> Option<&SubjectEntry> {
        self.entries.iter().find(|e| e.name == subject)
    }

    /// Registered subject records in registry order.
    pub fn registered(&self) -> impl Iterator<Item = &SubjectQc> {
        self.entries.iter().filter_map(SubjectEntry::record)
    }

    pub fn registered_count(&self) -> usize {
        self.registered().count()
    }

    /// Stack the registered subjects' arrays along a trailing subject axis.
    pub fn collect_arrays(&self) -> Result<StudyArrays, AggregateError> {
        let registered: Vec<&SubjectQc> = self.registered().collect();

        let kl_divergence = stack_subjects(
            "KLdiv",
            &subject_arrays(&registered, SubjectQc::kl_divergence),
        )?;
        let qc = stack_subjects("QC", &subject_arrays(&registered, SubjectQc::qc))?;
        let confidence = stack_subjects(
            "confidence",
            &subject_arrays(&registered, SubjectQc::confidence),
        )?;

        debug!(
            "Stacked {} subjects: KLdiv {:?}, QC {:?}, confidence {:?}",
            registered.len(),
            kl_divergence.shape(),
            qc.shape(),
            confidence.shape()
        );

        Ok(StudyArrays {
            subjects: registered.iter().map(|s| s.name().to_string()).collect(),
            kl_divergence,
            qc,
            confidence,
        })
    }

    /// KL-divergence map of one registered subject.
    pub fn kl_divergence_for_subject(&self, subject: &str) -> Result<&ArrayD<f64>, StudyError> {
        let entry = self
            .entry(subject)
            .ok_or_else(|| StudyError::UnknownSubject(subject.to_string()))?;
        entry
            .record()
            .map(SubjectQc::kl_divergence)
            .ok_or_else(|| StudyError::Unregistered(subject.to_string()))
    }

    /// Look up each unregistered subject's raw volume under `raw_root` and
    /// record what was found. Returns the number of subjects diagnosed.
    pub fn failure_info(&mut self, raw_root: &Path, layout: &DwiLayout) -> usize {
        let mut diagnosed = 0;
        for entry in self.entries.iter_mut().filter(|e| !e.is_registered()) {
            let diagnostic = diagnose_subject(raw_root, &entry.name, layout);
            debug!("{}: {}", entry.name, diagnostic);
            entry.diagnostic = Some(diagnostic);
            diagnosed += 1;
        }
        diagnosed
    }

    /// One row per subject, in registry order.
    pub fn registration_table(&self) -> Vec<RegistryRow> {
        self.entries
            .iter()
            .map(|entry| RegistryRow {
                subject: entry.name.clone(),
                registered: u8::from(entry.is_registered()),
                failure: entry.failure().cloned(),
                diagnostic: entry.diagnostic.clone(),
            })
            .collect()
    }
}

/// Pair each subject's name with one of its arrays.
fn subject_arrays<'a>(
    subjects: &[&'a SubjectQc],
    array: fn(&SubjectQc) -> &ArrayD<f64>,
) -> Vec<(&'a str, &'a ArrayD<f64>)> {
    subjects.iter().map(|s| (s.name(), array(s))).collect()
}

/// Inspect the raw-data tree for one subject.
pub fn diagnose_subject(raw_root: &Path, subject: &str, layout: &DwiLayout) -> FailureDiagnostic {
    let volume = layout.volume_path(raw_root, subject);

    if volume.is_file() {
        return match read_shape(&volume) {
            Ok(shape) => FailureDiagnostic::Shape(shape.to_string()),
            Err(e) => FailureDiagnostic::Unreadable(e.to_string()),
        };
    }

    let mut files: Vec<PathBuf> = volume
        .parent()
        .and_then(|parent| fs::read_dir(parent).ok())
        .map(|entries| entries.flatten().map(|e| e.path()).collect())
        .unwrap_or_default();
    files.sort();

    FailureDiagnostic::Files(files)
}

/// Immediate subdirectories of `root`, in filesystem order unless `sorted`.
pub fn list_subject_dirs(root: &Path, sorted: bool) -> Result<Vec<PathBuf>, StudyError> {
    if !root.is_dir() {
        return Err(StudyError::NotADirectory(root.to_path_buf()));
    }

    let mut walker = WalkDir::new(root).min_depth(1).max_depth(1).follow_links(true);
    if sorted {
        walker = walker.sort_by_file_name();
    }

    let mut dirs = Vec::new();
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_dir() {
            dirs.push(entry.into_path());
        }
    }

    Ok(dirs)
}
