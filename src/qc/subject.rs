//! Per-subject QC output directory.
//!
//! A subject directory holds one `<prefix>.raw` marker file plus siblings named
//! `<prefix>.<stem>.<ext>`. The prefix is taken from the raw file, every sibling
//! gets a derived name (`KLdiv_npy`, `QC_csv`, ...) and the recognised outputs
//! are decoded into typed fields.

use crate::codec::{read_npy, NpyError, Table, TableError};
use crate::models::{FailureKind, LoadFailure};
use ndarray::ArrayD;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Extension of the marker file that carries the naming prefix.
pub const DEFAULT_RAW_EXTENSION: &str = "raw";

/// Stem of the KL-divergence map (volumes x slices).
pub const KL_DIVERGENCE_STEM: &str = "KLdiv";
/// Stem of the per-volume pass/fail array and table.
pub const QC_STEM: &str = "QC";
/// Stem of the per-volume confidence array and table.
pub const CONFIDENCE_STEM: &str = "confidence";

/// Column schema applied to the QC table.
pub const QC_COLUMNS: [&str; 3] = ["Gradient", "QC", "b value"];
/// Column schema applied to the confidence table.
pub const CONFIDENCE_COLUMNS: [&str; 3] = ["Gradient", "Sure", "b value"];

/// Errors raised while loading one subject directory.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no .{extension} file in {}", .dir.display())]
    NoRawFile { dir: PathBuf, extension: String },

    #[error("ambiguous naming prefix in {}: {}", .dir.display(), .candidates.join(", "))]
    AmbiguousPrefix {
        dir: PathBuf,
        candidates: Vec<String>,
    },

    #[error("file '{file}' does not follow prefix '{prefix}'")]
    InconsistentNaming { file: String, prefix: String },

    #[error("missing {stem} array")]
    MissingArray { stem: &'static str },

    #[error("missing {stem} table")]
    MissingTable { stem: &'static str },

    #[error("{stem} table: {source}")]
    Table {
        stem: String,
        #[source]
        source: TableError,
    },

    #[error("failed to decode {}: {source}", .path.display())]
    Npy {
        path: PathBuf,
        #[source]
        source: NpyError,
    },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LoadError {
    /// Separate expected absence from malformed outputs.
    pub fn kind(&self) -> FailureKind {
        match self {
            LoadError::NoRawFile { .. }
            | LoadError::MissingArray { .. }
            | LoadError::MissingTable { .. } => FailureKind::Missing,
            LoadError::AmbiguousPrefix { .. } | LoadError::InconsistentNaming { .. } => {
                FailureKind::Corrupt
            }
            LoadError::Table { source, .. } if source.is_io() => FailureKind::Io,
            LoadError::Table { .. } => FailureKind::Corrupt,
            LoadError::Npy {
                source: NpyError::Io(_),
                ..
            } => FailureKind::Io,
            LoadError::Npy { .. } => FailureKind::Corrupt,
            LoadError::Io { .. } => FailureKind::Io,
        }
    }
}

impl From<&LoadError> for LoadFailure {
    fn from(err: &LoadError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Derive the field name of `file_name` under `prefix`.
///
/// `sub-01.KLdiv.npy` under `sub-01` becomes `KLdiv_npy`. Returns `None` when
/// the file does not start with the prefix or nothing is left after it.
pub fn derive_name(file_name: &str, prefix: &str) -> Option<String> {
    let rest = file_name.strip_prefix(prefix)?;
    let name = rest.replace('.', "_");
    let name = name.trim_start_matches('_');
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Decoded QC outputs of one subject. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct SubjectQc {
    name: String,
    dir: PathBuf,
    prefix: String,
    files: BTreeMap<String, PathBuf>,
    kl_divergence: ArrayD<f64>,
    qc: ArrayD<f64>,
    confidence: ArrayD<f64>,
    qc_table: Table,
    confidence_table: Table,
    extra_arrays: BTreeMap<String, ArrayD<f64>>,
    extra_tables: BTreeMap<String, Table>,
}

impl SubjectQc {
    /// Load a subject directory whose marker file ends in `.raw`.
    pub fn load(dir: &Path) -> Result<Self, LoadError> {
        Self::load_with_extension(dir, DEFAULT_RAW_EXTENSION)
    }

    /// Load a subject directory using `raw_extension` for the marker file.
    pub fn load_with_extension(dir: &Path, raw_extension: &str) -> Result<Self, LoadError> {
        let entries = list_files(dir)?;
        let prefix = find_prefix(dir, &entries, raw_extension)?;
        debug!("{}: naming prefix '{}'", dir.display(), prefix);

        let mut files = BTreeMap::new();
        let mut arrays: BTreeMap<String, ArrayD<f64>> = BTreeMap::new();
        let mut tables: BTreeMap<String, Table> = BTreeMap::new();

        for (file_name, path) in &entries {
            let derived =
                derive_name(file_name, &prefix).ok_or_else(|| LoadError::InconsistentNaming {
                    file: file_name.clone(),
                    prefix: prefix.clone(),
                })?;

            if let Some(stem) = derived.strip_suffix("_npy") {
                let array = read_npy(path).map_err(|source| LoadError::Npy {
                    path: path.clone(),
                    source,
                })?;
                arrays.insert(stem.to_string(), array);
            } else if let Some(stem) = derived.strip_suffix("_csv") {
                let table = Table::read_csv(path).map_err(|source| LoadError::Table {
                    stem: stem.to_string(),
                    source,
                })?;
                debug!("Read {} ({} rows)", path.display(), table.n_rows());
                tables.insert(stem.to_string(), table);
            }

            files.insert(derived, path.clone());
        }

        let qc_table = take_table(&mut tables, QC_STEM, &QC_COLUMNS)?;
        let confidence_table = take_table(&mut tables, CONFIDENCE_STEM, &CONFIDENCE_COLUMNS)?;

        let kl_divergence = take_array(&mut arrays, KL_DIVERGENCE_STEM)?;
        let qc = take_array(&mut arrays, QC_STEM)?;
        let confidence = take_array(&mut arrays, CONFIDENCE_STEM)?;

        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| dir.display().to_string());

        Ok(Self {
            name,
            dir: dir.to_path_buf(),
            prefix,
            files,
            kl_divergence,
            qc,
            confidence,
            qc_table,
            confidence_table,
            extra_arrays: arrays
                .into_iter()
                .map(|(stem, a)| (format!("{stem}_array"), a))
                .collect(),
            extra_tables: tables
                .into_iter()
                .map(|(stem, t)| (format!("{stem}_df"), t))
                .collect(),
        })
    }

    /// Subject identifier (directory name).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Every file in the directory, keyed by derived name.
    pub fn files(&self) -> &BTreeMap<String, PathBuf> {
        &self.files
    }

    /// Path of the file with the given derived name (e.g. `raw`, `QC_csv`).
    pub fn path(&self, derived_name: &str) -> Option<&Path> {
        self.files.get(derived_name).map(PathBuf::as_path)
    }

    pub fn kl_divergence(&self) -> &ArrayD<f64> {
        &self.kl_divergence
    }

    pub fn qc(&self) -> &ArrayD<f64> {
        &self.qc
    }

    pub fn confidence(&self) -> &ArrayD<f64> {
        &self.confidence
    }

    /// QC table with columns `Gradient, QC, b value`.
    pub fn qc_table(&self) -> &Table {
        &self.qc_table
    }

    /// Confidence table with columns `Gradient, Sure, b value`.
    pub fn confidence_table(&self) -> &Table {
        &self.confidence_table
    }

    /// Look up a decoded array by name: `KLdiv_array`, `QC_array`,
    /// `confidence_array` or `<stem>_array` for any other `.npy` output.
    pub fn array(&self, name: &str) -> Option<&ArrayD<f64>> {
        match name.strip_suffix("_array") {
            Some(KL_DIVERGENCE_STEM) => Some(&self.kl_divergence),
            Some(QC_STEM) => Some(&self.qc),
            Some(CONFIDENCE_STEM) => Some(&self.confidence),
            _ => self.extra_arrays.get(name),
        }
    }

    /// Look up a decoded table by name: `QC_df`, `confidence_df` or
    /// `<stem>_df` for any other `.csv` output.
    pub fn table(&self, name: &str) -> Option<&Table> {
        match name.strip_suffix("_df") {
            Some(QC_STEM) => Some(&self.qc_table),
            Some(CONFIDENCE_STEM) => Some(&self.confidence_table),
            _ => self.extra_tables.get(name),
        }
    }

    pub fn extra_arrays(&self) -> &BTreeMap<String, ArrayD<f64>> {
        &self.extra_arrays
    }

    pub fn extra_tables(&self) -> &BTreeMap<String, Table> {
        &self.extra_tables
    }
}

/// Regular, non-hidden files of `dir`, sorted by name.
fn list_files(dir: &Path) -> Result<Vec<(String, PathBuf)>, LoadError> {
    let io_err = |source| LoadError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        if name.starts_with('.') || !path.is_file() {
            continue;
        }
        entries.push((name, path));
    }

    entries.sort();
    Ok(entries)
}

/// The naming prefix is the stem of the single marker file.
fn find_prefix(
    dir: &Path,
    entries: &[(String, PathBuf)],
    raw_extension: &str,
) -> Result<String, LoadError> {
    let suffix = format!(".{raw_extension}");
    let mut candidates: Vec<String> = entries
        .iter()
        .filter_map(|(name, _)| name.strip_suffix(&suffix))
        .map(String::from)
        .collect();

    match candidates.len() {
        0 => Err(LoadError::NoRawFile {
            dir: dir.to_path_buf(),
            extension: raw_extension.to_string(),
        }),
        1 => Ok(candidates.remove(0)),
        _ => Err(LoadError::AmbiguousPrefix {
            dir: dir.to_path_buf(),
            candidates,
        }),
    }
}

fn take_array(
    arrays: &mut BTreeMap<String, ArrayD<f64>>,
    stem: &'static str,
) -> Result<ArrayD<f64>, LoadError> {
    arrays
        .remove(stem)
        .ok_or(LoadError::MissingArray { stem })
}

fn take_table(
    tables: &mut BTreeMap<String, Table>,
    stem: &'static str,
    columns: &[&str],
) -> Result<Table, LoadError> {
    let mut table = tables.remove(stem).ok_or(LoadError::MissingTable { stem })?;
    table
        .rename_columns(columns)
        .map_err(|source| LoadError::Table {
            stem: stem.to_string(),
            source,
        })?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{write_default_subject, write_npy};
    use tempfile::TempDir;

    #[test]
    fn test_derive_name() {
        assert_eq!(derive_name("S.KLdiv.npy", "S").as_deref(), Some("KLdiv_npy"));
        assert_eq!(derive_name("S.raw", "S").as_deref(), Some("raw"));
        assert_eq!(
            derive_name("sub-01_dwi.QC.csv", "sub-01_dwi").as_deref(),
            Some("QC_csv")
        );
        assert_eq!(derive_name("other.QC.csv", "S"), None);
        assert_eq!(derive_name("S", "S"), None);
    }

    #[test]
    fn test_load_standard_subject() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("sub-01");
        write_default_subject(&dir, "S");

        let subject = SubjectQc::load(&dir).unwrap();

        assert_eq!(subject.name(), "sub-01");
        assert_eq!(subject.prefix(), "S");
        assert_eq!(subject.kl_divergence().shape(), &[2, 3]);
        assert_eq!(subject.qc().shape(), &[2]);
        assert_eq!(subject.confidence().shape(), &[2]);

        assert_eq!(subject.qc_table().columns(), &QC_COLUMNS);
        assert_eq!(subject.confidence_table().columns(), &CONFIDENCE_COLUMNS);
        assert_eq!(subject.qc_table().n_cols(), 3);
        assert_eq!(subject.confidence_table().n_cols(), 3);
        assert_eq!(subject.qc_table().column_f64("QC").unwrap(), vec![1.0, 0.0]);

        assert!(subject.array("KLdiv_array").is_some());
        assert!(subject.array("QC_array").is_some());
        assert!(subject.array("confidence_array").is_some());
        assert!(subject.table("QC_df").is_some());
        assert!(subject.table("confidence_df").is_some());

        let names: Vec<&str> = subject.files().keys().map(String::as_str).collect();
        assert_eq!(
            names,
            vec!["KLdiv_npy", "QC_csv", "QC_npy", "confidence_csv", "confidence_npy", "raw"]
        );
        assert_eq!(subject.path("raw"), Some(dir.join("S.raw").as_path()));
    }

    #[test]
    fn test_unknown_outputs_are_kept() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("sub-01");
        write_default_subject(&dir, "S");
        write_npy(&dir.join("S.residual.npy"), &[2], &[0.0, 1.0]);
        std::fs::write(dir.join("S.log.txt"), "done").unwrap();
        std::fs::write(dir.join(".DS_Store"), "junk").unwrap();
        std::fs::create_dir(dir.join("plots")).unwrap();

        let subject = SubjectQc::load(&dir).unwrap();

        assert_eq!(subject.array("residual_array").map(|a| a.len()), Some(2));
        assert!(subject.path("log_txt").is_some());
        assert!(subject.array("log_array").is_none());
        assert_eq!(subject.files().len(), 8);
    }

    #[test]
    fn test_missing_raw_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("sub-01");
        write_default_subject(&dir, "S");
        std::fs::remove_file(dir.join("S.raw")).unwrap();

        let err = SubjectQc::load(&dir).unwrap_err();
        assert!(matches!(err, LoadError::NoRawFile { .. }));
        assert_eq!(err.kind(), FailureKind::Missing);
    }

    #[test]
    fn test_two_raw_files_are_ambiguous() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("sub-01");
        write_default_subject(&dir, "S");
        std::fs::write(dir.join("T.raw"), b"").unwrap();

        let err = SubjectQc::load(&dir).unwrap_err();
        match &err {
            LoadError::AmbiguousPrefix { candidates, .. } => {
                assert_eq!(candidates, &vec!["S".to_string(), "T".to_string()]);
            }
            other => panic!("expected ambiguous prefix, got {:?}", other),
        }
        assert_eq!(err.kind(), FailureKind::Corrupt);
    }

    #[test]
    fn test_foreign_file_is_inconsistent_naming() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("sub-01");
        write_default_subject(&dir, "S");
        std::fs::write(dir.join("notes.txt"), "hello").unwrap();

        let err = SubjectQc::load(&dir).unwrap_err();
        assert!(matches!(
            err,
            LoadError::InconsistentNaming { ref file, .. } if file == "notes.txt"
        ));
    }

    #[test]
    fn test_missing_table_fails_rename() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("sub-01");
        write_default_subject(&dir, "S");
        std::fs::remove_file(dir.join("S.confidence.csv")).unwrap();

        let err = SubjectQc::load(&dir).unwrap_err();
        assert!(matches!(
            err,
            LoadError::MissingTable {
                stem: CONFIDENCE_STEM
            }
        ));
        assert_eq!(err.kind(), FailureKind::Missing);
    }

    #[test]
    fn test_table_with_wrong_width_fails_rename() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("sub-01");
        write_default_subject(&dir, "S");
        std::fs::write(dir.join("S.QC.csv"), "a,b,c,d\n0,1,1000,x\n").unwrap();

        let err = SubjectQc::load(&dir).unwrap_err();
        match &err {
            LoadError::Table {
                stem,
                source: TableError::ColumnCount { expected, found },
            } => {
                assert_eq!(stem, QC_STEM);
                assert_eq!((*expected, *found), (3, 4));
            }
            other => panic!("expected column count error, got {:?}", other),
        }
        assert_eq!(err.kind(), FailureKind::Corrupt);
    }

    #[test]
    fn test_missing_array_fails() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("sub-01");
        write_default_subject(&dir, "S");
        std::fs::remove_file(dir.join("S.KLdiv.npy")).unwrap();

        let err = SubjectQc::load(&dir).unwrap_err();
        assert!(matches!(
            err,
            LoadError::MissingArray {
                stem: KL_DIVERGENCE_STEM
            }
        ));
    }

    #[test]
    fn test_corrupt_array_is_classified_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("sub-01");
        write_default_subject(&dir, "S");
        std::fs::write(dir.join("S.QC.npy"), b"not an array").unwrap();

        let err = SubjectQc::load(&dir).unwrap_err();
        assert!(matches!(err, LoadError::Npy { .. }));
        assert_eq!(err.kind(), FailureKind::Corrupt);

        let failure = LoadFailure::from(&err);
        assert_eq!(failure.kind, FailureKind::Corrupt);
        assert!(failure.message.contains("S.QC.npy"));
    }

    #[test]
    fn test_custom_raw_extension() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("sub-01");
        write_default_subject(&dir, "S");
        std::fs::rename(dir.join("S.raw"), dir.join("S.nhdr")).unwrap();

        assert!(SubjectQc::load(&dir).is_err());
        let subject = SubjectQc::load_with_extension(&dir, "nhdr").unwrap();
        assert!(subject.path("nhdr").is_some());
    }
}
