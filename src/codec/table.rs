//! CSV tables.
//!
//! The QC pipeline writes small per-gradient tables with a header row. Cells
//! are kept as text; numeric columns are parsed on demand.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors raised while reading or reshaping a table.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("expected {expected} columns, found {found}")]
    ColumnCount { expected: usize, found: usize },

    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("column '{column}' row {row}: '{value}' is not a number")]
    NotNumeric {
        column: String,
        row: usize,
        value: String,
    },
}

impl TableError {
    /// Whether the failure came from the filesystem rather than the content.
    pub fn is_io(&self) -> bool {
        matches!(self, TableError::Csv(e) if matches!(e.kind(), csv::ErrorKind::Io(_)))
    }
}

/// A header-plus-rows text table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { columns, rows }
    }

    /// Read a CSV file whose first record is the header.
    pub fn read_csv(path: &Path) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)?;

        let columns: Vec<String> = reader.headers()?.iter().map(String::from).collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(String::from).collect());
        }

        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// Replace the column names. The new schema must have the same width.
    pub fn rename_columns(&mut self, names: &[&str]) -> Result<(), TableError> {
        if names.len() != self.columns.len() {
            return Err(TableError::ColumnCount {
                expected: names.len(),
                found: self.columns.len(),
            });
        }
        self.columns = names.iter().map(|n| n.to_string()).collect();
        Ok(())
    }

    /// Borrow the cells of one column.
    pub fn column(&self, name: &str) -> Result<Vec<&str>, TableError> {
        let idx = self
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| TableError::UnknownColumn(name.to_string()))?;

        Ok(self
            .rows
            .iter()
            .map(|row| row.get(idx).map(String::as_str).unwrap_or(""))
            .collect())
    }

    /// Parse one column as floating point values.
    pub fn column_f64(&self, name: &str) -> Result<Vec<f64>, TableError> {
        self.column(name)?
            .into_iter()
            .enumerate()
            .map(|(row, value)| {
                value
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| TableError::NotNumeric {
                        column: name.to_string(),
                        row,
                        value: value.to_string(),
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_table(content: &str) -> (TempDir, std::path::PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("table.csv");
        std::fs::write(&path, content).unwrap();
        (temp_dir, path)
    }

    #[test]
    fn test_read_csv() {
        let (_dir, path) = write_table("grad,qc,bval\n0,1,0\n1,0,1000\n2,1,1000\n");
        let table = Table::read_csv(&path).unwrap();

        assert_eq!(table.columns(), &["grad", "qc", "bval"]);
        assert_eq!(table.n_rows(), 3);
        assert_eq!(table.rows()[1], vec!["1", "0", "1000"]);
    }

    #[test]
    fn test_rename_columns() {
        let (_dir, path) = write_table("a,b,c\n0,1,0\n");
        let mut table = Table::read_csv(&path).unwrap();

        table.rename_columns(&["Gradient", "QC", "b value"]).unwrap();
        assert_eq!(table.columns(), &["Gradient", "QC", "b value"]);
        assert_eq!(table.column("b value").unwrap(), vec!["0"]);
    }

    #[test]
    fn test_rename_columns_rejects_width_mismatch() {
        let (_dir, path) = write_table("a,b\n0,1\n");
        let mut table = Table::read_csv(&path).unwrap();

        let result = table.rename_columns(&["Gradient", "QC", "b value"]);
        assert!(matches!(
            result,
            Err(TableError::ColumnCount {
                expected: 3,
                found: 2
            })
        ));
    }

    #[test]
    fn test_column_f64() {
        let table = Table::new(
            vec!["QC".to_string()],
            vec![vec!["1".to_string()], vec![" 0.5".to_string()]],
        );
        assert_eq!(table.column_f64("QC").unwrap(), vec![1.0, 0.5]);

        let bad = Table::new(vec!["QC".to_string()], vec![vec!["pass".to_string()]]);
        assert!(matches!(
            bad.column_f64("QC"),
            Err(TableError::NotNumeric { row: 0, .. })
        ));
        assert!(matches!(
            bad.column_f64("Sure"),
            Err(TableError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_missing_file_is_io() {
        let temp_dir = TempDir::new().unwrap();
        let err = Table::read_csv(&temp_dir.path().join("absent.csv")).unwrap_err();
        assert!(err.is_io());
    }
}
