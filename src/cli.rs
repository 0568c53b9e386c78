//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// dwiqc - study-level summaries of Slicer DiffusionQC outputs
///
/// Scans a QC study directory (one subdirectory per subject), registers every
/// subject whose outputs load, stacks the registered subjects' arrays and
/// writes a Markdown or JSON report.
///
/// Examples:
///   dwiqc --study /data/qc/tokyo
///   dwiqc --study /data/qc/tokyo --raw-dir /data/raw/tokyo --format json -o qc.json
///   dwiqc --study /data/qc/tokyo --subject sub-0042
///   dwiqc --study /data/qc/tokyo --dry-run
///   dwiqc --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// QC study directory containing one subdirectory per subject
    #[arg(
        short,
        long,
        value_name = "DIR",
        env = "DWIQC_STUDY",
        required_unless_present = "init_config"
    )]
    pub study: Option<PathBuf>,

    /// Raw-data tree used to diagnose unregistered subjects
    ///
    /// Expected layout: <DIR>/<subject>/dwi/<subject>_dwi.nii.gz
    #[arg(long, value_name = "DIR")]
    pub raw_dir: Option<PathBuf>,

    /// Include the KL-divergence map of this subject in the report
    #[arg(long, value_name = "ID")]
    pub subject: Option<String>,

    /// Output file path for the report
    ///
    /// Defaults to the config file setting, or dwiqc_report.md
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .dwiqc.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Visit subjects in name order instead of filesystem order
    #[arg(long)]
    pub sorted: bool,

    /// Extension of the per-subject marker file (default: raw)
    #[arg(long, value_name = "EXT")]
    pub raw_extension: Option<String>,

    /// Leave heat-map grids out of the Markdown report
    #[arg(long)]
    pub no_heatmaps: bool,

    /// Exit with code 2 if any subject could not be registered
    #[arg(long)]
    pub fail_on_unregistered: bool,

    /// Dry run: list subject directories without loading them
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .dwiqc.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the study directory (should be validated first).
    pub fn study_dir(&self) -> PathBuf {
        self.study.clone().unwrap_or_default()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        // Validate study directory
        match self.study {
            None => return Err("A study directory is required (--study)".to_string()),
            Some(ref study) => {
                if !study.exists() {
                    return Err(format!(
                        "Study directory does not exist: {}",
                        study.display()
                    ));
                }
                if !study.is_dir() {
                    return Err(format!("Study path is not a directory: {}", study.display()));
                }
            }
        }

        // Validate raw directory if provided
        if let Some(ref raw_dir) = self.raw_dir {
            if !raw_dir.is_dir() {
                return Err(format!(
                    "Raw-data directory does not exist: {}",
                    raw_dir.display()
                ));
            }
        }

        if let Some(ref ext) = self.raw_extension {
            if ext.trim_start_matches('.').is_empty() {
                return Err("Raw extension must not be empty".to_string());
            }
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        Ok(())
    }
}
