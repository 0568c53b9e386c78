//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.dwiqc.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file name, looked up in the current directory.
pub const CONFIG_FILE_NAME: &str = ".dwiqc.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Study scan settings.
    #[serde(default)]
    pub scan: ScanConfig,

    /// Raw-data tree layout used for failure diagnostics.
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
        }
    }
}

fn default_output() -> String {
    "dwiqc_report.md".to_string()
}

/// Study scan settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Visit subject directories in name order instead of filesystem order.
    #[serde(default)]
    pub sorted: bool,

    /// Extension of the per-subject marker file that carries the naming prefix.
    #[serde(default = "default_raw_extension")]
    pub raw_extension: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            sorted: false,
            raw_extension: default_raw_extension(),
        }
    }
}

fn default_raw_extension() -> String {
    "raw".to_string()
}

/// Layout of the raw-data tree: `<root>/<subject>/<dwi_subdir>/<subject><dwi_suffix>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    #[serde(default = "default_dwi_subdir")]
    pub dwi_subdir: String,

    #[serde(default = "default_dwi_suffix")]
    pub dwi_suffix: String,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            dwi_subdir: default_dwi_subdir(),
            dwi_suffix: default_dwi_suffix(),
        }
    }
}

fn default_dwi_subdir() -> String {
    "dwi".to_string()
}

fn default_dwi_suffix() -> String {
    "_dwi.nii.gz".to_string()
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Include heat-map grids (mean KL map, overlay) in Markdown reports.
    #[serde(default = "default_true")]
    pub include_heatmaps: bool,

    /// Maximum heat-map rows rendered before truncating.
    #[serde(default = "default_max_heatmap_rows")]
    pub max_heatmap_rows: usize,

    /// Decimal places for heat-map values.
    #[serde(default = "default_precision")]
    pub precision: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            include_heatmaps: true,
            max_heatmap_rows: default_max_heatmap_rows(),
            precision: default_precision(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_heatmap_rows() -> usize {
    100
}

fn default_precision() -> usize {
    3
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }

        if args.sorted {
            self.scan.sorted = true;
        }
        if let Some(ref ext) = args.raw_extension {
            self.scan.raw_extension = ext.trim_start_matches('.').to_string();
        }

        if args.no_heatmaps {
            self.report.include_heatmaps = false;
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Log level after CLI merging: `quiet` wins, then `[general] verbose`.
    pub fn log_level(&self, quiet: bool) -> tracing::Level {
        if quiet {
            tracing::Level::ERROR
        } else if self.general.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
