//! dwiqc - study-level summaries of Slicer DiffusionQC outputs
//!
//! A CLI tool that scans a QC study directory, registers every subject whose
//! outputs load, stacks the registered subjects' arrays and writes a Markdown
//! or JSON report.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (missing study, config, stacking failure, etc.)
//!   2 - Unregistered subjects found with --fail-on-unregistered

use anyhow::{Context, Result};
use chrono::Utc;
use dwiqc::analysis;
use dwiqc::cli::{Args, OutputFormat};
use dwiqc::config::{Config, CONFIG_FILE_NAME};
use dwiqc::models::{AggregateSummary, Report, ReportMetadata, RegistrySummary};
use dwiqc::qc::{list_subject_dirs, DwiLayout, QcStudy, ScanOptions, StudyArrays};
use dwiqc::report;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Load configuration before logging so `[general] verbose` applies
    let (config, config_source) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config, args.quiet);

    info!("dwiqc v{}", env!("CARGO_PKG_VERSION"));
    info!("{}", config_source);
    debug!("Arguments: {:?}", args);

    match run(args, config) {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .dwiqc.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to customize scan order, raw-data layout and report output.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
///
/// `RUST_LOG` takes precedence over `-v`/`-q` and the config file when set.
fn init_logging(config: &Config, quiet: bool) {
    let level = config.log_level(quiet);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Warning: a tracing subscriber was already installed");
    }
}

/// Run the complete scan and report workflow. Returns the exit code.
fn run(args: Args, config: Config) -> Result<i32> {
    let start_time = Instant::now();

    let study_dir = args.study_dir();

    // Handle --dry-run: list subjects and exit
    if args.dry_run {
        return handle_dry_run(&study_dir, config.scan.sorted);
    }

    // Step 1: Scan and register subjects
    println!("🔍 Scanning study: {}", study_dir.display());
    let options = ScanOptions {
        show_progress: !args.quiet,
        ..ScanOptions::from(&config.scan)
    };
    let mut study = QcStudy::scan(&study_dir, &options)
        .with_context(|| format!("Failed to scan study {}", study_dir.display()))?;

    // Step 2: Cross-reference the raw-data tree for unregistered subjects
    if let Some(ref raw_dir) = args.raw_dir {
        let layout = DwiLayout::from(&config.diagnostics);
        let diagnosed = study.failure_info(raw_dir, &layout);
        info!("Diagnosed {} unregistered subjects", diagnosed);
    }

    // Step 3: Stack registered subjects
    let (aggregate, aggregate_error) = match study.collect_arrays() {
        Ok(arrays) => (Some(build_aggregate(&arrays)), None),
        Err(e) => {
            error!("Could not stack registered subjects: {}", e);
            (None, Some(e.to_string()))
        }
    };

    // Step 4: Optional single-subject map
    let subject_heatmap = match args.subject {
        Some(ref subject) => {
            let map = study
                .kl_divergence_for_subject(subject)
                .with_context(|| format!("Cannot show KL divergence for {}", subject))?;
            let heatmap = analysis::subject_heatmap(subject, map);
            if heatmap.is_none() {
                warn!(
                    "KL divergence of {} has shape {:?}; only 2D maps are shown",
                    subject,
                    map.shape()
                );
            }
            heatmap
        }
        None => None,
    };

    // Step 5: Build the report
    let registry = study.registration_table();
    let summary = RegistrySummary::from_rows(&registry);
    let duration = start_time.elapsed().as_secs_f64();

    let metadata = ReportMetadata {
        study_dir: study.root().to_path_buf(),
        raw_dir: args.raw_dir.clone(),
        analysis_date: Utc::now(),
        subjects_scanned: study.len(),
        subjects_registered: study.registered_count(),
        duration_seconds: duration,
    };

    let report = Report {
        metadata,
        registry,
        summary: summary.clone(),
        aggregate,
        aggregate_error,
        subject_heatmap,
    };

    // Step 6: Generate and save the report
    let output_path = output_path(&args, &config);
    let output = report::render_report(&report, args.format, &config.report)?;
    std::fs::write(&output_path, &output)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    // Print the registry and summary
    if !args.quiet {
        println!("\n{}", report::generate_registry_table(&report.registry));
        println!("📊 Registration Summary:");
        println!(
            "   Registered: {} of {} subjects",
            summary.registered, summary.total
        );
        println!(
            "   - 🟡 Missing: {} | 🔴 Corrupt: {} | 🟠 I/O: {}",
            summary.missing, summary.corrupt, summary.io
        );
        println!("   Duration: {:.1}s", duration);
    }
    println!("\n✅ Report saved to: {}", output_path.display());

    if let Some(ref e) = report.aggregate_error {
        eprintln!("\n⛔ Aggregation failed: {}", e);
        return Ok(1);
    }

    if args.fail_on_unregistered && summary.unregistered > 0 {
        eprintln!(
            "\n⛔ {} subjects could not be registered. Failing (exit code 2).",
            summary.unregistered
        );
        return Ok(2);
    }

    Ok(0)
}

/// Compute every study-wide view from the stacked arrays.
fn build_aggregate(arrays: &StudyArrays) -> AggregateSummary {
    let overlay = match analysis::qc_confidence_overlay(arrays) {
        Ok(overlay) => Some(overlay),
        Err(e) => {
            warn!("Skipping QC/confidence overlay: {}", e);
            None
        }
    };

    AggregateSummary {
        subjects: arrays.subjects.clone(),
        kl_divergence_shape: arrays.kl_divergence.shape().to_vec(),
        qc_shape: arrays.qc.shape().to_vec(),
        confidence_shape: arrays.confidence.shape().to_vec(),
        mean_kl_divergence: analysis::mean_kl_heatmap(arrays),
        overlay,
        volume_counts: analysis::volume_counts(arrays),
    }
}

/// Handle --dry-run: list the subject directories that would be loaded.
fn handle_dry_run(study_dir: &Path, sorted: bool) -> Result<i32> {
    println!("\n🔍 Dry run: listing subjects (nothing is loaded)...\n");

    let subjects = list_subject_dirs(study_dir, sorted)
        .with_context(|| format!("Failed to list {}", study_dir.display()))?;

    if subjects.is_empty() {
        println!("   No subject directories found.");
    } else {
        println!("   Found {} subject directories:\n", subjects.len());
        for subject in &subjects {
            println!("     📁 {}", subject.display());
        }
        println!("\n   Total: {} subjects", subjects.len());
    }

    println!("\n✅ Dry run complete.");
    Ok(0)
}

/// Report path: explicit `-o` or config wins; the default name follows `--format`.
fn output_path(args: &Args, config: &Config) -> PathBuf {
    let path = PathBuf::from(&config.general.output);
    if args.output.is_none()
        && args.format == OutputFormat::Json
        && path.extension().is_some_and(|ext| ext == "md")
    {
        return path.with_extension("json");
    }
    path
}

/// Load configuration from file or use defaults, then apply CLI overrides.
///
/// Runs before logging is set up, so it returns a description of where the
/// configuration came from for the caller to log.
fn load_config(args: &Args) -> Result<(Config, String)> {
    let (mut config, source) = if let Some(ref config_path) = args.config {
        // Explicit config path
        (
            Config::load(config_path)?,
            format!("Loaded config from: {}", config_path.display()),
        )
    } else {
        // Try default location
        match Config::load_default() {
            Ok(Some(config)) => (
                config,
                format!("Loaded default config from {}", CONFIG_FILE_NAME),
            ),
            Ok(None) => (
                Config::default(),
                "No config file found, using defaults".to_string(),
            ),
            Err(e) => {
                eprintln!("⚠️  Failed to load config: {:#}", e);
                (Config::default(), "Using default config".to_string())
            }
        }
    };

    config.merge_with_args(args);
    Ok((config, source))
}
