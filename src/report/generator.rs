//! Markdown report generation.
//!
//! This module generates Markdown and JSON study reports from the registry
//! and the summary views, plus the plain-text registry table printed to the
//! terminal.

use crate::analysis::{CellStatus, Heatmap, QcOverlay, VolumeCounts};
use crate::cli::OutputFormat;
use crate::config::ReportConfig;
use crate::models::{
    AggregateSummary, FailureKind, RegistryRow, RegistrySummary, Report, ReportMetadata,
};
use anyhow::Result;

/// Render the report in the requested format.
pub fn render_report(
    report: &Report,
    format: OutputFormat,
    config: &ReportConfig,
) -> Result<String> {
    match format {
        OutputFormat::Json => generate_json_report(report),
        OutputFormat::Markdown => Ok(generate_markdown_report(report, config)),
    }
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report, config: &ReportConfig) -> String {
    let mut output = String::new();

    // Title
    output.push_str("# DWI QC Study Report\n\n");

    // Metadata section
    output.push_str(&generate_metadata_section(&report.metadata));

    // Table of contents
    output.push_str(&generate_table_of_contents(report, config));

    // Registration summary and table
    output.push_str(&generate_summary_section(&report.summary));
    output.push_str(&generate_registry_section(&report.registry));

    // Unregistered subjects
    output.push_str(&generate_failures_section(&report.registry));

    // Stacked arrays and views
    output.push_str(&generate_aggregate_section(
        report.aggregate.as_ref(),
        report.aggregate_error.as_deref(),
        config,
    ));

    // Single-subject map
    if config.include_heatmaps {
        if let Some(ref heatmap) = report.subject_heatmap {
            output.push_str("## Subject KL Divergence\n\n");
            output.push_str(&generate_heatmap_block(heatmap, config));
        }
    }

    // Footer
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Study Directory:** `{}`\n",
        metadata.study_dir.display()
    ));
    if let Some(ref raw_dir) = metadata.raw_dir {
        section.push_str(&format!("- **Raw Data:** `{}`\n", raw_dir.display()));
    }
    section.push_str(&format!(
        "- **Analysis Date:** {}\n",
        metadata.analysis_date.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Subjects Scanned:** {}\n",
        metadata.subjects_scanned
    ));
    section.push_str(&format!(
        "- **Subjects Registered:** {}\n",
        metadata.subjects_registered
    ));
    section.push_str(&format!(
        "- **Scan Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

/// Generate the table of contents.
fn generate_table_of_contents(report: &Report, config: &ReportConfig) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");
    toc.push_str("- [Summary](#summary)\n");
    toc.push_str("- [Registration](#registration)\n");

    if report.summary.unregistered > 0 {
        toc.push_str("- [Unregistered Subjects](#unregistered-subjects)\n");
    }

    toc.push_str("- [Aggregate](#aggregate)\n");

    if config.include_heatmaps && report.subject_heatmap.is_some() {
        toc.push_str("- [Subject KL Divergence](#subject-kl-divergence)\n");
    }

    toc.push('\n');

    toc
}

/// Generate the registration summary section.
fn generate_summary_section(summary: &RegistrySummary) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str(&format!(
        "| ✅ Registered | {} {} | {} {} | {} {} | **Total** |\n",
        FailureKind::Missing.emoji(),
        FailureKind::Missing,
        FailureKind::Corrupt.emoji(),
        FailureKind::Corrupt,
        FailureKind::Io.emoji(),
        FailureKind::Io,
    ));
    section.push_str("|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | **{}** |\n\n",
        summary.registered, summary.missing, summary.corrupt, summary.io, summary.total
    ));

    section
}

/// Generate the registration table section.
fn generate_registry_section(rows: &[RegistryRow]) -> String {
    let mut section = String::new();

    section.push_str("## Registration\n\n");

    if rows.is_empty() {
        section.push_str("No subject directories were found.\n\n");
        return section;
    }

    section.push_str("| Subject | Registered | Shape | Files |\n");
    section.push_str("|:---|:---:|:---|:---|\n");
    for row in rows {
        section.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            row.subject,
            row.registered,
            row.shape().unwrap_or(""),
            row.files().unwrap_or_default()
        ));
    }
    section.push('\n');

    section
}

/// Generate the section describing each unregistered subject.
fn generate_failures_section(rows: &[RegistryRow]) -> String {
    let failed: Vec<_> = rows.iter().filter(|r| r.registered == 0).collect();
    if failed.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Unregistered Subjects\n\n");

    for row in failed {
        match row.failure {
            Some(ref failure) => section.push_str(&format!(
                "- {} **{}** ({}): {}\n",
                failure.kind.emoji(),
                row.subject,
                failure.kind,
                failure.message
            )),
            None => section.push_str(&format!("- **{}**\n", row.subject)),
        }
        if let Some(ref diagnostic) = row.diagnostic {
            section.push_str(&format!("  - Raw data: {}\n", diagnostic));
        }
    }
    section.push('\n');

    section
}

/// Generate the aggregate section: stacked shapes, counts and heat-maps.
fn generate_aggregate_section(
    aggregate: Option<&AggregateSummary>,
    error: Option<&str>,
    config: &ReportConfig,
) -> String {
    let mut section = String::new();

    section.push_str("## Aggregate\n\n");

    let aggregate = match aggregate {
        Some(aggregate) => aggregate,
        None => {
            let reason = error.unwrap_or("no aggregate was computed");
            section.push_str(&format!("> ⛔ **Aggregation failed:** {}\n\n", reason));
            return section;
        }
    };

    section.push_str(&format!(
        "Stacked {} subjects along the last axis.\n\n",
        aggregate.subjects.len()
    ));
    section.push_str("| Array | Shape |\n");
    section.push_str("|:---|:---|\n");
    section.push_str(&format!(
        "| KL divergence | {} |\n",
        shape_text(&aggregate.kl_divergence_shape)
    ));
    section.push_str(&format!("| QC | {} |\n", shape_text(&aggregate.qc_shape)));
    section.push_str(&format!(
        "| Confidence | {} |\n\n",
        shape_text(&aggregate.confidence_shape)
    ));

    section.push_str(&generate_volume_counts_section(&aggregate.volume_counts));

    if config.include_heatmaps {
        if let Some(ref heatmap) = aggregate.mean_kl_divergence {
            section.push_str("### Average KL Divergence\n\n");
            section.push_str(&generate_heatmap_block(heatmap, config));
        }
        if let Some(ref overlay) = aggregate.overlay {
            section.push_str("### QC and Confidence\n\n");
            section.push_str(&generate_overlay_block(overlay, config));
        }
    }

    section
}

/// Generate the per-subject volume counts table.
fn generate_volume_counts_section(counts: &[VolumeCounts]) -> String {
    let mut section = String::new();

    section.push_str("### Volumes per Subject\n\n");
    section.push_str("| Subject | Failed Volumes | Low Confidence |\n");
    section.push_str("|:---|:---:|:---:|\n");
    for count in counts {
        section.push_str(&format!(
            "| {} | {} | {} |\n",
            count.subject, count.failed, count.low_confidence
        ));
    }
    section.push('\n');

    section
}

/// Render a heat-map as a Markdown table, rows first.
fn generate_heatmap_block(heatmap: &Heatmap, config: &ReportConfig) -> String {
    let mut block = String::new();
    let precision = config.precision;

    block.push_str(&format!("**{}**\n\n", heatmap.title));
    if let (Some(min), Some(max)) = (heatmap.min(), heatmap.max()) {
        block.push_str(&format!(
            "*Range: {:.*} to {:.*} | {} x {}*\n\n",
            precision,
            min,
            precision,
            max,
            heatmap.n_rows(),
            heatmap.n_cols()
        ));
    }

    block.push_str(&format!("| {} \\ {} |", heatmap.row_label, heatmap.col_label));
    for col in 0..heatmap.n_cols() {
        block.push_str(&format!(" {} |", col));
    }
    block.push('\n');
    block.push_str("|---:|");
    block.push_str(&"---:|".repeat(heatmap.n_cols()));
    block.push('\n');

    for (i, row) in heatmap.values.iter().take(config.max_heatmap_rows).enumerate() {
        block.push_str(&format!("| {} |", i));
        for value in row {
            block.push_str(&format!(" {:.*} |", precision, value));
        }
        block.push('\n');
    }
    block.push('\n');

    if heatmap.n_rows() > config.max_heatmap_rows {
        block.push_str(&format!(
            "*{} of {} rows shown.*\n\n",
            config.max_heatmap_rows,
            heatmap.n_rows()
        ));
    }

    block
}

/// Render the QC/confidence overlay as a character grid, one line per volume.
fn generate_overlay_block(overlay: &QcOverlay, config: &ReportConfig) -> String {
    let mut block = String::new();

    let statuses = [
        CellStatus::PassConfident,
        CellStatus::PassUnsure,
        CellStatus::FailConfident,
        CellStatus::FailUnsure,
    ];

    block.push_str("| Symbol | Meaning | Cells |\n");
    block.push_str("|:---:|:---|:---:|\n");
    for status in statuses {
        block.push_str(&format!(
            "| `{}` | {} | {} |\n",
            status.symbol(),
            status_label(status),
            overlay.count(status)
        ));
    }
    block.push('\n');

    block.push_str("Columns follow subject order: ");
    block.push_str(&overlay.subjects.join(", "));
    block.push_str("\n\n```\n");
    for (i, row) in overlay.cells.iter().take(config.max_heatmap_rows).enumerate() {
        let line: String = row.iter().map(CellStatus::symbol).collect();
        block.push_str(&format!("{:>4} {}\n", i, line));
    }
    block.push_str("```\n\n");

    if overlay.n_volumes() > config.max_heatmap_rows {
        block.push_str(&format!(
            "*{} of {} volumes shown.*\n\n",
            config.max_heatmap_rows,
            overlay.n_volumes()
        ));
    }

    block
}

fn status_label(status: CellStatus) -> &'static str {
    match status {
        CellStatus::PassConfident => "pass, confident",
        CellStatus::PassUnsure => "pass, not sure",
        CellStatus::FailConfident => "fail, confident",
        CellStatus::FailUnsure => "fail, not sure",
    }
}

/// Tuple-style shape text, e.g. `(70, 60, 12)`.
fn shape_text(shape: &[usize]) -> String {
    match shape {
        [single] => format!("({},)", single),
        dims => format!(
            "({})",
            dims.iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by dwiqc v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Plain-text registration table with aligned columns, one line per subject.
pub fn generate_registry_table(rows: &[RegistryRow]) -> String {
    let headers = ["subject", "registered", "shape", "files"];
    let cells: Vec<[String; 4]> = rows
        .iter()
        .map(|row| {
            [
                row.subject.clone(),
                row.registered.to_string(),
                row.shape().unwrap_or("").to_string(),
                row.files().unwrap_or_default(),
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut table = String::new();
    push_table_line(&mut table, &headers.map(str::to_string), &widths);
    for row in &cells {
        push_table_line(&mut table, row, &widths);
    }

    table
}

fn push_table_line(table: &mut String, cells: &[String; 4], widths: &[usize; 4]) {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
        .collect::<Vec<_>>()
        .join("  ");
    table.push_str(line.trim_end());
    table.push('\n');
}
