//! dwiqc - study-level summaries of Slicer DiffusionQC outputs.
//!
//! Every subject directory of a QC study holds one `.raw` marker file and a
//! set of siblings sharing its prefix (`KLdiv.npy`, `QC.npy`,
//! `confidence.npy`, `QC.csv`, `confidence.csv`). [`qc::QcStudy`] loads each
//! subject, keeps failures as typed outcomes, and stacks the registered
//! subjects' arrays along a trailing subject axis. [`analysis`] derives the
//! summary views and [`report`] renders them.

pub mod analysis;
pub mod cli;
pub mod codec;
pub mod config;
pub mod models;
pub mod qc;
pub mod report;

#[cfg(test)]
mod testutil;
