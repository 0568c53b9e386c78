//! Report generation module.
//!
//! Renders the study report as Markdown or JSON, and the registry as a
//! plain-text table for the terminal.

pub mod generator;

pub use generator::*;
