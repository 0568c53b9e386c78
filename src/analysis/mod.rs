//! Analysis modules.
//!
//! Study-wide views computed from the stacked QC arrays.

pub mod summary;

pub use summary::*;
