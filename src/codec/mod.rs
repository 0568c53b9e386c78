//! Readers for the file formats found in QC and raw-data trees.

pub mod nifti;
pub mod npy;
pub mod table;

pub use nifti::{read_shape, NiftiError, VolumeShape};
pub use npy::{read_npy, NpyError};
pub use table::{Table, TableError};
