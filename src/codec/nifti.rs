//! NIfTI header inspection.
//!
//! Failure diagnostics only need the dimensions of a subject's raw diffusion
//! volume, so only the header is read; voxel data is never decoded.

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

const NIFTI1_HEADER_SIZE: usize = 348;
const NIFTI2_HEADER_SIZE: usize = 540;

/// Errors raised while reading a NIfTI header.
#[derive(Debug, Error)]
pub enum NiftiError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("header too short: {0} bytes")]
    TooShort(usize),

    #[error("unrecognised header size field")]
    UnknownFormat,

    #[error("invalid dimension count {0}")]
    InvalidRank(i64),

    #[error("invalid extent {extent} on axis {axis}")]
    InvalidExtent { axis: usize, extent: i64 },
}

/// Volume dimensions as stored in `dim[1..=dim[0]]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeShape(pub Vec<usize>);

impl VolumeShape {
    pub fn dims(&self) -> &[usize] {
        &self.0
    }
}

impl fmt::Display for VolumeShape {
    /// Formats like a Python tuple: `(96, 96, 60, 70)` or `(5,)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [single] => write!(f, "({},)", single),
            dims => {
                let parts: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
                write!(f, "({})", parts.join(", "))
            }
        }
    }
}

/// Read the volume shape from a `.nii` or `.nii.gz` file.
pub fn read_shape(path: &Path) -> Result<VolumeShape, NiftiError> {
    let file = File::open(path)?;

    let is_gzip = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);

    let reader: Box<dyn Read> = if is_gzip {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut header = Vec::with_capacity(NIFTI2_HEADER_SIZE);
    reader
        .take(NIFTI2_HEADER_SIZE as u64)
        .read_to_end(&mut header)?;

    parse_shape(&header)
}

/// Parse the shape out of raw NIfTI-1 or NIfTI-2 header bytes.
pub fn parse_shape(header: &[u8]) -> Result<VolumeShape, NiftiError> {
    if header.len() < 4 {
        return Err(NiftiError::TooShort(header.len()));
    }

    let size_field = [header[0], header[1], header[2], header[3]];
    let (version, big_endian) = match (
        i32::from_le_bytes(size_field) as usize,
        i32::from_be_bytes(size_field) as usize,
    ) {
        (NIFTI1_HEADER_SIZE, _) => (1, false),
        (_, NIFTI1_HEADER_SIZE) => (1, true),
        (NIFTI2_HEADER_SIZE, _) => (2, false),
        (_, NIFTI2_HEADER_SIZE) => (2, true),
        _ => return Err(NiftiError::UnknownFormat),
    };

    let dims: Vec<i64> = if version == 1 {
        if header.len() < NIFTI1_HEADER_SIZE {
            return Err(NiftiError::TooShort(header.len()));
        }
        // dim[8] as int16 at offset 40
        header[40..56]
            .chunks_exact(2)
            .map(|b| {
                let word = [b[0], b[1]];
                if big_endian {
                    i16::from_be_bytes(word) as i64
                } else {
                    i16::from_le_bytes(word) as i64
                }
            })
            .collect()
    } else {
        if header.len() < NIFTI2_HEADER_SIZE {
            return Err(NiftiError::TooShort(header.len()));
        }
        // dim[8] as int64 at offset 16
        header[16..80]
            .chunks_exact(8)
            .map(|b| {
                let mut word = [0u8; 8];
                word.copy_from_slice(b);
                if big_endian {
                    i64::from_be_bytes(word)
                } else {
                    i64::from_le_bytes(word)
                }
            })
            .collect()
    };

    let rank = dims[0];
    if !(1..=7).contains(&rank) {
        return Err(NiftiError::InvalidRank(rank));
    }

    let extents = dims[1..=rank as usize]
        .iter()
        .enumerate()
        .map(|(i, &extent)| {
            usize::try_from(extent).map_err(|_| NiftiError::InvalidExtent {
                axis: i + 1,
                extent,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(VolumeShape(extents))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{nifti1_header, nifti2_header, write_gzip};
    use tempfile::TempDir;

    #[test]
    fn test_shape_display_matches_tuple_format() {
        assert_eq!(VolumeShape(vec![96, 96, 60, 70]).to_string(), "(96, 96, 60, 70)");
        assert_eq!(VolumeShape(vec![5]).to_string(), "(5,)");
    }

    #[test]
    fn test_parse_nifti1_header() {
        let header = nifti1_header(&[96, 96, 60, 70], false);
        let shape = parse_shape(&header).unwrap();
        assert_eq!(shape.dims(), &[96, 96, 60, 70]);
    }

    #[test]
    fn test_parse_big_endian_nifti1_header() {
        let header = nifti1_header(&[64, 64, 32], true);
        let shape = parse_shape(&header).unwrap();
        assert_eq!(shape.dims(), &[64, 64, 32]);
    }

    #[test]
    fn test_parse_nifti2_header() {
        let header = nifti2_header(&[128, 128, 80, 33]);
        let shape = parse_shape(&header).unwrap();
        assert_eq!(shape.to_string(), "(128, 128, 80, 33)");
    }

    #[test]
    fn test_read_gzipped_volume() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sub-01_dwi.nii.gz");

        let mut bytes = nifti1_header(&[10, 12, 8, 5], false);
        bytes.extend_from_slice(&[0u8; 4]);
        bytes.extend(std::iter::repeat(0u8).take(10 * 12 * 8 * 5 * 2));
        write_gzip(&path, &bytes);

        let shape = read_shape(&path).unwrap();
        assert_eq!(shape.to_string(), "(10, 12, 8, 5)");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            parse_shape(&[1, 2, 3, 4, 5, 6]),
            Err(NiftiError::UnknownFormat)
        ));
        assert!(matches!(parse_shape(&[1]), Err(NiftiError::TooShort(1))));
    }
}
