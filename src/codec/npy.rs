//! NumPy `.npy` decoding.
//!
//! Reads the array files written by `numpy.save` into `ndarray::ArrayD<f64>`.
//! Every supported numeric dtype is widened to `f64`; the QC pipeline only
//! writes small float, integer and boolean arrays, so the widening is lossless
//! for the values it produces.

use ndarray::{ArrayD, IxDyn, ShapeBuilder};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

const MAGIC: &[u8] = b"\x93NUMPY";

/// Errors raised while decoding an NPY file.
#[derive(Debug, Error)]
pub enum NpyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not an NPY file (bad magic string)")]
    BadMagic,

    #[error("unsupported NPY format version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },

    #[error("malformed NPY header: {0}")]
    Header(String),

    #[error("unsupported dtype '{0}'")]
    UnsupportedDtype(String),

    #[error("payload truncated: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },

    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Float,
    Int,
    Uint,
    Bool,
}

/// Element type parsed from the `descr` header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Dtype {
    kind: Kind,
    size: usize,
    big_endian: bool,
}

impl Dtype {
    fn parse(descr: &str) -> Result<Self, NpyError> {
        let unsupported = || NpyError::UnsupportedDtype(descr.to_string());

        let mut chars = descr.chars();
        let order = chars.next().ok_or_else(unsupported)?;
        let big_endian = match order {
            '<' | '|' => false,
            '>' => true,
            '=' => cfg!(target_endian = "big"),
            _ => return Err(unsupported()),
        };

        let kind = match chars.next().ok_or_else(unsupported)? {
            'f' => Kind::Float,
            'i' => Kind::Int,
            'u' => Kind::Uint,
            'b' => Kind::Bool,
            _ => return Err(unsupported()),
        };

        let size: usize = chars.as_str().parse().map_err(|_| unsupported())?;

        let valid = match kind {
            Kind::Float => matches!(size, 4 | 8),
            Kind::Int | Kind::Uint => matches!(size, 1 | 2 | 4 | 8),
            Kind::Bool => size == 1,
        };
        if !valid {
            return Err(unsupported());
        }

        Ok(Self {
            kind,
            size,
            big_endian,
        })
    }

    fn decode(&self, bytes: &[u8]) -> f64 {
        match (self.kind, self.size) {
            (Kind::Bool, _) => {
                if bytes[0] != 0 {
                    1.0
                } else {
                    0.0
                }
            }
            (Kind::Float, 4) => f32::from_le_bytes(self.word(bytes)) as f64,
            (Kind::Float, _) => f64::from_le_bytes(self.word(bytes)),
            (Kind::Int, 1) => bytes[0] as i8 as f64,
            (Kind::Int, 2) => i16::from_le_bytes(self.word(bytes)) as f64,
            (Kind::Int, 4) => i32::from_le_bytes(self.word(bytes)) as f64,
            (Kind::Int, _) => i64::from_le_bytes(self.word(bytes)) as f64,
            (Kind::Uint, 1) => bytes[0] as f64,
            (Kind::Uint, 2) => u16::from_le_bytes(self.word(bytes)) as f64,
            (Kind::Uint, 4) => u32::from_le_bytes(self.word(bytes)) as f64,
            (Kind::Uint, _) => u64::from_le_bytes(self.word(bytes)) as f64,
        }
    }

    /// Copy one element into a little-endian word.
    fn word<const N: usize>(&self, bytes: &[u8]) -> [u8; N] {
        let mut word = [0u8; N];
        word.copy_from_slice(&bytes[..N]);
        if self.big_endian {
            word.reverse();
        }
        word
    }
}

/// Parsed header dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Header {
    dtype: Dtype,
    fortran_order: bool,
    shape: Vec<usize>,
}

/// Read and decode an NPY file from disk.
pub fn read_npy(path: &Path) -> Result<ArrayD<f64>, NpyError> {
    let bytes = std::fs::read(path)?;
    let array = decode_npy(&bytes)?;
    debug!("Decoded {} with shape {:?}", path.display(), array.shape());
    Ok(array)
}

/// Decode the bytes of an NPY file.
pub fn decode_npy(bytes: &[u8]) -> Result<ArrayD<f64>, NpyError> {
    if bytes.len() < MAGIC.len() + 2 || &bytes[..MAGIC.len()] != MAGIC {
        return Err(NpyError::BadMagic);
    }

    let major = bytes[MAGIC.len()];
    let minor = bytes[MAGIC.len() + 1];
    let after_version = MAGIC.len() + 2;

    let (header_len, header_start) = match major {
        1 => {
            let raw = bytes
                .get(after_version..after_version + 2)
                .ok_or_else(|| NpyError::Header("missing header length".to_string()))?;
            (u16::from_le_bytes([raw[0], raw[1]]) as usize, after_version + 2)
        }
        2 | 3 => {
            let raw = bytes
                .get(after_version..after_version + 4)
                .ok_or_else(|| NpyError::Header("missing header length".to_string()))?;
            (
                u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize,
                after_version + 4,
            )
        }
        _ => return Err(NpyError::UnsupportedVersion { major, minor }),
    };

    let header_bytes = bytes
        .get(header_start..header_start + header_len)
        .ok_or_else(|| NpyError::Header("header extends past end of file".to_string()))?;
    let header_text = std::str::from_utf8(header_bytes)
        .map_err(|_| NpyError::Header("header is not valid text".to_string()))?;
    let header = parse_header(header_text)?;

    let expected = header
        .shape
        .iter()
        .try_fold(header.dtype.size, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| NpyError::Header("shape overflows".to_string()))?;
    let payload = &bytes[header_start + header_len..];
    if payload.len() < expected {
        return Err(NpyError::Truncated {
            expected,
            found: payload.len(),
        });
    }

    let values: Vec<f64> = payload[..expected]
        .chunks_exact(header.dtype.size)
        .map(|chunk| header.dtype.decode(chunk))
        .collect();

    let shape = IxDyn(&header.shape);
    let array = if header.fortran_order {
        ArrayD::from_shape_vec(shape.f(), values)?
    } else {
        ArrayD::from_shape_vec(shape, values)?
    };

    Ok(array)
}

/// Parse the Python dict literal stored in the header, e.g.
/// `{'descr': '<f8', 'fortran_order': False, 'shape': (3, 4), }`.
fn parse_header(text: &str) -> Result<Header, NpyError> {
    let descr = quoted_value(header_field(text, "descr")?)?;
    let dtype = Dtype::parse(descr)?;

    let fortran_field = header_field(text, "fortran_order")?;
    let fortran_order = if fortran_field.starts_with("True") {
        true
    } else if fortran_field.starts_with("False") {
        false
    } else {
        return Err(NpyError::Header(format!(
            "invalid fortran_order value: {fortran_field}"
        )));
    };

    let shape_field = header_field(text, "shape")?;
    let shape = parse_shape(shape_field)?;

    Ok(Header {
        dtype,
        fortran_order,
        shape,
    })
}

/// Return the text following `'key':`, with leading whitespace removed.
fn header_field<'a>(text: &'a str, key: &str) -> Result<&'a str, NpyError> {
    let needle_single = format!("'{key}'");
    let needle_double = format!("\"{key}\"");
    let start = text
        .find(&needle_single)
        .map(|i| i + needle_single.len())
        .or_else(|| text.find(&needle_double).map(|i| i + needle_double.len()))
        .ok_or_else(|| NpyError::Header(format!("missing '{key}' field")))?;

    let rest = text[start..].trim_start();
    let rest = rest
        .strip_prefix(':')
        .ok_or_else(|| NpyError::Header(format!("expected ':' after '{key}'")))?;
    Ok(rest.trim_start())
}

fn quoted_value(field: &str) -> Result<&str, NpyError> {
    let quote = field
        .chars()
        .next()
        .filter(|c| *c == '\'' || *c == '"')
        .ok_or_else(|| NpyError::Header("expected quoted descr".to_string()))?;
    let body = &field[1..];
    let end = body
        .find(quote)
        .ok_or_else(|| NpyError::Header("unterminated descr string".to_string()))?;
    Ok(&body[..end])
}

fn parse_shape(field: &str) -> Result<Vec<usize>, NpyError> {
    let body = field
        .strip_prefix('(')
        .ok_or_else(|| NpyError::Header("shape is not a tuple".to_string()))?;
    let end = body
        .find(')')
        .ok_or_else(|| NpyError::Header("unterminated shape tuple".to_string()))?;

    body[..end]
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| {
            dim.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|_| NpyError::Header(format!("invalid dimension '{dim}'")))
        })
        .collect()
}
