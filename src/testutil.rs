//! Fixture builders shared by the unit tests.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::path::Path;

/// Encode values as a version 1.0 NPY file.
///
/// Unknown dtypes produce a header with an empty payload.
pub fn npy_bytes(descr: &str, shape: &[usize], fortran_order: bool, values: &[f64]) -> Vec<u8> {
    let shape_text = match shape {
        [] => "()".to_string(),
        [single] => format!("({},)", single),
        dims => format!(
            "({})",
            dims.iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    let fortran = if fortran_order { "True" } else { "False" };
    let mut header = format!(
        "{{'descr': '{}', 'fortran_order': {}, 'shape': {}, }}",
        descr, fortran, shape_text
    );

    // Pad so the payload starts on a 64-byte boundary, as numpy does.
    let unpadded = 10 + header.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let mut bytes = b"\x93NUMPY\x01\x00".to_vec();
    bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
    bytes.extend_from_slice(header.as_bytes());

    let big_endian = descr.starts_with('>');
    for &value in values {
        let mut word: Vec<u8> = match &descr[1..] {
            "f8" => value.to_le_bytes().to_vec(),
            "f4" => (value as f32).to_le_bytes().to_vec(),
            "i8" => (value as i64).to_le_bytes().to_vec(),
            "i4" => (value as i32).to_le_bytes().to_vec(),
            "u1" => vec![value as u8],
            "b1" => vec![u8::from(value != 0.0)],
            _ => Vec::new(),
        };
        if big_endian {
            word.reverse();
        }
        bytes.extend_from_slice(&word);
    }

    bytes
}

/// Write a little-endian `<f8` NPY file.
pub fn write_npy(path: &Path, shape: &[usize], values: &[f64]) {
    std::fs::write(path, npy_bytes("<f8", shape, false, values)).unwrap();
}

/// Build a 348-byte NIfTI-1 header with the given dimensions.
pub fn nifti1_header(dims: &[i16], big_endian: bool) -> Vec<u8> {
    let mut header = vec![0u8; 348];
    let put = |value: i32| {
        if big_endian {
            value.to_be_bytes()
        } else {
            value.to_le_bytes()
        }
    };
    header[0..4].copy_from_slice(&put(348));

    let mut dim = [1i16; 8];
    dim[0] = dims.len() as i16;
    dim[1..=dims.len()].copy_from_slice(dims);
    for (i, d) in dim.iter().enumerate() {
        let bytes = if big_endian {
            d.to_be_bytes()
        } else {
            d.to_le_bytes()
        };
        header[40 + 2 * i..42 + 2 * i].copy_from_slice(&bytes);
    }

    header[344..348].copy_from_slice(b"n+1\0");
    header
}

/// Build a 540-byte little-endian NIfTI-2 header with the given dimensions.
pub fn nifti2_header(dims: &[i64]) -> Vec<u8> {
    let mut header = vec![0u8; 540];
    header[0..4].copy_from_slice(&540i32.to_le_bytes());
    header[4..12].copy_from_slice(b"n+2\0\r\n\x1a\n");

    let mut dim = [1i64; 8];
    dim[0] = dims.len() as i64;
    dim[1..=dims.len()].copy_from_slice(dims);
    for (i, d) in dim.iter().enumerate() {
        header[16 + 8 * i..24 + 8 * i].copy_from_slice(&d.to_le_bytes());
    }

    header
}

/// Gzip `bytes` into `path`.
pub fn write_gzip(path: &Path, bytes: &[u8]) {
    let file = std::fs::File::create(path).unwrap();
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap();
}

/// Populate a subject directory with the five standard QC outputs.
///
/// `kl` is a volumes x slices map; `qc` and `confidence` are per-volume flags.
pub fn write_subject(
    dir: &Path,
    prefix: &str,
    kl: (&[usize], &[f64]),
    qc: &[f64],
    confidence: &[f64],
) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join(format!("{prefix}.raw")), b"").unwrap();
    write_npy(&dir.join(format!("{prefix}.KLdiv.npy")), kl.0, kl.1);
    write_npy(&dir.join(format!("{prefix}.QC.npy")), &[qc.len()], qc);
    write_npy(
        &dir.join(format!("{prefix}.confidence.npy")),
        &[confidence.len()],
        confidence,
    );

    let mut qc_csv = String::from("Unnamed: 0,0,0.1\n");
    for (i, v) in qc.iter().enumerate() {
        qc_csv.push_str(&format!("{},{},1000\n", i, v));
    }
    std::fs::write(dir.join(format!("{prefix}.QC.csv")), qc_csv).unwrap();

    let mut conf_csv = String::from("g,s,b\n");
    for (i, v) in confidence.iter().enumerate() {
        conf_csv.push_str(&format!("{},{},1000\n", i, v));
    }
    std::fs::write(dir.join(format!("{prefix}.confidence.csv")), conf_csv).unwrap();
}

/// A standard two-volume, three-slice subject.
pub fn write_default_subject(dir: &Path, prefix: &str) {
    write_subject(
        dir,
        prefix,
        (&[2, 3], &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]),
        &[1.0, 0.0],
        &[1.0, 1.0],
    );
}
