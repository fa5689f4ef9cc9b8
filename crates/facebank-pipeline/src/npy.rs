//! Minimal NumPy `.npy` codec for 1-D little-endian `f32` arrays.
//!
//! Per-record artifacts use this format so they load with `numpy.load`.
//! Only what the pipeline writes is accepted back: `'<f4'`, C order, one axis.

use thiserror::Error;

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";
/// Magic + version + u16 header length.
const NPY_PREAMBLE_V1: usize = 10;
const NPY_ALIGN: usize = 64;

#[derive(Error, Debug, PartialEq)]
pub enum NpyError {
    #[error("not an npy file (bad magic)")]
    BadMagic,
    #[error("unsupported npy version {0}.{1}")]
    UnsupportedVersion(u8, u8),
    #[error("unsupported npy header: {0}")]
    BadHeader(String),
    #[error("npy payload is {actual} bytes, expected {expected}")]
    Truncated { expected: usize, actual: usize },
}

fn header_dict(dim: usize) -> String {
    format!("{{'descr': '<f4', 'fortran_order': False, 'shape': ({dim},), }}")
}

/// Full header (preamble + padded dict) for a vector of `dim` floats.
fn header(dim: usize) -> Vec<u8> {
    let dict = header_dict(dim);
    // dict + padding + '\n' must end on a 64-byte boundary.
    let unpadded = NPY_PREAMBLE_V1 + dict.len() + 1;
    let padding = (NPY_ALIGN - unpadded % NPY_ALIGN) % NPY_ALIGN;
    let header_len = dict.len() + padding + 1;

    let mut out = Vec::with_capacity(NPY_PREAMBLE_V1 + header_len);
    out.extend_from_slice(NPY_MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header_len as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out.resize(out.len() + padding, b' ');
    out.push(b'\n');
    out
}

/// Exact file size of an encoded vector of `dim` floats.
pub fn encoded_len(dim: usize) -> u64 {
    (header(dim).len() + dim * 4) as u64
}

pub fn encode(values: &[f32]) -> Vec<u8> {
    let mut out = header(values.len());
    out.reserve(values.len() * 4);
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode(bytes: &[u8]) -> Result<Vec<f32>, NpyError> {
    if bytes.len() < NPY_PREAMBLE_V1 || &bytes[..6] != NPY_MAGIC {
        return Err(NpyError::BadMagic);
    }

    let (header_len, data_start) = match (bytes[6], bytes[7]) {
        (1, 0) => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, NPY_PREAMBLE_V1),
        (2 | 3, 0) => {
            let raw = bytes.get(8..12).ok_or(NpyError::BadMagic)?;
            (u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize, 12)
        }
        (major, minor) => return Err(NpyError::UnsupportedVersion(major, minor)),
    };

    let header_end = data_start + header_len;
    let dict = bytes
        .get(data_start..header_end)
        .and_then(|h| std::str::from_utf8(h).ok())
        .ok_or_else(|| NpyError::BadHeader("header truncated or not UTF-8".into()))?;

    let dim = parse_dict(dict)?;
    let expected = dim
        .checked_mul(4)
        .ok_or_else(|| NpyError::BadHeader(format!("shape ({dim},) is too large")))?;
    let payload = &bytes[header_end..];
    if payload.len() != expected {
        return Err(NpyError::Truncated { expected, actual: payload.len() });
    }

    Ok(payload
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Validate the header dict and return its single dimension.
fn parse_dict(dict: &str) -> Result<usize, NpyError> {
    let compact: String = dict.chars().filter(|c| !c.is_whitespace()).collect();

    if !compact.contains("'descr':'<f4'") {
        return Err(NpyError::BadHeader(format!("dtype is not '<f4': {dict}")));
    }
    if !compact.contains("'fortran_order':False") {
        return Err(NpyError::BadHeader("fortran order is not supported".into()));
    }

    let shape = compact
        .split_once("'shape':(")
        .and_then(|(_, rest)| rest.split_once(')'))
        .map(|(inner, _)| inner)
        .ok_or_else(|| NpyError::BadHeader(format!("missing shape: {dict}")))?;

    let axes: Vec<&str> = shape.split(',').filter(|s| !s.is_empty()).collect();
    match axes.as_slice() {
        [dim] => dim
            .parse()
            .map_err(|_| NpyError::BadHeader(format!("bad shape entry {dim:?}"))),
        _ => Err(NpyError::BadHeader(format!("expected a 1-D array, shape ({shape})"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_aligned_and_newline_terminated() {
        for dim in [1, 3, 128, 512, 100_000] {
            let h = header(dim);
            assert_eq!(h.len() % NPY_ALIGN, 0, "dim {dim}");
            assert_eq!(h.last(), Some(&b'\n'));
        }
    }

    #[test]
    fn test_encoded_len_matches_encode() {
        let v = vec![0.25f32; 512];
        assert_eq!(encode(&v).len() as u64, encoded_len(512));
    }

    #[test]
    fn test_decode_restores_values() {
        let v = vec![1.0, -0.5, 0.125];
        assert_eq!(decode(&encode(&v)).unwrap(), v);
    }

    #[test]
    fn test_decode_numpy_written_header() {
        // Header as numpy.save writes it for np.zeros(2, dtype='<f4')
        let dict = "{'descr': '<f4', 'fortran_order': False, 'shape': (2,), }";
        let mut bytes = NPY_MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        let padded = format!("{dict:<117}\n");
        bytes.extend_from_slice(&(padded.len() as u16).to_le_bytes());
        bytes.extend_from_slice(padded.as_bytes());
        bytes.extend_from_slice(&[0u8; 8]);

        assert_eq!(decode(&bytes).unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_decode_rejects_truncated_payload() {
        let mut bytes = encode(&[1.0, 2.0]);
        bytes.pop();
        assert_eq!(decode(&bytes), Err(NpyError::Truncated { expected: 8, actual: 7 }));
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        assert_eq!(decode(b"PK\x03\x04 zip file"), Err(NpyError::BadMagic));
        assert_eq!(decode(b""), Err(NpyError::BadMagic));
    }

    #[test]
    fn test_decode_rejects_other_dtype() {
        let mut bytes = encode(&[1.0]);
        let at = bytes.windows(3).position(|w| w == b"<f4").unwrap();
        bytes[at + 2] = b'8';
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, NpyError::BadHeader(_)), "{err}");
    }

    #[test]
    fn test_decode_rejects_2d() {
        assert!(matches!(
            parse_dict("{'descr': '<f4', 'fortran_order': False, 'shape': (2, 3), }"),
            Err(NpyError::BadHeader(_))
        ));
    }
}
