//! Combined archive: every embedding of a run in one keyed file.
//!
//! Layout (little-endian):
//!
//! ```text
//! magic "FBAR" | version u16 | dim u32 | count u32
//! count × ( key_len u32 | key utf-8 | dim × f32 )
//! sha256 of everything above (32 bytes)
//! ```
//!
//! Entries are written in key order so identical runs produce identical bytes.

use crate::atomic;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

pub const ARCHIVE_MAGIC: [u8; 4] = *b"FBAR";
pub const ARCHIVE_VERSION: u16 = 1;
const CHECKSUM_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("archive io: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a combined archive (bad magic)")]
    BadMagic,
    #[error("unsupported archive version {0}")]
    UnsupportedVersion(u16),
    #[error("archive checksum mismatch")]
    ChecksumMismatch,
    #[error("archive truncated at {0}")]
    Truncated(&'static str),
    #[error("entry {key:?} has {actual} values, archive dimension is {expected}")]
    DimensionMismatch { key: String, expected: usize, actual: usize },
    #[error("archive key is not UTF-8")]
    BadKey,
    #[error("{0} does not fit in a u32 field")]
    TooLarge(&'static str),
}

/// Decoded archive contents.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedArchive {
    pub dim: usize,
    pub entries: BTreeMap<String, Vec<f32>>,
}

fn put_u32(out: &mut Vec<u8>, value: usize, field: &'static str) -> Result<(), ArchiveError> {
    let v = u32::try_from(value).map_err(|_| ArchiveError::TooLarge(field))?;
    out.extend_from_slice(&v.to_le_bytes());
    Ok(())
}

/// Serialize `entries`; every vector must have length `dim`.
pub fn encode<'a, I>(dim: usize, entries: I) -> Result<Vec<u8>, ArchiveError>
where
    I: IntoIterator<Item = (&'a String, &'a [f32])>,
    I::IntoIter: ExactSizeIterator,
{
    let entries = entries.into_iter();
    let mut out = Vec::new();
    out.extend_from_slice(&ARCHIVE_MAGIC);
    out.extend_from_slice(&ARCHIVE_VERSION.to_le_bytes());
    put_u32(&mut out, dim, "dimension")?;
    put_u32(&mut out, entries.len(), "entry count")?;

    for (key, values) in entries {
        if values.len() != dim {
            return Err(ArchiveError::DimensionMismatch {
                key: key.clone(),
                expected: dim,
                actual: values.len(),
            });
        }
        put_u32(&mut out, key.len(), "key length")?;
        out.extend_from_slice(key.as_bytes());
        for value in values {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }

    let checksum = Sha256::digest(&out);
    out.extend_from_slice(&checksum);
    Ok(out)
}

/// Atomically write an archive to `path`.
pub fn write<'a, I>(path: &Path, dim: usize, entries: I) -> Result<(), ArchiveError>
where
    I: IntoIterator<Item = (&'a String, &'a [f32])>,
    I::IntoIter: ExactSizeIterator,
{
    let bytes = encode(dim, entries)?;
    atomic::write_atomic(path, &bytes)?;
    Ok(())
}

pub fn read(path: &Path) -> Result<CombinedArchive, ArchiveError> {
    decode(&std::fs::read(path)?)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], ArchiveError> {
        let end = self.pos.checked_add(n).ok_or(ArchiveError::Truncated(what))?;
        let slice = self.bytes.get(self.pos..end).ok_or(ArchiveError::Truncated(what))?;
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self, what: &'static str) -> Result<usize, ArchiveError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
    }
}

pub fn decode(bytes: &[u8]) -> Result<CombinedArchive, ArchiveError> {
    if bytes.len() < ARCHIVE_MAGIC.len() || bytes[..4] != ARCHIVE_MAGIC {
        return Err(ArchiveError::BadMagic);
    }
    if bytes.len() < CHECKSUM_LEN + 14 {
        return Err(ArchiveError::Truncated("header"));
    }

    let (body, trailer) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    if Sha256::digest(body).as_slice() != trailer {
        return Err(ArchiveError::ChecksumMismatch);
    }

    let mut cur = Cursor { bytes: body, pos: ARCHIVE_MAGIC.len() };
    let version = {
        let b = cur.take(2, "version")?;
        u16::from_le_bytes([b[0], b[1]])
    };
    if version != ARCHIVE_VERSION {
        return Err(ArchiveError::UnsupportedVersion(version));
    }

    let dim = cur.u32("dimension")?;
    let count = cur.u32("entry count")?;

    let vector_len = dim.checked_mul(4).ok_or(ArchiveError::TooLarge("dimension"))?;
    let mut entries = BTreeMap::new();
    for _ in 0..count {
        let key_len = cur.u32("key length")?;
        let key = std::str::from_utf8(cur.take(key_len, "key")?)
            .map_err(|_| ArchiveError::BadKey)?
            .to_string();
        let raw = cur.take(vector_len, "vector")?;
        let values = raw
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        entries.insert(key, values);
    }

    if cur.pos != body.len() {
        return Err(ArchiveError::Truncated("trailing bytes before checksum"));
    }

    Ok(CombinedArchive { dim, entries })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BTreeMap<String, Vec<f32>> {
        BTreeMap::from([
            ("P1_ada".to_string(), vec![0.6, 0.8]),
            ("P2_bob".to_string(), vec![1.0, 0.0]),
        ])
    }

    fn encode_map(dim: usize, map: &BTreeMap<String, Vec<f32>>) -> Result<Vec<u8>, ArchiveError> {
        encode(dim, map.iter().map(|(k, v)| (k, v.as_slice())))
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("all.fbar");
        let map = sample();
        write(&path, 2, map.iter().map(|(k, v)| (k, v.as_slice()))).unwrap();

        let archive = read(&path).unwrap();
        assert_eq!(archive.dim, 2);
        assert_eq!(archive.entries, map);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        assert_eq!(encode_map(2, &sample()).unwrap(), encode_map(2, &sample()).unwrap());
    }

    #[test]
    fn test_flipped_bit_fails_checksum() {
        let mut bytes = encode_map(2, &sample()).unwrap();
        bytes[20] ^= 0x01;
        assert!(matches!(decode(&bytes), Err(ArchiveError::ChecksumMismatch)));
    }

    #[test]
    fn test_wrong_dimension_rejected_on_encode() {
        let mut map = sample();
        map.insert("P3_cy".into(), vec![1.0, 0.0, 0.0]);
        let err = encode_map(2, &map).unwrap_err();
        assert!(matches!(err, ArchiveError::DimensionMismatch { actual: 3, .. }), "{err}");
    }

    #[test]
    fn test_not_an_archive() {
        assert!(matches!(decode(b"\x93NUMPY...."), Err(ArchiveError::BadMagic)));
    }

    #[test]
    fn test_empty_archive_is_valid() {
        let bytes = encode_map(512, &BTreeMap::new()).unwrap();
        let archive = decode(&bytes).unwrap();
        assert_eq!(archive.dim, 512);
        assert!(archive.entries.is_empty());
    }
}
