//! The CSV linking catalog rows to their embeddings.

use crate::atomic;
use crate::config::ReferenceMode;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const HEADER_INLINE: [&str; 5] = ["Sr No.", "Name", "ID", "Image Path", "Embedding"];
const HEADER_PATH: [&str; 5] = ["Sr No.", "Name", "ID", "Image Path", "Embedding Path"];

#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingRef {
    Inline(Vec<f32>),
    Path(PathBuf),
}

impl EmbeddingRef {
    fn mode(&self) -> ReferenceMode {
        match self {
            EmbeddingRef::Inline(_) => ReferenceMode::Inline,
            EmbeddingRef::Path(_) => ReferenceMode::Path,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub serial: String,
    pub display_name: String,
    pub person_id: String,
    pub image_ref: String,
    pub embedding: EmbeddingRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ManifestOutcome {
    /// No successful records; nothing was written.
    Empty,
    Written { path: PathBuf, rows: usize, fallback: bool },
}

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("manifest is in {expected} mode, entry uses {found} mode")]
    ModeMismatch { expected: ReferenceMode, found: ReferenceMode },
    #[error("cannot encode manifest row: {0}")]
    Csv(#[from] csv::Error),
    #[error("cannot encode inline embedding: {0}")]
    Json(#[from] serde_json::Error),
    #[error(
        "cannot write manifest to {} ({primary_error}) or fallback {} ({source})",
        primary.display(),
        fallback.display()
    )]
    Unwritable {
        primary: PathBuf,
        primary_error: std::io::Error,
        fallback: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Alternate output used when the primary path cannot be written:
/// `embeddings.csv` → `embeddings_fallback.csv`.
pub fn fallback_path(primary: &Path) -> PathBuf {
    let stem = primary
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "manifest".to_string());
    let name = match primary.extension() {
        Some(ext) => format!("{stem}_fallback.{}", ext.to_string_lossy()),
        None => format!("{stem}_fallback"),
    };
    primary.with_file_name(name)
}

pub struct ManifestWriter {
    mode: ReferenceMode,
    entries: Vec<ManifestEntry>,
}

impl ManifestWriter {
    pub fn new(mode: ReferenceMode) -> Self {
        Self { mode, entries: Vec::new() }
    }

    /// Append an entry. Rows are written in push order.
    pub fn push(&mut self, entry: ManifestEntry) -> Result<(), ManifestError> {
        let found = entry.embedding.mode();
        if found != self.mode {
            return Err(ManifestError::ModeMismatch { expected: self.mode, found });
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render header and rows as CSV bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ManifestError> {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        let header = match self.mode {
            ReferenceMode::Inline => HEADER_INLINE,
            ReferenceMode::Path => HEADER_PATH,
        };
        writer.write_record(header)?;

        for entry in &self.entries {
            let embedding = match &entry.embedding {
                EmbeddingRef::Inline(values) => serde_json::to_string(values)?,
                EmbeddingRef::Path(path) => path.to_string_lossy().into_owned(),
            };
            writer
                .write_record([
                    entry.serial.as_str(),
                    entry.display_name.as_str(),
                    entry.person_id.as_str(),
                    entry.image_ref.as_str(),
                    embedding.as_str(),
                ])?;
        }

        writer
            .into_inner()
            .map_err(|e| ManifestError::Csv(csv::Error::from(e.into_error())))
    }

    /// Write to `primary`, or once to its fallback name if that fails.
    pub fn write(&self, primary: &Path) -> Result<ManifestOutcome, ManifestError> {
        if self.entries.is_empty() {
            tracing::warn!("no embeddings were produced; manifest not written");
            return Ok(ManifestOutcome::Empty);
        }

        let bytes = self.encode()?;
        let rows = self.entries.len();

        let primary_error = match atomic::write_atomic(primary, &bytes) {
            Ok(()) => {
                tracing::info!(path = %primary.display(), rows, "manifest written");
                return Ok(ManifestOutcome::Written {
                    path: primary.to_path_buf(),
                    rows,
                    fallback: false,
                });
            }
            Err(e) => e,
        };

        let fallback = fallback_path(primary);
        tracing::warn!(
            path = %primary.display(),
            error = %primary_error,
            fallback = %fallback.display(),
            "manifest path not writable; trying fallback"
        );

        match atomic::write_atomic(&fallback, &bytes) {
            Ok(()) => {
                tracing::info!(path = %fallback.display(), rows, "manifest written to fallback");
                Ok(ManifestOutcome::Written { path: fallback, rows, fallback: true })
            }
            Err(source) => Err(ManifestError::Unwritable {
                primary: primary.to_path_buf(),
                primary_error,
                fallback,
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(serial: &str, embedding: EmbeddingRef) -> ManifestEntry {
        ManifestEntry {
            serial: serial.into(),
            display_name: format!("Name {serial}"),
            person_id: format!("P{serial}"),
            image_ref: format!("images/{serial}.jpg"),
            embedding,
        }
    }

    fn path_writer(n: usize) -> ManifestWriter {
        let mut w = ManifestWriter::new(ReferenceMode::Path);
        for i in 1..=n {
            let p = PathBuf::from(format!("emb/P{i}_{i}.npy"));
            w.push(entry(&i.to_string(), EmbeddingRef::Path(p))).unwrap();
        }
        w
    }

    #[test]
    fn test_fallback_path() {
        assert_eq!(
            fallback_path(Path::new("out/embeddings.csv")),
            PathBuf::from("out/embeddings_fallback.csv")
        );
        assert_eq!(fallback_path(Path::new("manifest")), PathBuf::from("manifest_fallback"));
    }

    #[test]
    fn test_path_mode_rows() {
        let text = String::from_utf8(path_writer(2).encode().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Sr No.,Name,ID,Image Path,Embedding Path");
        assert_eq!(lines[1], "1,Name 1,P1,images/1.jpg,emb/P1_1.npy");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_inline_mode_quotes_json_vector() {
        let mut w = ManifestWriter::new(ReferenceMode::Inline);
        w.push(entry("1", EmbeddingRef::Inline(vec![0.5, -0.25]))).unwrap();
        let text = String::from_utf8(w.encode().unwrap()).unwrap();
        assert!(text.starts_with("Sr No.,Name,ID,Image Path,Embedding\n"));
        assert!(text.contains("1,Name 1,P1,images/1.jpg,\"[0.5,-0.25]\""), "{text}");
    }

    #[test]
    fn test_mixed_modes_rejected() {
        let mut w = path_writer(1);
        let err = w.push(entry("2", EmbeddingRef::Inline(vec![1.0]))).unwrap_err();
        assert!(matches!(
            err,
            ManifestError::ModeMismatch {
                expected: ReferenceMode::Path,
                found: ReferenceMode::Inline
            }
        ));
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn test_encode_errors_keep_their_source() {
        let json = serde_json::from_str::<Vec<f32>>("[oops").unwrap_err();
        let err = ManifestError::from(json);
        assert!(matches!(err, ManifestError::Json(_)));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_empty_manifest_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.csv");
        let outcome = ManifestWriter::new(ReferenceMode::Path).write(&path).unwrap();
        assert_eq!(outcome, ManifestOutcome::Empty);
        assert!(!path.exists());
    }

    #[test]
    fn test_write_primary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.csv");
        let w = path_writer(2);
        let outcome = w.write(&path).unwrap();
        assert_eq!(
            outcome,
            ManifestOutcome::Written { path: path.clone(), rows: 2, fallback: false }
        );
        assert_eq!(std::fs::read(&path).unwrap(), w.encode().unwrap());
    }

    #[test]
    fn test_unwritable_primary_uses_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("embeddings.csv");
        std::fs::create_dir(&primary).unwrap();

        let w = path_writer(3);
        let outcome = w.write(&primary).unwrap();
        let fallback = dir.path().join("embeddings_fallback.csv");
        assert_eq!(
            outcome,
            ManifestOutcome::Written { path: fallback.clone(), rows: 3, fallback: true }
        );
        assert_eq!(std::fs::read(&fallback).unwrap(), w.encode().unwrap());
    }

    #[test]
    fn test_read_only_primary_file_uses_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("embeddings.csv");
        std::fs::write(&primary, b"previous run").unwrap();
        let mut perms = std::fs::metadata(&primary).unwrap().permissions();
        perms.set_readonly(true);
        std::fs::set_permissions(&primary, perms).unwrap();
        if std::fs::OpenOptions::new().write(true).open(&primary).is_ok() {
            // Privileged user: permission bits are not enforced.
            return;
        }

        let w = path_writer(2);
        let outcome = w.write(&primary).unwrap();
        let fallback = dir.path().join("embeddings_fallback.csv");
        assert_eq!(
            outcome,
            ManifestOutcome::Written { path: fallback.clone(), rows: 2, fallback: true }
        );
        assert_eq!(std::fs::read(&primary).unwrap(), b"previous run");
        assert_eq!(std::fs::read(&fallback).unwrap(), w.encode().unwrap());
    }

    #[test]
    fn test_both_unwritable_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("embeddings.csv");
        std::fs::create_dir(&primary).unwrap();
        std::fs::create_dir(dir.path().join("embeddings_fallback.csv")).unwrap();

        let err = path_writer(1).write(&primary).unwrap_err();
        assert!(matches!(err, ManifestError::Unwritable { .. }), "{err}");
    }
}
