//! Per-record `.npy` artifacts plus the in-memory map that
//! becomes the combined archive at the end of a run.

use crate::archive::{self, ArchiveError};
use crate::atomic;
use crate::npy::{self, NpyError};
use facebank_core::Embedding;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("embedding has {actual} values, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("artifact io at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt artifact {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: NpyError,
    },
    #[error("combined archive {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: ArchiveError,
    },
}

/// What the end-of-run archive flush produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub entries: usize,
}

pub struct ArtifactStore {
    dim: usize,
    /// Key order keeps the archive byte-identical across identical runs.
    combined: BTreeMap<String, Embedding>,
}

impl ArtifactStore {
    pub fn new(dim: usize) -> Self {
        Self { dim, combined: BTreeMap::new() }
    }

    pub fn len(&self) -> usize {
        self.combined.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combined.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Embedding> {
        self.combined.get(key)
    }

    fn check_dim(&self, actual: usize) -> Result<(), StoreError> {
        if actual == self.dim {
            Ok(())
        } else {
            Err(StoreError::DimensionMismatch { expected: self.dim, actual })
        }
    }

    /// Write a fresh artifact and add it to the combined map.
    ///
    /// The file appears at `path` only once fully written, so an interrupted
    /// run never leaves something the cache gate would accept.
    pub fn persist(
        &mut self,
        key: &str,
        path: &Path,
        embedding: &Embedding,
    ) -> Result<PathBuf, StoreError> {
        self.check_dim(embedding.dim())?;

        let bytes = npy::encode(&embedding.values);
        atomic::write_atomic(path, &bytes).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::debug!(key, path = %path.display(), "artifact written");
        self.combined.insert(key.to_string(), embedding.clone());
        Ok(path.to_path_buf())
    }

    /// Read back a cached artifact and add it to the combined map.
    pub fn load(&mut self, key: &str, path: &Path) -> Result<Embedding, StoreError> {
        let bytes = std::fs::read(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let values = npy::decode(&bytes).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        self.check_dim(values.len())?;

        let embedding = Embedding::from_values(values);
        self.combined.insert(key.to_string(), embedding.clone());
        Ok(embedding)
    }

    /// Write the combined archive. Nothing is written for an empty map.
    pub fn flush_archive(&self, path: &Path) -> Result<Option<ArchiveSummary>, StoreError> {
        if self.combined.is_empty() {
            tracing::info!("no embeddings in memory; combined archive not written");
            return Ok(None);
        }

        let entries = self.combined.iter().map(|(k, e)| (k, e.values.as_slice()));
        archive::write(path, self.dim, entries).map_err(|source| StoreError::Archive {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::info!(
            path = %path.display(),
            entries = self.combined.len(),
            "combined archive written"
        );
        Ok(Some(ArchiveSummary {
            path: path.to_path_buf(),
            entries: self.combined.len(),
        }))
    }
}
