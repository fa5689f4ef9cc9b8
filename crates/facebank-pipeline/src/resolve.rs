//! Pure mapping from a catalog record to on-disk locations.
//!
//! Only the file name of an image reference is used; directory components
//! recorded in the catalog are ignored and images are looked up in one flat
//! directory.

use crate::catalog::SourceRecord;
use std::path::PathBuf;

/// Per-record artifact extension.
pub const ARTIFACT_EXT: &str = "npy";

/// Where one record's image and artifact live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub image_path: PathBuf,
    /// `{person_id}_{stem}`. Records sharing a key share an artifact.
    pub artifact_key: String,
    pub artifact_path: PathBuf,
}

pub fn normalize_separators(raw: &str) -> String {
    raw.replace('\\', "/")
}

/// Final path component, whichever separator style the reference uses.
pub fn basename(image_ref: &str) -> &str {
    image_ref.rsplit(['/', '\\']).next().unwrap_or(image_ref)
}

/// File name without its last extension. Leading dots do not start an
/// extension, so `.jpg` is its own stem.
pub fn stem(file_name: &str) -> &str {
    let leading = file_name.len() - file_name.trim_start_matches('.').len();
    match file_name[leading..].rfind('.') {
        Some(dot) => &file_name[..leading + dot],
        None => file_name,
    }
}

pub fn artifact_key(person_id: &str, image_ref: &str) -> String {
    format!("{person_id}_{}", stem(basename(image_ref)))
}

#[derive(Debug, Clone)]
pub struct Resolver {
    image_dir: PathBuf,
    artifact_dir: PathBuf,
}

impl Resolver {
    pub fn new(image_dir: impl Into<PathBuf>, artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: image_dir.into(),
            artifact_dir: artifact_dir.into(),
        }
    }

    pub fn resolve(&self, record: &SourceRecord) -> ResolvedTarget {
        let artifact_key = artifact_key(&record.person_id, &record.image_ref);
        ResolvedTarget {
            image_path: self.image_dir.join(basename(&record.image_ref)),
            artifact_path: self.artifact_dir.join(format!("{artifact_key}.{ARTIFACT_EXT}")),
            artifact_key,
        }
    }
}
