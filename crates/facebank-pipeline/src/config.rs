use crate::extractor::SelectionPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// How manifest rows refer to their embedding. One mode per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceMode {
    /// The manifest carries the path of the per-record artifact.
    #[default]
    Path,
    /// The manifest carries the vector itself as a JSON array.
    Inline,
}

impl fmt::Display for ReferenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReferenceMode::Path => "path",
            ReferenceMode::Inline => "inline",
        })
    }
}

impl FromStr for ReferenceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "path" => Ok(ReferenceMode::Path),
            "inline" => Ok(ReferenceMode::Inline),
            other => Err(format!(
                "unknown reference mode {other:?} (expected \"path\" or \"inline\")"
            )),
        }
    }
}

/// Pipeline configuration. Every field has a default matching the
/// `dataset/` layout, so a TOML file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// CSV catalog: header row, then `serial,name,person_id,image_ref` rows.
    pub catalog_path: PathBuf,
    /// Flat directory the image basenames are looked up in.
    pub image_dir: PathBuf,
    /// Directory holding one `.npy` artifact per key.
    pub artifact_dir: PathBuf,
    /// Combined archive written at the end of each run.
    pub archive_path: PathBuf,
    /// Manifest CSV output.
    pub manifest_path: PathBuf,
    /// ONNX model directory. Unset means [`facebank_core::default_model_dir`].
    pub model_dir: Option<PathBuf>,
    /// Embedding dimension every artifact must have.
    pub embedding_dim: usize,
    pub reference_mode: ReferenceMode,
    pub selection: SelectionPolicy,
    /// Check cached artifact size against `embedding_dim` before trusting it.
    pub validate_cache: bool,
    /// Ignore cached artifacts and recompute everything.
    pub force: bool,
    /// Upper bound on decode + inference per record. 0 disables the limit.
    pub record_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            catalog_path: PathBuf::from("dataset/info.csv"),
            image_dir: PathBuf::from("dataset/images"),
            artifact_dir: PathBuf::from("dataset/embeddings"),
            archive_path: PathBuf::from("dataset/all_embeddings.fbar"),
            manifest_path: PathBuf::from("dataset/embeddings.csv"),
            model_dir: None,
            embedding_dim: facebank_core::ARCFACE_EMBEDDING_DIM,
            reference_mode: ReferenceMode::default(),
            selection: SelectionPolicy::default(),
            validate_cache: false,
            force: false,
            record_timeout_secs: 30,
        }
    }
}

impl PipelineConfig {
    pub fn model_dir(&self) -> PathBuf {
        self.model_dir.clone().unwrap_or_else(facebank_core::default_model_dir)
    }

    pub fn record_timeout(&self) -> Option<Duration> {
        (self.record_timeout_secs > 0).then(|| Duration::from_secs(self.record_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg: PipelineConfig = toml::from_str(
            r#"
            image_dir = "/srv/faces"
            reference_mode = "inline"
            selection = "highest-confidence"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.image_dir, PathBuf::from("/srv/faces"));
        assert_eq!(cfg.reference_mode, ReferenceMode::Inline);
        assert_eq!(cfg.selection, SelectionPolicy::HighestConfidence);
        assert_eq!(cfg.embedding_dim, 512);
        assert_eq!(cfg.manifest_path, PathBuf::from("dataset/embeddings.csv"));
    }

    #[test]
    fn test_zero_timeout_disables_limit() {
        let cfg = PipelineConfig { record_timeout_secs: 0, ..Default::default() };
        assert_eq!(cfg.record_timeout(), None);
        assert_eq!(PipelineConfig::default().record_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_reference_mode_parse() {
        assert_eq!("inline".parse::<ReferenceMode>(), Ok(ReferenceMode::Inline));
        assert_eq!("path".parse::<ReferenceMode>(), Ok(ReferenceMode::Path));
        assert!("both".parse::<ReferenceMode>().is_err());
    }
}
