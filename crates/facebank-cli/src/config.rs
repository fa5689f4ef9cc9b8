use anyhow::{Context, Result};
use facebank_pipeline::PipelineConfig;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Built-in defaults, overlaid by a TOML file when one is given.
pub fn load(file: Option<&Path>) -> Result<PipelineConfig> {
    let Some(path) = file else {
        return Ok(PipelineConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
}

/// Overlay `FACEBANK_*` variables. `lookup` is `std::env::var` in the binary.
pub fn apply_env<F>(config: &mut PipelineConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = Env(lookup);

    env.path("FACEBANK_CATALOG", &mut config.catalog_path);
    env.path("FACEBANK_IMAGE_DIR", &mut config.image_dir);
    env.path("FACEBANK_ARTIFACT_DIR", &mut config.artifact_dir);
    env.path("FACEBANK_ARCHIVE", &mut config.archive_path);
    env.path("FACEBANK_MANIFEST", &mut config.manifest_path);
    if let Some(dir) = env.get("FACEBANK_MODEL_DIR") {
        config.model_dir = Some(PathBuf::from(dir));
    }

    env.parsed("FACEBANK_EMBEDDING_DIM", &mut config.embedding_dim);
    env.parsed("FACEBANK_REFERENCE_MODE", &mut config.reference_mode);
    env.parsed("FACEBANK_SELECTION", &mut config.selection);
    env.parsed("FACEBANK_RECORD_TIMEOUT_SECS", &mut config.record_timeout_secs);
    env.flag("FACEBANK_VALIDATE_CACHE", &mut config.validate_cache);
    env.flag("FACEBANK_FORCE", &mut config.force);
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.is_empty())
    }

    fn path(&self, key: &str, slot: &mut PathBuf) {
        if let Some(v) = self.get(key) {
            *slot = PathBuf::from(v);
        }
    }

    /// Unparsable values keep the current setting.
    fn parsed<T>(&self, key: &str, slot: &mut T)
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(v) = self.get(key) else { return };
        match v.parse() {
            Ok(parsed) => *slot = parsed,
            Err(e) => {
                tracing::warn!(key, value = %v, error = %e, "ignoring invalid environment value")
            }
        }
    }

    fn flag(&self, key: &str, slot: &mut bool) {
        if let Some(v) = self.get(key) {
            *slot = v != "0";
        }
    }
}
