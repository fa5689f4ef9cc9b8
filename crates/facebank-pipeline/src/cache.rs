//! Decides whether a record's artifact can be reused.

use crate::npy;
use crate::resolve::ResolvedTarget;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheVerdict {
    Hit,
    Miss,
    /// Something is at the artifact path but the validator rejected it.
    Invalid(String),
}

/// Strategy for trusting an existing artifact. Must not fail: anything
/// unexpected is a [`CacheVerdict::Miss`] or [`CacheVerdict::Invalid`].
pub trait CacheValidator: Send + Sync {
    fn verdict(&self, target: &ResolvedTarget) -> CacheVerdict;
}

/// A regular file at the artifact path is a hit. Contents are trusted.
#[derive(Debug, Default, Clone, Copy)]
pub struct PresenceValidator;

impl CacheValidator for PresenceValidator {
    fn verdict(&self, target: &ResolvedTarget) -> CacheVerdict {
        if target.artifact_path.is_file() {
            CacheVerdict::Hit
        } else {
            CacheVerdict::Miss
        }
    }
}

/// Presence plus a file-size check for a `dim`-float artifact.
/// Reads metadata only.
#[derive(Debug, Clone, Copy)]
pub struct DimensionValidator {
    pub dim: usize,
}

impl CacheValidator for DimensionValidator {
    fn verdict(&self, target: &ResolvedTarget) -> CacheVerdict {
        let Ok(meta) = std::fs::metadata(&target.artifact_path) else {
            return CacheVerdict::Miss;
        };
        if !meta.is_file() {
            return CacheVerdict::Miss;
        }
        let expected = npy::encoded_len(self.dim);
        if meta.len() == expected {
            CacheVerdict::Hit
        } else {
            CacheVerdict::Invalid(format!(
                "artifact is {} bytes, a {}-dim artifact is {expected}",
                meta.len(),
                self.dim
            ))
        }
    }
}

pub struct CacheGate {
    validator: Box<dyn CacheValidator>,
    force: bool,
}

impl CacheGate {
    pub fn new(validator: Box<dyn CacheValidator>) -> Self {
        Self { validator, force: false }
    }

    /// Every record is a miss; artifacts get recomputed and replaced.
    pub fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn check(&self, target: &ResolvedTarget) -> CacheVerdict {
        if self.force {
            return CacheVerdict::Miss;
        }
        self.validator.verdict(target)
    }
}

impl Default for CacheGate {
    fn default() -> Self {
        Self::new(Box::new(PresenceValidator))
    }
}
