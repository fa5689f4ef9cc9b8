//! Face analysis building blocks for facebank.
//!
//! SCRFD detection, five-point alignment and ArcFace embedding on ONNX
//! Runtime, behind the [`FaceAnalyzer`] and [`ImageDecoder`] seams the
//! extraction pipeline is written against.

pub mod alignment;
pub mod analyzer;
pub mod decode;
pub mod detector;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxAnalyzer};
pub use decode::{DecodeError, FileDecoder, ImageDecoder};
pub use detector::FaceDetector;
pub use recognizer::{FaceRecognizer, ARCFACE_EMBEDDING_DIM};
pub use types::{BoundingBox, DetectedFace, Embedding};

/// Where ONNX model files are looked up when nothing else is configured.
///
/// `FACEBANK_MODEL_DIR`, else `$XDG_DATA_HOME/facebank/models`, else
/// `$HOME/.local/share/facebank/models`.
pub fn default_model_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FACEBANK_MODEL_DIR") {
        return PathBuf::from(dir);
    }
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facebank/models")
}
