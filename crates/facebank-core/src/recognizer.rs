//! ArcFace (w600k_r50) embeddings on ONNX Runtime.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Pixel mapping for w600k_r50: `(p - 127.5) / 127.5`, i.e. [-1, 1].
/// SCRFD divides by 128 instead.
const PIXEL_CENTER: f32 = 127.5;
const PIXEL_SCALE: f32 = 127.5;
pub const ARCFACE_EMBEDDING_DIM: usize = 512;
const MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error(
        "recognition model missing at {} (install the buffalo_l pack into the model directory)",
        .0.display()
    )]
    ModelNotFound(PathBuf),
    #[error("recognition output unreadable: {0}")]
    BadOutput(String),
    #[error("recognition model returned {actual} values, expected {expected}")]
    Dimension { expected: usize, actual: usize },
    #[error("cannot align a face without landmarks")]
    NoLandmarks,
    #[error("onnx runtime: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.is_file() {
            return Err(RecognizerError::ModelNotFound(model_path.to_path_buf()));
        }
        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;
        tracing::info!(path = %model_path.display(), "recognition model loaded");
        Ok(Self { session })
    }

    /// Align `face` to the canonical 112×112 crop and embed it.
    /// The result is L2-normalized.
    pub fn extract(
        &mut self,
        image: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;
        let crop = alignment::align_face(image, landmarks);
        let input = to_tensor(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, values) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::BadOutput(e.to_string()))?;

        if values.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::Dimension {
                expected: ARCFACE_EMBEDDING_DIM,
                actual: values.len(),
            });
        }
        Ok(Embedding {
            values: l2_normalize(values),
            model_version: Some(MODEL_VERSION.to_string()),
        })
    }
}

/// Zero vectors come back unchanged.
fn l2_normalize(values: &[f32]) -> Vec<f32> {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return values.to_vec();
    }
    values.iter().map(|v| v / norm).collect()
}

/// 112×112 RGB crop to a `(1, 3, 112, 112)` tensor.
fn to_tensor(crop: &RgbImage) -> Array4<f32> {
    let side = ALIGNED_SIZE as usize;
    Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
        match crop.get_pixel_checked(x as u32, y as u32) {
            Some(p) => (p.0[c] as f32 - PIXEL_CENTER) / PIXEL_SCALE,
            None => 0.0,
        }
    })
}
