//! SCRFD face detector via ONNX Runtime.
//!
//! Runs the InsightFace `det_10g` model on RGB stills: letterbox to 640×640,
//! decode the three anchor-free stride heads, then suppress overlaps.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use thiserror::Error;

const INPUT_SIDE: u32 = 640;
/// SCRFD pixel mapping: `(p - 127.5) / 128`.
const PIXEL_CENTER: f32 = 127.5;
const PIXEL_SCALE: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error(
        "detection model missing at {} (install the buffalo_l pack into the model directory)",
        .0.display()
    )]
    ModelNotFound(PathBuf),
    #[error("detection output unreadable: {0}")]
    BadOutput(String),
    #[error("onnx runtime: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied when fitting the image into the square input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: u32) -> (Self, u32, u32) {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, target);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, target);
        let pad_x = ((target - new_w) / 2) as f32;
        let pad_y = ((target - new_h) / 2) as f32;
        (Self { scale, pad_x, pad_y }, new_w, new_h)
    }

    /// Map a point in network input space back to original image space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor positions for one stride head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

pub struct FaceDetector {
    session: Session,
    /// One entry per stride in [`STRIDES`], resolved at load time.
    heads: [StrideOutputs; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.is_file() {
            return Err(DetectorError::ModelNotFound(model_path.to_path_buf()));
        }
        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(DetectorError::BadOutput(format!(
                "expected 9 output heads (score, bbox, kps per stride), model has {}",
                names.len()
            )));
        }
        let heads = resolve_heads(&names);
        tracing::info!(path = %model_path.display(), ?heads, "detection model loaded");

        Ok(Self { session, heads })
    }

    /// Detect faces, returning boxes sorted by confidence (highest first).
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = preprocess(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let read = |idx: usize, head: &str, stride: usize| {
            outputs[idx]
                .try_extract_tensor::<f32>()
                .map(|(_, data)| data)
                .map_err(|e| DetectorError::BadOutput(format!("{head}_{stride}: {e}")))
        };

        let mut candidates = Vec::new();
        for (outputs_for, stride) in self.heads.iter().zip(STRIDES) {
            let tensors = StrideTensors {
                scores: read(outputs_for.score, "score", stride)?,
                bboxes: read(outputs_for.bbox, "bbox", stride)?,
                kps: read(outputs_for.kps, "kps", stride)?,
            };
            candidates.extend(decode_stride(tensors, stride, &letterbox, SCORE_THRESHOLD));
        }
        Ok(nms(candidates, IOU_THRESHOLD))
    }
}

/// Letterbox an RGB image into a normalized 1×3×640×640 RGB tensor.
///
/// Padding is filled with the mean so it normalizes to 0.0.
fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let size = INPUT_SIDE;
    let (letterbox, new_w, new_h) = Letterbox::fit(image.width(), image.height(), size);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let n = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, n, n));
    let (off_x, off_y) = (letterbox.pad_x as usize, letterbox.pad_y as usize);

    for y in 0..n {
        for x in 0..n {
            let inside = x >= off_x
                && y >= off_y
                && x < off_x + new_w as usize
                && y < off_y + new_h as usize;
            let rgb = if inside {
                let p = resized.get_pixel((x - off_x) as u32, (y - off_y) as u32).0;
                [p[0] as f32, p[1] as f32, p[2] as f32]
            } else {
                [PIXEL_CENTER; 3]
            };
            for (c, value) in rgb.iter().enumerate() {
                tensor[[0, c, y, x]] = (value - PIXEL_CENTER) / PIXEL_SCALE;
            }
        }
    }

    (tensor, letterbox)
}

/// Map stride heads to output tensor positions.
///
/// Exports that name their outputs `score_8`, `bbox_16`, `kps_32`, ... are
/// mapped by name in any order. Anything else uses the standard positional
/// layout: [0-2] scores, [3-5] bboxes, [6-8] kps, strides 8/16/32.
fn resolve_heads(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputs>> = STRIDES
        .iter()
        .map(|&stride| {
            Some(StrideOutputs {
                score: find("score", stride)?,
                bbox: find("bbox", stride)?,
                kps: find("kps", stride)?,
            })
        })
        .collect();

    match named.as_deref() {
        Some(&[s8, s16, s32]) => [s8, s16, s32],
        _ => {
            tracing::debug!(?names, "unrecognized output names; assuming positional heads");
            [
                StrideOutputs { score: 0, bbox: 3, kps: 6 },
                StrideOutputs { score: 1, bbox: 4, kps: 7 },
                StrideOutputs { score: 2, bbox: 5, kps: 8 },
            ]
        }
    }
}

/// Raw head outputs for one stride.
struct StrideTensors<'a> {
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// Decode candidates above `threshold` for one stride level.
///
/// Anchor centres sit on a `640 / stride` grid with two anchors per cell.
/// Box and keypoint regressions are distances in stride units from the centre.
fn decode_stride(
    t: StrideTensors<'_>,
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = INPUT_SIDE as usize / stride;
    let anchors = grid * grid * ANCHORS_PER_CELL;
    let s = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let score = t.scores.get(idx).copied()?;
            if score <= threshold {
                return None;
            }

            let cell = idx / ANCHORS_PER_CELL;
            let cx = (cell % grid) as f32 * s;
            let cy = (cell / grid) as f32 * s;

            let d = t.bboxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.unmap(cx - d[0] * s, cy - d[1] * s);
            let (x2, y2) = letterbox.unmap(cx + d[2] * s, cy + d[3] * s);

            let landmarks = t.kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| letterbox.unmap(cx + k[i * 2] * s, cy + k[i * 2 + 1] * s))
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression. Output is sorted by confidence descending.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.area() + b.area() - inter;
    if union > 0.0 { inter / union } else { 0.0 }
}
