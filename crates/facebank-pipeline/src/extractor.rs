//! Per-image extraction: decode, analyze, then pick one face.

use facebank_core::{DecodeError, DetectedFace, Embedding, FaceAnalyzer, ImageDecoder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Which face becomes the record's embedding when an image has several.
///
/// `FirstDetected` takes the analyzer's first result. With the ONNX analyzer
/// that is the most confident detection after NMS, but other analyzers may
/// order differently; the policy does not reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
    #[default]
    FirstDetected,
    HighestConfidence,
    LargestArea,
}

impl SelectionPolicy {
    /// Ties keep the earlier face.
    pub fn select<'a>(&self, faces: &'a [DetectedFace]) -> Option<&'a DetectedFace> {
        match self {
            SelectionPolicy::FirstDetected => faces.first(),
            SelectionPolicy::HighestConfidence => faces
                .iter()
                .reduce(|best, f| if f.bbox.confidence > best.bbox.confidence { f } else { best }),
            SelectionPolicy::LargestArea => faces
                .iter()
                .reduce(|best, f| if f.bbox.area() > best.bbox.area() { f } else { best }),
        }
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SelectionPolicy::FirstDetected => "first-detected",
            SelectionPolicy::HighestConfidence => "highest-confidence",
            SelectionPolicy::LargestArea => "largest-area",
        })
    }
}

impl FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first-detected" => Ok(SelectionPolicy::FirstDetected),
            "highest-confidence" => Ok(SelectionPolicy::HighestConfidence),
            "largest-area" => Ok(SelectionPolicy::LargestArea),
            other => Err(format!(
                "unknown selection policy {other:?} \
                 (expected first-detected, highest-confidence or largest-area)"
            )),
        }
    }
}

/// Result of extracting one image.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Embedded(Embedding),
    NotFound,
    NoFace,
    /// Undecodable image, analyzer failure, bad dimension or timeout.
    DecodeFailed(String),
}

pub struct Extractor {
    decoder: Box<dyn ImageDecoder>,
    analyzer: Box<dyn FaceAnalyzer>,
    policy: SelectionPolicy,
    dim: usize,
}

impl Extractor {
    pub fn new(
        decoder: Box<dyn ImageDecoder>,
        analyzer: Box<dyn FaceAnalyzer>,
        policy: SelectionPolicy,
        dim: usize,
    ) -> Self {
        Self { decoder, analyzer, policy, dim }
    }

    pub fn extract(&mut self, image_path: &Path) -> Extraction {
        let image = match self.decoder.decode(image_path) {
            Ok(image) => image,
            Err(DecodeError::NotFound(_)) => return Extraction::NotFound,
            Err(e @ DecodeError::Undecodable { .. }) => {
                return Extraction::DecodeFailed(e.to_string());
            }
        };

        let faces = match self.analyzer.analyze(&image) {
            Ok(faces) => faces,
            Err(e) => return Extraction::DecodeFailed(format!("analysis failed: {e}")),
        };

        let Some(face) = self.policy.select(&faces) else {
            return Extraction::NoFace;
        };
        tracing::debug!(
            path = %image_path.display(),
            faces = faces.len(),
            confidence = face.bbox.confidence,
            policy = %self.policy,
            "face selected"
        );

        if face.embedding.dim() != self.dim {
            return Extraction::DecodeFailed(format!(
                "model produced a {}-dim embedding, expected {}",
                face.embedding.dim(),
                self.dim
            ));
        }
        Extraction::Embedded(face.embedding.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facebank_core::{AnalyzerError, BoundingBox};
    use image::RgbImage;
    use std::path::PathBuf;

    fn face(confidence: f32, side: f32, first: f32) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox {
                x: 0.0, y: 0.0, width: side, height: side,
                confidence, landmarks: None,
            },
            embedding: Embedding::from_values(vec![first, 0.0]),
        }
    }

    struct StaticDecoder(Result<(), bool>);

    impl ImageDecoder for StaticDecoder {
        fn decode(&self, path: &Path) -> Result<RgbImage, DecodeError> {
            match self.0 {
                Ok(()) => Ok(RgbImage::new(4, 4)),
                Err(true) => Err(DecodeError::NotFound(path.to_path_buf())),
                Err(false) => Err(DecodeError::Undecodable {
                    path: path.to_path_buf(),
                    reason: "bad huffman table".into(),
                }),
            }
        }
    }

    struct StaticAnalyzer(Option<Vec<DetectedFace>>);

    impl FaceAnalyzer for StaticAnalyzer {
        fn analyze(&mut self, _image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError> {
            self.0.clone().ok_or_else(|| AnalyzerError::Failed("session poisoned".into()))
        }
    }

    fn extractor(
        decoded: Result<(), bool>,
        faces: Option<Vec<DetectedFace>>,
        policy: SelectionPolicy,
    ) -> Extractor {
        Extractor::new(
            Box::new(StaticDecoder(decoded)),
            Box::new(StaticAnalyzer(faces)),
            policy,
            2,
        )
    }

    fn path() -> PathBuf {
        PathBuf::from("/img/ada.jpg")
    }

    #[test]
    fn test_first_detected_takes_index_zero() {
        // Second face is larger and more confident, first still wins.
        let faces = vec![face(0.6, 10.0, 1.0), face(0.9, 50.0, 2.0)];
        let mut ex = extractor(Ok(()), Some(faces), SelectionPolicy::FirstDetected);
        assert_eq!(
            ex.extract(&path()),
            Extraction::Embedded(Embedding::from_values(vec![1.0, 0.0]))
        );
    }

    #[test]
    fn test_alternative_policies() {
        let faces = vec![face(0.6, 80.0, 1.0), face(0.9, 20.0, 2.0), face(0.9, 10.0, 3.0)];
        let marker = |policy: SelectionPolicy| policy.select(&faces).map(|f| f.embedding.values[0]);
        assert_eq!(marker(SelectionPolicy::HighestConfidence), Some(2.0));
        assert_eq!(marker(SelectionPolicy::LargestArea), Some(1.0));
        assert!(SelectionPolicy::FirstDetected.select(&[]).is_none());
    }

    #[test]
    fn test_outcomes() {
        assert_eq!(
            extractor(Err(true), None, SelectionPolicy::default()).extract(&path()),
            Extraction::NotFound
        );
        assert!(matches!(
            extractor(Err(false), None, SelectionPolicy::default()).extract(&path()),
            Extraction::DecodeFailed(reason) if reason.contains("bad huffman")
        ));
        assert_eq!(
            extractor(Ok(()), Some(vec![]), SelectionPolicy::default()).extract(&path()),
            Extraction::NoFace
        );
        assert!(matches!(
            extractor(Ok(()), None, SelectionPolicy::default()).extract(&path()),
            Extraction::DecodeFailed(reason) if reason.contains("session poisoned")
        ));
    }

    #[test]
    fn test_wrong_dimension_is_a_failure() {
        let mut bad = face(0.9, 10.0, 1.0);
        bad.embedding.values.push(0.0);
        let mut ex = extractor(Ok(()), Some(vec![bad]), SelectionPolicy::default());
        assert!(matches!(ex.extract(&path()), Extraction::DecodeFailed(r) if r.contains("3-dim")));
    }

    #[test]
    fn test_policy_parse_and_display() {
        for policy in [
            SelectionPolicy::FirstDetected,
            SelectionPolicy::HighestConfidence,
            SelectionPolicy::LargestArea,
        ] {
            assert_eq!(policy.to_string().parse::<SelectionPolicy>(), Ok(policy));
        }
        assert!("best".parse::<SelectionPolicy>().is_err());
    }
}
