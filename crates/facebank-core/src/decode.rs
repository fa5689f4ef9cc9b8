//! Image decoding seam.

use image::{ImageError, RgbImage};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    /// No readable file at the path.
    #[error("image not found: {}", .0.display())]
    NotFound(PathBuf),
    /// A file exists but is not a supported, intact image.
    #[error("cannot decode {}: {reason}", path.display())]
    Undecodable { path: PathBuf, reason: String },
}

/// Turns a path into an 8-bit RGB pixel buffer.
pub trait ImageDecoder: Send {
    fn decode(&self, path: &Path) -> Result<RgbImage, DecodeError>;
}

/// Decoder backed by the `image` crate. The format is sniffed from content,
/// so mislabelled extensions still decode.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileDecoder;

impl ImageDecoder for FileDecoder {
    fn decode(&self, path: &Path) -> Result<RgbImage, DecodeError> {
        if !path.is_file() {
            return Err(DecodeError::NotFound(path.to_path_buf()));
        }

        let reader = image::ImageReader::open(path)
            .map_err(|_| DecodeError::NotFound(path.to_path_buf()))?
            .with_guessed_format()
            .map_err(|e| DecodeError::Undecodable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        match reader.decode() {
            Ok(img) => Ok(img.to_rgb8()),
            Err(ImageError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DecodeError::NotFound(path.to_path_buf()))
            }
            Err(e) => Err(DecodeError::Undecodable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
        }
    }
}
