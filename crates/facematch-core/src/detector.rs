//! Face detector collaborator.
//!
//! Detection itself lives outside this crate; the engine only needs a
//! blocking call that returns face boxes, best first.

use crate::types::BoundingBox;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detection failed: {0}")]
    DetectionFailed(String),
}

/// Finds faces in a frame. May return an empty list.
pub trait FaceDetector: Send {
    fn find_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Treats the whole image as a single face.
///
/// For inputs that are already face crops, e.g. picked from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct FullFrameDetector;

impl FaceDetector for FullFrameDetector {
    fn find_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![BoundingBox {
            x: 0.0,
            y: 0.0,
            width: image.width() as f32,
            height: image.height() as f32,
            confidence: 1.0,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_frame_covers_image() {
        let image = RgbImage::new(40, 30);
        let faces = FullFrameDetector.find_faces(&image).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].width, 40.0);
        assert_eq!(faces[0].height, 30.0);
    }

    #[test]
    fn test_full_frame_empty_image_has_no_face() {
        let image = RgbImage::new(0, 0);
        assert!(FullFrameDetector.find_faces(&image).unwrap().is_empty());
    }
}
