//! Face crop → model input tensor.
//!
//! Crops a detected face out of the source frame, resizes it to the model's
//! square input with 2x2 bilinear sampling, and normalizes it according to
//! the descriptor's [`Normalization`] policy. Output is NHWC `[1, n, n, 3]`.

use crate::models::{ModelDescriptor, Normalization};
use crate::types::BoundingBox;
use image::imageops;
use image::{Rgb, RgbImage};
use ndarray::Array4;
use thiserror::Error;

const AFFINE_MEAN: f32 = 128.0;
const AFFINE_STD: f32 = 128.0;
const CHANNELS: usize = 3;
/// Fill for crop regions that fall outside the source frame.
const CROP_BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
/// A face box may exceed the frame by at most this factor per side.
const MAX_BOX_TO_FRAME: f32 = 4.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreprocessError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
}

/// Cut `face` out of `frame`. Parts of the box outside the frame are white.
pub fn crop_face(frame: &RgbImage, face: &BoundingBox) -> Result<RgbImage, PreprocessError> {
    if frame.width() == 0 || frame.height() == 0 {
        return Err(PreprocessError::InvalidImage(format!(
            "empty frame {}x{}",
            frame.width(),
            frame.height()
        )));
    }
    if !(face.width.is_finite() && face.height.is_finite()) || face.width < 1.0 || face.height < 1.0 {
        return Err(PreprocessError::InvalidImage(format!(
            "degenerate face box {}x{}",
            face.width, face.height
        )));
    }

    if face.width > frame.width() as f32 * MAX_BOX_TO_FRAME
        || face.height > frame.height() as f32 * MAX_BOX_TO_FRAME
        || !(face.x.is_finite() && face.y.is_finite())
    {
        return Err(PreprocessError::InvalidImage(format!(
            "face box {}x{} at ({}, {}) is out of proportion to frame {}x{}",
            face.width,
            face.height,
            face.x,
            face.y,
            frame.width(),
            frame.height()
        )));
    }

    let out_w = face.width as u32;
    let out_h = face.height as u32;
    let left = face.x.floor() as i64;
    let top = face.y.floor() as i64;

    let mut out = RgbImage::from_pixel(out_w, out_h, CROP_BACKGROUND);

    // Copy only the part of the box that overlaps the frame.
    let x0 = left.max(0);
    let y0 = top.max(0);
    let x1 = (left + out_w as i64).min(frame.width() as i64);
    let y1 = (top + out_h as i64).min(frame.height() as i64);
    for sy in y0..y1 {
        for sx in x0..x1 {
            let pixel = *frame.get_pixel(sx as u32, sy as u32);
            out.put_pixel((sx - left) as u32, (sy - top) as u32, pixel);
        }
    }

    Ok(out)
}

/// Convert a cropped face into the input tensor `descriptor` expects.
///
/// Resizing samples the four nearest source pixels per output pixel at any
/// scale, unlike a filter kernel that widens when downscaling. Channels are
/// written in the order they are stored in `face`; no RGB/BGR swizzle is
/// applied.
pub fn prepare(face: &RgbImage, descriptor: &ModelDescriptor) -> Result<Array4<f32>, PreprocessError> {
    if face.width() == 0 || face.height() == 0 {
        return Err(PreprocessError::InvalidImage(format!(
            "empty face crop {}x{}",
            face.width(),
            face.height()
        )));
    }
    if descriptor.input_dims == 0 {
        return Err(PreprocessError::InvalidImage(format!(
            "model {} declares zero input size",
            descriptor.name
        )));
    }

    let size = descriptor.input_dims as u32;
    let resized = if face.dimensions() == (size, size) {
        face.clone()
    } else {
        resize_bilinear(face, size)
    };

    let tensor = match descriptor.normalization {
        Normalization::FixedAffine => fixed_affine(&resized),
        Normalization::Standardize => standardize(&resized),
    };
    Ok(tensor)
}

/// Pixel-centre aligned bilinear resize to `size x size`.
fn resize_bilinear(face: &RgbImage, size: u32) -> RgbImage {
    let (w, h) = face.dimensions();
    let scale_x = w as f32 / size as f32;
    let scale_y = h as f32 / size as f32;
    let (max_x, max_y) = ((w - 1) as f32, (h - 1) as f32);

    RgbImage::from_fn(size, size, |x, y| {
        let u = ((x as f32 + 0.5) * scale_x - 0.5).clamp(0.0, max_x);
        let v = ((y as f32 + 0.5) * scale_y - 0.5).clamp(0.0, max_y);
        imageops::interpolate_bilinear(face, u, v).unwrap_or(*face.get_pixel(u as u32, v as u32))
    })
}

/// `(c - 128) / 128` on every channel of every pixel.
fn fixed_affine(image: &RgbImage) -> Array4<f32> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, h, w, CHANNELS));

    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..CHANNELS {
            tensor[[0, y as usize, x as usize, c]] = (pixel[c] as f32 - AFFINE_MEAN) / AFFINE_STD;
        }
    }

    tensor
}

/// Per-image standardization over all values of the buffer.
///
/// The population std is floored at `1/sqrt(n)` so near-constant crops do not
/// blow up.
fn standardize(image: &RgbImage) -> Array4<f32> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let raw = image.as_raw();
    let n = raw.len() as f64;

    let mean = raw.iter().map(|&v| v as f64).sum::<f64>() / n;
    let variance = raw.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt().max(1.0 / n.sqrt());

    let mut tensor = Array4::<f32>::zeros((1, h, w, CHANNELS));
    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..CHANNELS {
            tensor[[0, y as usize, x as usize, c]] = ((pixel[c] as f64 - mean) / std) as f32;
        }
    }

    tensor
}
