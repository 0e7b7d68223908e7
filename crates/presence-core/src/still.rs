//! Still capture: the frozen frame submitted with an attendance request.
//!
//! The still is rendered from the same [`SourceRect`] the preview shows for a
//! given [`CameraViewTransform`] snapshot and scaled back to the full frame
//! size, so the submitted image matches what the operator confirmed on
//! screen. Stills are never mirrored.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

use crate::types::VideoFrame;
use crate::view::{CameraViewTransform, SourceRect};

#[derive(Error, Debug)]
pub enum StillError {
    #[error("frame has no pixels")]
    EmptyFrame,
    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// An encoded still frame.
#[derive(Debug, Clone, PartialEq)]
pub struct StillImage {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Render the visible region of `frame` under `view` at full frame size.
pub fn render_still(
    frame: &VideoFrame,
    view: &CameraViewTransform,
) -> Result<RgbImage, StillError> {
    let (width, height) = (frame.width(), frame.height());
    if width == 0 || height == 0 {
        return Err(StillError::EmptyFrame);
    }
    if view.is_identity() {
        return Ok(frame.image.clone());
    }

    let SourceRect {
        x,
        y,
        width: w,
        height: h,
    } = view.source_rect(width, height);
    let visible = imageops::crop_imm(&frame.image, x, y, w, h).to_image();
    Ok(imageops::resize(&visible, width, height, FilterType::Triangle))
}

/// Encode a rendered still as JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<StillImage, StillError> {
    let mut jpeg = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100));
    encoder.encode_image(image)?;
    Ok(StillImage {
        jpeg,
        width: image.width(),
        height: image.height(),
    })
}
