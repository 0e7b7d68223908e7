use std::time::Duration;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of a face-recognition descriptor (face-api recognition net).
pub const DESCRIPTOR_DIM: usize = 128;

/// A 2D landmark position, normalised to the frame (0.0..=1.0 on both axes).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// One decoded camera frame.
///
/// `timestamp` is the capture time relative to the start of the stream that
/// produced it.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub image: RgbImage,
    pub timestamp: Duration,
}

impl VideoFrame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Face bounding box in pixel coordinates of the frame it was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector confidence score (0.0–1.0).
    pub confidence: f32,
}

#[derive(Error, Debug, PartialEq)]
pub enum DescriptorError {
    #[error("face descriptor is empty")]
    Empty,
    #[error("invalid face descriptor dimension: {0} (expected {DESCRIPTOR_DIM})")]
    InvalidDim(usize),
    #[error("invalid face descriptor value (NaN/Inf) at index {0}")]
    InvalidValue(usize),
}

/// Fixed-length numeric embedding of a face, produced by the external
/// face-recognition collaborator and forwarded verbatim for identity matching.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FaceDescriptor(Vec<f32>);

impl FaceDescriptor {
    /// Validate and wrap raw descriptor values.
    pub fn new(values: Vec<f32>) -> Result<Self, DescriptorError> {
        if values.is_empty() {
            return Err(DescriptorError::Empty);
        }
        if values.len() != DESCRIPTOR_DIM {
            return Err(DescriptorError::InvalidDim(values.len()));
        }
        if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
            return Err(DescriptorError::InvalidValue(idx));
        }
        Ok(Self(values))
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }
}
