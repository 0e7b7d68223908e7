//! Zoom and pan geometry shared by the preview and the captured still.
//!
//! A transform is a `Copy` value: input handlers replace it wholesale and
//! readers take a snapshot, so the preview and the capture routine always
//! agree on which part of the frame is visible.

use serde::{Deserialize, Serialize};

pub const MIN_ZOOM: f32 = 1.0;
pub const MAX_ZOOM: f32 = 2.0;
pub const ZOOM_STEP: f32 = 0.1;

/// Scale plus pan offset, offsets normalised to the frame size.
///
/// Invariant: `scale` is within `[MIN_ZOOM, MAX_ZOOM]` and both offsets are
/// within `±(scale − 1) / (2·scale)`, so the visible region never leaves
/// the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraViewTransform {
    scale: f32,
    offset_x: f32,
    offset_y: f32,
}

impl Default for CameraViewTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Visible source region in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CameraViewTransform {
    pub const fn identity() -> Self {
        Self {
            scale: MIN_ZOOM,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn offset(&self) -> (f32, f32) {
        (self.offset_x, self.offset_y)
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    /// Largest pan offset allowed at the current scale.
    pub fn max_offset(&self) -> f32 {
        (self.scale - 1.0) / (2.0 * self.scale)
    }

    /// Set the zoom level, clamped to `[1.0, 2.0]`; the pan offset is
    /// re-clamped for the new scale.
    pub fn with_zoom(self, level: f32) -> Self {
        let scale = if level.is_finite() {
            level.clamp(MIN_ZOOM, MAX_ZOOM)
        } else {
            MIN_ZOOM
        };
        Self { scale, ..self }.clamped()
    }

    pub fn zoom_in(self) -> Self {
        self.with_zoom(round_step(self.scale + ZOOM_STEP))
    }

    pub fn zoom_out(self) -> Self {
        self.with_zoom(round_step(self.scale - ZOOM_STEP))
    }

    /// Pan by a relative drag delta, in preview-normalised units.
    pub fn with_pan(self, dx: f32, dy: f32) -> Self {
        Self {
            offset_x: self.offset_x + finite_or_zero(dx),
            offset_y: self.offset_y + finite_or_zero(dy),
            ..self
        }
        .clamped()
    }

    /// Centre the view on a pointer position inside the preview rect
    /// (`0.0..=1.0` on both axes).
    pub fn with_pointer(self, px: f32, py: f32) -> Self {
        let px = finite_or_zero(px).clamp(0.0, 1.0);
        let py = finite_or_zero(py).clamp(0.0, 1.0);
        Self {
            offset_x: px - 0.5,
            offset_y: py - 0.5,
            ..self
        }
        .clamped()
    }

    fn clamped(self) -> Self {
        let max = self.max_offset();
        Self {
            offset_x: self.offset_x.clamp(-max, max),
            offset_y: self.offset_y.clamp(-max, max),
            ..self
        }
    }

    /// The part of a `width × height` frame that is visible under this
    /// transform. The preview scales this region up to fill the view; the
    /// captured still is rendered from exactly the same region.
    pub fn source_rect(&self, width: u32, height: u32) -> SourceRect {
        let w = width as f32;
        let h = height as f32;
        let visible_w = (w / self.scale).round().clamp(1.0, w.max(1.0));
        let visible_h = (h / self.scale).round().clamp(1.0, h.max(1.0));
        let left = (w * (self.max_offset() - self.offset_x)).round();
        let top = (h * (self.max_offset() - self.offset_y)).round();
        let x = left.clamp(0.0, (w - visible_w).max(0.0));
        let y = top.clamp(0.0, (h - visible_h).max(0.0));
        SourceRect {
            x: x as u32,
            y: y as u32,
            width: visible_w as u32,
            height: visible_h as u32,
        }
    }
}

fn round_step(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

fn finite_or_zero(v: f32) -> f32 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}
