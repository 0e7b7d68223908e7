//! Face-mesh landmark frames and the named index sets the detectors read.
//!
//! The face-mesh detector reports 468 normalised points per face (478 with
//! iris refinement). Every index set below is checked against that contract at
//! compile time, and [`LandmarkFrame::new`] refuses shorter point sets, so the
//! detectors can index without bounds failures.

use std::time::Duration;

use thiserror::Error;

use crate::types::Point;

/// Minimum number of points a face-mesh result must carry.
pub const MESH_LANDMARK_COUNT: usize = 468;

/// Six points outlining one eye, in EAR order: outer corner, two upper-lid
/// points, inner corner, two lower-lid points (`p0..p5`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EyeIndices(pub [usize; 6]);

/// Subject's left eye (image right on an unmirrored frame).
pub const LEFT_EYE: EyeIndices = EyeIndices([33, 160, 158, 133, 153, 144]);

/// Subject's right eye.
pub const RIGHT_EYE: EyeIndices = EyeIndices([362, 385, 387, 263, 373, 380]);

/// Rigid reference points tracked for macro movement: nose tip, outer corner
/// of each eye, and both mouth corners.
pub const MOVEMENT_REFERENCE: [usize; 5] = [1, 33, 263, 61, 291];

const fn all_below(indices: &[usize], limit: usize) -> bool {
    let mut i = 0;
    while i < indices.len() {
        if indices[i] >= limit {
            return false;
        }
        i += 1;
    }
    true
}

const _: () = assert!(all_below(&LEFT_EYE.0, MESH_LANDMARK_COUNT));
const _: () = assert!(all_below(&RIGHT_EYE.0, MESH_LANDMARK_COUNT));
const _: () = assert!(all_below(&MOVEMENT_REFERENCE, MESH_LANDMARK_COUNT));

#[derive(Error, Debug, PartialEq)]
pub enum LandmarkError {
    #[error("landmark set has {0} points (expected at least {MESH_LANDMARK_COUNT})")]
    TooFewPoints(usize),
}

/// One face's landmarks for a single video frame.
///
/// `timestamp` is the frame's capture time relative to the start of its
/// stream; the blink detector measures closure durations with it.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkFrame {
    points: Vec<Point>,
    timestamp: Duration,
}

impl LandmarkFrame {
    pub fn new(points: Vec<Point>, timestamp: Duration) -> Result<Self, LandmarkError> {
        if points.len() < MESH_LANDMARK_COUNT {
            return Err(LandmarkError::TooFewPoints(points.len()));
        }
        Ok(Self { points, timestamp })
    }

    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn eye(&self, eye: EyeIndices) -> [Point; 6] {
        eye.0.map(|i| self.points[i])
    }

    pub fn movement_reference(&self) -> [Point; 5] {
        MOVEMENT_REFERENCE.map(|i| self.points[i])
    }

    /// Axis-aligned extents of all points as `(min, max)`.
    pub fn extents(&self) -> (Point, Point) {
        let mut min = Point::new(f32::MAX, f32::MAX);
        let mut max = Point::new(f32::MIN, f32::MIN);
        for p in &self.points {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        (min, max)
    }

    /// Face outline ellipse for the preview overlay as `(centre, radius_x, radius_y)`,
    /// in normalised frame coordinates.
    pub fn outline(&self) -> (Point, f32, f32) {
        let (min, max) = self.extents();
        let centre = Point::new((min.x + max.x) / 2.0, (min.y + max.y) / 2.0);
        let rx = (max.x - min.x) / 2.0 * 1.2;
        let ry = (max.y - min.y) / 2.0 * 1.4;
        (centre, rx, ry)
    }
}
