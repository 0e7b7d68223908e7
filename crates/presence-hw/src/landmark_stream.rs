//! One-frame-at-a-time landmark sequence over an open camera stream.
//!
//! Each pull reads a frame, runs the face-mesh detector on it, and yields
//! either a validated [`LandmarkFrame`] or a no-face marker. The next frame is
//! never requested before the current one has been processed, so there is
//! at most one detection in flight per stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use presence_core::{LandmarkFrame, Point, VideoFrame};
use thiserror::Error;

use crate::device::{ActiveStream, CameraDevice, CameraError};

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("landmark model failed: {0}")]
    Model(String),
}

/// Face-mesh landmark model.
pub trait LandmarkDetector: Send {
    /// Landmarks of the single most prominent face, or `None` when no face
    /// is visible.
    fn detect(&mut self, frame: &VideoFrame) -> Result<Option<Vec<Point>>, DetectorError>;
}

/// Shared stop flag. Raising it ends the landmark sequence at the next pull.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of processing one frame.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Face {
        frame: VideoFrame,
        landmarks: LandmarkFrame,
    },
    NoFace {
        frame: VideoFrame,
    },
}

impl StreamItem {
    pub fn frame(&self) -> &VideoFrame {
        match self {
            Self::Face { frame, .. } | Self::NoFace { frame } => frame,
        }
    }

    pub fn landmarks(&self) -> Option<&LandmarkFrame> {
        match self {
            Self::Face { landmarks, .. } => Some(landmarks),
            Self::NoFace { .. } => None,
        }
    }
}

/// Landmark sequence bound to one [`ActiveStream`].
///
/// The iterator is fused: once cancelled, closed, or after a capture error it
/// yields nothing more.
pub struct LandmarkStream {
    stream: ActiveStream,
    detector: Box<dyn LandmarkDetector>,
    cancel: CancelToken,
    finished: bool,
}

impl LandmarkStream {
    pub fn new(
        stream: ActiveStream,
        detector: Box<dyn LandmarkDetector>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            stream,
            detector,
            cancel,
            finished: false,
        }
    }

    pub fn device(&self) -> &CameraDevice {
        self.stream.device()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Read one live frame without running detection, e.g. for a still capture.
    pub fn capture_frame(&mut self) -> Result<VideoFrame, CameraError> {
        if self.cancel.is_cancelled() {
            return Err(CameraError::StreamClosed);
        }
        self.stream.next_frame()
    }

    /// Stop the sequence and release the camera. The detector is handed back
    /// so it can be reused on another stream.
    pub fn close(mut self) -> Box<dyn LandmarkDetector> {
        self.cancel.cancel();
        self.stream.close();
        self.detector
    }

    fn process(&mut self, frame: VideoFrame) -> StreamItem {
        let points = match self.detector.detect(&frame) {
            Ok(points) => points,
            Err(e) => {
                tracing::warn!(error = %e, "landmark detection failed, treating frame as no face");
                None
            }
        };
        let Some(points) = points else {
            return StreamItem::NoFace { frame };
        };
        match LandmarkFrame::new(points, frame.timestamp) {
            Ok(landmarks) => StreamItem::Face { frame, landmarks },
            Err(e) => {
                tracing::trace!(error = %e, "incomplete face mesh");
                StreamItem::NoFace { frame }
            }
        }
    }
}

impl Iterator for LandmarkStream {
    type Item = Result<StreamItem, CameraError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.cancel.is_cancelled() || !self.stream.is_open() {
            self.finished = true;
            return None;
        }
        match self.stream.next_frame() {
            Ok(frame) => {
                // A cancel raised while the frame was being read wins.
                if self.cancel.is_cancelled() {
                    self.finished = true;
                    return None;
                }
                Some(Ok(self.process(frame)))
            }
            Err(CameraError::StreamClosed) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for LandmarkStream {}
