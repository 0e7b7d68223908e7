//! Camera devices and the landmark stream.
//!
//! The platform camera and the face-mesh model sit behind the
//! [`CameraBackend`] and [`LandmarkDetector`] traits. This crate owns the
//! device discipline around them: permission probing, front/back
//! classification, idempotent stream shutdown, and a cancellable
//! one-frame-at-a-time landmark sequence.

pub mod device;
pub mod landmark_stream;
#[cfg(any(test, feature = "scripted"))]
pub mod scripted;

pub use device::{
    ActiveStream, CameraBackend, CameraDevice, CameraError, CameraSet, CaptureStream, DeviceInfo,
    DeviceManager, Facing,
};
pub use landmark_stream::{CancelToken, DetectorError, LandmarkDetector, LandmarkStream, StreamItem};
