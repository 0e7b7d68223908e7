//! Liveliness verification for in-person attendance.
//!
//! Pure, synchronous building blocks: the face-mesh landmark model, the blink
//! and macro-movement detectors, the per-check verification state machine and
//! the zoom/pan geometry shared by the preview and the captured still.
//! Nothing here touches a camera, a thread or the network.

pub mod landmarks;
pub mod liveness;
pub mod still;
pub mod types;
pub mod verification;
pub mod view;

pub use landmarks::{LandmarkError, LandmarkFrame, MESH_LANDMARK_COUNT};
pub use liveness::{
    DetectionState, DetectorConfig, DetectorConfigError, LivenessDetector, LivenessSignals,
};
pub use still::{encode_jpeg, render_still, StillError, StillImage};
pub use types::{
    BoundingBox, DescriptorError, FaceDescriptor, Point, VideoFrame, DESCRIPTOR_DIM,
};
pub use verification::{
    CheckKind, CheckProgress, CheckState, FrameOutcome, LivelinessTracker, ThresholdError,
    Thresholds, VerificationEvent, VerificationMachine, VerificationState,
};
pub use view::{CameraViewTransform, SourceRect};
