use presence_core::{CheckKind, StillError};
use presence_hw::CameraError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("no camera found")]
    NoCameraFound,
    #[error("camera permission denied")]
    CameraPermissionDenied,
    #[error("failed to start camera stream: {0}")]
    StreamStartFailed(String),
    #[error("face not recognized, reposition and try again")]
    FaceNotRecognized,
    #[error("liveliness not satisfied: {0} check not verified")]
    LivelinessNotSatisfied(CheckKind),
    #[error("attendance rejected: {0}")]
    SubmissionRejected(String),
    #[error("network error: {0}")]
    TransientNetworkError(String),
    #[error("voter ID suffix must be exactly 4 digits")]
    InvalidVoterId,
    #[error("an attendance submission is already in progress")]
    SubmissionInProgress,
    #[error("no active camera stream")]
    NoActiveStream,
    #[error("still capture failed: {0}")]
    Capture(String),
    #[error("only one camera detected")]
    SingleCamera,
    #[error("session thread exited")]
    SessionClosed,
}

impl AttendanceError {
    /// Whether the operator can recover by retrying (possibly after
    /// repositioning or switching camera).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StreamStartFailed(_)
                | Self::FaceNotRecognized
                | Self::LivelinessNotSatisfied(_)
                | Self::TransientNetworkError(_)
                | Self::InvalidVoterId
                | Self::SubmissionInProgress
                | Self::Capture(_)
        )
    }
}

impl From<CameraError> for AttendanceError {
    fn from(e: CameraError) -> Self {
        match e {
            CameraError::NoCameraFound => Self::NoCameraFound,
            CameraError::PermissionDenied => Self::CameraPermissionDenied,
            CameraError::StreamStartFailed { .. } => Self::StreamStartFailed(e.to_string()),
            CameraError::Capture(reason) => Self::Capture(reason),
            CameraError::StreamClosed => Self::NoActiveStream,
        }
    }
}

impl From<StillError> for AttendanceError {
    fn from(e: StillError) -> Self {
        Self::Capture(e.to_string())
    }
}
