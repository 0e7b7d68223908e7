//! External collaborators of an attendance session.
//!
//! All traits are synchronous and object-safe. The session calls them from
//! `spawn_blocking` tasks so slow backends never stall the frame loop or the
//! async runtime.

use presence_core::{BoundingBox, FaceDescriptor, Thresholds, VideoFrame};
use thiserror::Error;

use crate::error::AttendanceError;
use crate::submission::{AttendanceReceipt, AttendanceSubmission, QuorumStatus};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<ServiceError> for AttendanceError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Rejected { message, .. } => Self::SubmissionRejected(message),
            other => Self::TransientNetworkError(other.to_string()),
        }
    }
}

/// Usage context the platform stores camera settings for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LivelinessContext {
    Attendance,
    FaceRegistration,
    CitizenLogin,
}

impl LivelinessContext {
    /// Key of this context in the platform camera configuration.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Attendance => "attendance",
            Self::FaceRegistration => "faceRegistration",
            Self::CitizenLogin => "citizenLogin",
        }
    }
}

impl std::fmt::Display for LivelinessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

pub trait ConfigurationService: Send + Sync {
    fn liveliness_config(&self, context: LivelinessContext) -> Result<Thresholds, ServiceError>;
}

/// Thresholds for `context`, or the documented defaults when the
/// configuration service is unavailable.
pub fn load_thresholds(
    service: &dyn ConfigurationService,
    context: LivelinessContext,
) -> Thresholds {
    match service.liveliness_config(context) {
        Ok(thresholds) => thresholds,
        Err(e) => {
            let fallback = Thresholds::default();
            tracing::warn!(
                context = %context,
                error = %e,
                blink_required = fallback.blink_required,
                movement_required = fallback.movement_required,
                "liveliness configuration unavailable, using defaults"
            );
            fallback
        }
    }
}

pub trait FaceRecognitionService: Send + Sync {
    /// Bounding box of the most prominent face, if any.
    fn detect_face(&self, frame: &VideoFrame) -> Result<Option<BoundingBox>, ServiceError>;

    /// Descriptor of the face inside `face`, or `None` if none could be extracted.
    fn extract_descriptor(
        &self,
        frame: &VideoFrame,
        face: &BoundingBox,
    ) -> Result<Option<FaceDescriptor>, ServiceError>;
}

pub trait AttendanceService: Send + Sync {
    /// Record one attendance. Called exactly once per submission.
    fn mark_attendance(
        &self,
        submission: &AttendanceSubmission,
    ) -> Result<AttendanceReceipt, ServiceError>;
}

pub trait MeetingLifecycle: Send + Sync {
    fn quorum_status(&self, meeting_id: &str) -> Result<QuorumStatus, ServiceError>;

    /// Re-read quorum-gated meeting state after the present count crossed quorum.
    fn refresh(&self, meeting_id: &str) -> Result<(), ServiceError>;
}

/// Source of the bearer token for authenticated calls.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// A fixed token, typically from `PRESENCE_API_TOKEN`.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token)
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}
