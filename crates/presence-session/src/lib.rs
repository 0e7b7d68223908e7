//! In-person attendance with liveliness verification.
//!
//! A session opens the device camera, runs blink and head-movement checks on
//! every frame, and turns a verified live face into one attendance record
//! with the backend. See [`start_session`] and [`SessionHandle`].

pub mod config;
pub mod error;
pub mod http;
pub mod services;
pub mod session;
pub mod submission;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::AttendanceError;
pub use http::HttpBackend;
pub use services::{
    load_thresholds, AttendanceService, ConfigurationService, FaceRecognitionService,
    LivelinessContext, MeetingLifecycle, ServiceError, StaticToken, TokenProvider,
};
pub use session::{
    start_session, Collaborators, FaceOutline, Hardware, LivelinessHint, PreviewFrame,
    SessionEvent, SessionHandle, SessionStatus, VerificationListener, VideoSink,
};
pub use submission::{
    AttendanceReceipt, AttendanceRecord, AttendanceSubmission, QuorumStatus, VerificationMethod,
    VoterIdSuffix,
};
