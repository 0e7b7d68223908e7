//! Attendance submission payloads and the double-submit guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use presence_core::{FaceDescriptor, StillImage};
use serde::{Deserialize, Serialize};

use crate::error::AttendanceError;

/// Last four digits of a voter ID, entered by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct VoterIdSuffix(String);

impl VoterIdSuffix {
    /// Accepts exactly four ASCII digits.
    pub fn parse(input: &str) -> Result<Self, AttendanceError> {
        if input.len() == 4 && input.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(input.to_string()))
        } else {
            Err(AttendanceError::InvalidVoterId)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VoterIdSuffix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationMethod {
    #[serde(rename = "FACE_RECOGNITION")]
    FaceRecognition,
}

impl std::fmt::Display for VerificationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FaceRecognition => f.write_str("FACE_RECOGNITION"),
        }
    }
}

/// One attendance request. Immutable after construction.
#[derive(Debug, Clone)]
pub struct AttendanceSubmission {
    meeting_id: String,
    voter_id_last_four: VoterIdSuffix,
    face_descriptor: FaceDescriptor,
    captured_image: StillImage,
    verification_method: VerificationMethod,
}

impl AttendanceSubmission {
    pub fn new(
        meeting_id: String,
        voter_id_last_four: VoterIdSuffix,
        face_descriptor: FaceDescriptor,
        captured_image: StillImage,
    ) -> Self {
        Self {
            meeting_id,
            voter_id_last_four,
            face_descriptor,
            captured_image,
            verification_method: VerificationMethod::FaceRecognition,
        }
    }

    pub fn meeting_id(&self) -> &str {
        &self.meeting_id
    }

    pub fn voter_id_last_four(&self) -> &VoterIdSuffix {
        &self.voter_id_last_four
    }

    pub fn face_descriptor(&self) -> &FaceDescriptor {
        &self.face_descriptor
    }

    pub fn captured_image(&self) -> &StillImage {
        &self.captured_image
    }

    pub fn verification_method(&self) -> VerificationMethod {
        self.verification_method
    }
}

/// Present and quorum counts of a meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuorumStatus {
    pub present: u32,
    pub quorum_required: u32,
    #[serde(default)]
    pub quorum_met: bool,
}

impl QuorumStatus {
    /// Whether one more attendance brings the meeting to quorum.
    pub fn next_reaches_quorum(&self) -> bool {
        !self.quorum_met && self.present.saturating_add(1) >= self.quorum_required
    }

    /// The counts after one more attendance.
    pub fn with_one_more(&self) -> Self {
        let present = self.present.saturating_add(1);
        Self {
            present,
            quorum_required: self.quorum_required,
            quorum_met: self.quorum_met || present >= self.quorum_required,
        }
    }
}

/// Attendance service answer to a successful submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttendanceReceipt {
    /// Counts including this attendance, when the service could report them.
    pub status: Option<QuorumStatus>,
}

impl AttendanceReceipt {
    pub fn counted(status: QuorumStatus) -> Self {
        Self {
            status: Some(status),
        }
    }
}

/// Whether the attendance just recorded brought the meeting to quorum.
///
/// `before` is the status read ahead of the submission and decides when
/// present. Otherwise the counts reported with the receipt are used; with
/// neither, quorum is left alone.
pub(crate) fn crossed_quorum(
    before: Option<&QuorumStatus>,
    after: Option<&QuorumStatus>,
) -> bool {
    match (before, after) {
        (Some(before), _) => before.next_reaches_quorum(),
        (None, Some(after)) => {
            after.present >= after.quorum_required
                && after.present.saturating_sub(1) < after.quorum_required
        }
        (None, None) => false,
    }
}

/// Returned to the caller after attendance was recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub meeting_id: String,
    pub voter_id_last_four: VoterIdSuffix,
    pub check_in_time: DateTime<Utc>,
    pub verification_method: VerificationMethod,
    /// Counts after this attendance. `None` when the meeting stats could not
    /// be read; the attendance is recorded all the same.
    pub present_count: Option<u32>,
    pub quorum_required: Option<u32>,
    pub quorum_met: Option<bool>,
    pub request_id: String,
}

/// Allows at most one outstanding submission per session.
#[derive(Debug, Clone, Default)]
pub(crate) struct SubmissionGate(Arc<AtomicBool>);

impl SubmissionGate {
    pub(crate) fn acquire(&self) -> Result<SubmissionGuard, AttendanceError> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AttendanceError::SubmissionInProgress)?;
        Ok(SubmissionGuard(self.0.clone()))
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Releases the gate when dropped, on every exit path.
#[derive(Debug)]
pub(crate) struct SubmissionGuard(Arc<AtomicBool>);

impl Drop for SubmissionGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
