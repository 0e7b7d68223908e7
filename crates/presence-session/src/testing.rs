//! In-memory collaborators for session tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use presence_core::{BoundingBox, FaceDescriptor, Thresholds, VideoFrame, DESCRIPTOR_DIM};

use crate::services::{
    AttendanceService, ConfigurationService, FaceRecognitionService, LivelinessContext,
    MeetingLifecycle, ServiceError,
};
use crate::session::Collaborators;
use crate::submission::{AttendanceReceipt, AttendanceSubmission, QuorumStatus};

pub(crate) enum FakeConfiguration {
    Fixed(Thresholds),
    Unreachable,
}

impl ConfigurationService for FakeConfiguration {
    fn liveliness_config(&self, _: LivelinessContext) -> Result<Thresholds, ServiceError> {
        match self {
            Self::Fixed(t) => Ok(*t),
            Self::Unreachable => Err(ServiceError::Transport("connection refused".into())),
        }
    }
}

pub(crate) struct FakeRecognition {
    descriptor: FaceDescriptor,
    face_visible: AtomicBool,
    calls: AtomicUsize,
}

impl FakeRecognition {
    pub(crate) fn descriptor(&self) -> FaceDescriptor {
        self.descriptor.clone()
    }

    /// Every later frame is reported as having no face.
    pub(crate) fn no_face(&self) {
        self.face_visible.store(false, Ordering::SeqCst);
    }

    /// Number of face detection requests.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FaceRecognitionService for FakeRecognition {
    fn detect_face(&self, frame: &VideoFrame) -> Result<Option<BoundingBox>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.face_visible.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(BoundingBox {
            x: frame.width() as f32 * 0.25,
            y: frame.height() as f32 * 0.25,
            width: frame.width() as f32 * 0.5,
            height: frame.height() as f32 * 0.5,
            confidence: 0.98,
        }))
    }

    fn extract_descriptor(
        &self,
        _frame: &VideoFrame,
        _face: &BoundingBox,
    ) -> Result<Option<FaceDescriptor>, ServiceError> {
        Ok(Some(self.descriptor.clone()))
    }
}

pub(crate) struct FakeAttendance {
    responses: Mutex<VecDeque<Result<AttendanceReceipt, ServiceError>>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    last: Mutex<Option<AttendanceSubmission>>,
}

impl FakeAttendance {
    /// Queue the answer to the next call. Unqueued calls succeed with
    /// 4 present out of a quorum of 10.
    pub(crate) fn respond(&self, response: Result<AttendanceReceipt, ServiceError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub(crate) fn delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_submission(&self) -> Option<AttendanceSubmission> {
        self.last.lock().unwrap().clone()
    }
}

impl AttendanceService for FakeAttendance {
    fn mark_attendance(
        &self,
        submission: &AttendanceSubmission,
    ) -> Result<AttendanceReceipt, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        *self.last.lock().unwrap() = Some(submission.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(AttendanceReceipt::counted(QuorumStatus {
                present: 4,
                quorum_required: 10,
                quorum_met: false,
            })))
    }
}

pub(crate) struct FakeLifecycle {
    status: Mutex<Option<QuorumStatus>>,
    status_reads: AtomicUsize,
    refreshes: AtomicUsize,
}

impl FakeLifecycle {
    /// Status reported from now on; `None` makes the stats unreachable.
    /// Starts at 3 present out of a quorum of 10.
    pub(crate) fn set_status(&self, status: Option<QuorumStatus>) {
        *self.status.lock().unwrap() = status;
    }

    pub(crate) fn status_reads(&self) -> usize {
        self.status_reads.load(Ordering::SeqCst)
    }

    pub(crate) fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

impl MeetingLifecycle for FakeLifecycle {
    fn quorum_status(&self, _meeting_id: &str) -> Result<QuorumStatus, ServiceError> {
        self.status_reads.fetch_add(1, Ordering::SeqCst);
        let status = *self.status.lock().unwrap();
        status.ok_or_else(|| ServiceError::Transport("stats unavailable".into()))
    }

    fn refresh(&self, _meeting_id: &str) -> Result<(), ServiceError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One set of fakes, shared between a session and the test observing it.
pub(crate) struct Fakes {
    pub(crate) configuration: Arc<FakeConfiguration>,
    pub(crate) recognition: Arc<FakeRecognition>,
    pub(crate) attendance: Arc<FakeAttendance>,
    pub(crate) lifecycle: Arc<FakeLifecycle>,
}

impl Fakes {
    pub(crate) fn new() -> Self {
        let values = (0..DESCRIPTOR_DIM).map(|i| i as f32 / DESCRIPTOR_DIM as f32).collect();
        Self {
            configuration: Arc::new(FakeConfiguration::Fixed(Thresholds::default())),
            recognition: Arc::new(FakeRecognition {
                descriptor: FaceDescriptor::new(values).unwrap(),
                face_visible: AtomicBool::new(true),
                calls: AtomicUsize::new(0),
            }),
            attendance: Arc::new(FakeAttendance {
                responses: Mutex::new(VecDeque::new()),
                delay: Mutex::new(None),
                calls: AtomicUsize::new(0),
                last: Mutex::new(None),
            }),
            lifecycle: Arc::new(FakeLifecycle {
                status: Mutex::new(Some(QuorumStatus {
                    present: 3,
                    quorum_required: 10,
                    quorum_met: false,
                })),
                status_reads: AtomicUsize::new(0),
                refreshes: AtomicUsize::new(0),
            }),
        }
    }

    pub(crate) fn configuration(mut self, configuration: FakeConfiguration) -> Self {
        self.configuration = Arc::new(configuration);
        self
    }

    /// Thresholds {2, 5} with liveliness checks bypassed.
    pub(crate) fn liveliness_disabled(self) -> Self {
        self.configuration(FakeConfiguration::Fixed(Thresholds {
            liveliness_enabled: false,
            ..Thresholds::default()
        }))
    }

    pub(crate) fn collaborators(&self) -> Collaborators {
        Collaborators {
            configuration: self.configuration.clone(),
            recognition: self.recognition.clone(),
            attendance: self.attendance.clone(),
            lifecycle: self.lifecycle.clone(),
        }
    }
}
