//! Attendance session: one camera, one frame loop, one attempt at a time.
//!
//! The frame loop runs on a dedicated OS thread and exclusively owns the open
//! stream, the detection state and the verification state. Callers reach it
//! through a clone-safe [`SessionHandle`] that sends requests over a channel
//! with oneshot replies. The only state shared with input handlers is the
//! [`CameraViewTransform`], published as whole snapshots through a watch
//! channel.
//!
//! Stopping or switching raises the stream's cancel flag before the request is
//! sent, so no further frame is pulled while the loop is on its way to the
//! request; the device is released only by the loop itself.

use std::ops::ControlFlow;
use std::sync::Arc;

use chrono::Utc;
use presence_core::{
    encode_jpeg, render_still, CameraViewTransform, CheckKind, FaceDescriptor, LivelinessTracker,
    Point, SourceRect, StillImage, Thresholds, VerificationEvent, VerificationState, VideoFrame,
};
use presence_hw::{
    CameraBackend, CameraDevice, CameraSet, CancelToken, DeviceManager, Facing, LandmarkDetector,
    LandmarkStream, StreamItem,
};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::Config;
use crate::error::AttendanceError;
use crate::services::{
    load_thresholds, AttendanceService, ConfigurationService, FaceRecognitionService,
    LivelinessContext, MeetingLifecycle,
};
use crate::submission::{
    crossed_quorum, AttendanceRecord, AttendanceSubmission, SubmissionGate, VoterIdSuffix,
};

const REQUEST_QUEUE: usize = 8;

/// Camera access and the face-mesh model for one session.
pub struct Hardware {
    pub camera: Box<dyn CameraBackend>,
    pub detector: Box<dyn LandmarkDetector>,
}

/// Backend collaborators.
#[derive(Clone)]
pub struct Collaborators {
    pub configuration: Arc<dyn ConfigurationService>,
    pub recognition: Arc<dyn FaceRecognitionService>,
    pub attendance: Arc<dyn AttendanceService>,
    pub lifecycle: Arc<dyn MeetingLifecycle>,
}

/// User-visible guidance after sustained detection trouble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivelinessHint {
    FaceNotVisible,
    NotCalibrated,
}

impl std::fmt::Display for LivelinessHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FaceNotVisible => f.write_str("face not visible, look at the camera"),
            Self::NotCalibrated => f.write_str("hold still and look at the camera"),
        }
    }
}

/// Snapshot of a session, published after every change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStatus {
    pub verification: VerificationState,
    pub camera: Option<CameraDevice>,
    pub streaming: bool,
    pub hint: Option<LivelinessHint>,
}

/// Delivered to verification listeners on the frame-loop thread.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Verification(VerificationState),
    /// One-shot confirmation that a check reached its threshold.
    Confirmed(CheckKind),
    Hint(Option<LivelinessHint>),
    CameraChanged(CameraDevice),
    Stopped,
}

pub type VerificationListener = Box<dyn Fn(&SessionEvent) + Send>;

/// Face outline ellipse in normalised frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceOutline {
    pub center: Point,
    pub radius_x: f32,
    pub radius_y: f32,
}

/// One processed frame as the preview should draw it.
#[derive(Debug)]
pub struct PreviewFrame<'a> {
    pub frame: &'a VideoFrame,
    /// The transform snapshot this frame was processed under.
    pub view: CameraViewTransform,
    /// Region of `frame` to scale up into the preview.
    pub source: SourceRect,
    pub outline: Option<FaceOutline>,
    /// Flip horizontally when drawing. Front cameras only; stills are never mirrored.
    pub mirrored: bool,
}

/// Render target for the live preview. Called on the frame-loop thread.
pub trait VideoSink: Send {
    fn render(&mut self, preview: &PreviewFrame<'_>);
}

impl<F> VideoSink for F
where
    F: FnMut(&PreviewFrame<'_>) + Send,
{
    fn render(&mut self, preview: &PreviewFrame<'_>) {
        self(preview)
    }
}

/// A live frame frozen for submission.
struct CapturedFrame {
    frame: VideoFrame,
    still: StillImage,
}

struct Started {
    cameras: CameraSet,
    device: CameraDevice,
}

enum SessionRequest {
    AttachSink(Box<dyn VideoSink>),
    Listen(VerificationListener),
    Capture {
        reply: oneshot::Sender<Result<CapturedFrame, AttendanceError>>,
    },
    Complete {
        reply: oneshot::Sender<()>,
    },
    SwitchCamera {
        reply: oneshot::Sender<Result<CameraDevice, AttendanceError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Clone-safe handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    meeting_id: Arc<str>,
    tx: mpsc::Sender<SessionRequest>,
    view: Arc<watch::Sender<CameraViewTransform>>,
    status: watch::Receiver<SessionStatus>,
    cancel: watch::Receiver<CancelToken>,
    cameras: CameraSet,
    thresholds: Thresholds,
    services: Collaborators,
    gate: SubmissionGate,
}

/// Start an attendance session for `meeting_id`.
///
/// Loads the attendance thresholds (falling back to defaults), enumerates the
/// cameras and opens the front camera, or the back camera if the front one
/// cannot be started. Fails with `NoCameraFound`, `CameraPermissionDenied` or
/// `StreamStartFailed`; no camera stays open on failure.
pub async fn start_session(
    meeting_id: &str,
    hardware: Hardware,
    services: Collaborators,
    config: &Config,
) -> Result<SessionHandle, AttendanceError> {
    let configuration = services.configuration.clone();
    let thresholds = tokio::task::spawn_blocking(move || {
        load_thresholds(configuration.as_ref(), LivelinessContext::Attendance)
    })
    .await
    .unwrap_or_else(|e| {
        tracing::warn!(error = %e, "threshold lookup task failed, using defaults");
        Thresholds::default()
    });

    let (tx, rx) = mpsc::channel(REQUEST_QUEUE);
    let (view_tx, view_rx) = watch::channel(CameraViewTransform::identity());
    let (status_tx, status_rx) = watch::channel(SessionStatus::default());
    let (cancel_tx, cancel_rx) = watch::channel(CancelToken::new());
    let (ready_tx, ready_rx) = oneshot::channel();

    let frame_loop = FrameLoop {
        devices: DeviceManager::new(hardware.camera, config.warmup_frames),
        cameras: CameraSet::default(),
        selected: None,
        stream: None,
        detector: Some(hardware.detector),
        tracker: LivelinessTracker::new(thresholds, config.detector),
        hints: HintTracker::new(config.no_face_hint_frames),
        view: view_rx,
        status: status_tx,
        cancel: cancel_tx,
        sinks: Vec::new(),
        listeners: Vec::new(),
        jpeg_quality: config.jpeg_quality,
    };

    std::thread::Builder::new()
        .name("presence-frames".into())
        .spawn(move || frame_loop.run(rx, ready_tx))
        .map_err(|e| {
            AttendanceError::StreamStartFailed(format!("failed to spawn frame loop: {e}"))
        })?;

    let started = ready_rx.await.map_err(|_| AttendanceError::SessionClosed)??;
    tracing::info!(
        meeting = meeting_id,
        camera = %started.device.label,
        facing = %started.device.facing,
        cameras = started.cameras.len(),
        blink_required = thresholds.blink_required,
        movement_required = thresholds.movement_required,
        liveliness_enabled = thresholds.liveliness_enabled,
        "attendance session started"
    );

    Ok(SessionHandle {
        meeting_id: Arc::from(meeting_id),
        tx,
        view: Arc::new(view_tx),
        status: status_rx,
        cancel: cancel_rx,
        cameras: started.cameras,
        thresholds,
        services,
        gate: SubmissionGate::default(),
    })
}

impl SessionHandle {
    pub fn meeting_id(&self) -> &str {
        &self.meeting_id
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn cameras(&self) -> &CameraSet {
        &self.cameras
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Watch channel carrying every published [`SessionStatus`].
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Whether a submission is outstanding. The UI disables its submit
    /// control while this is true.
    pub fn is_submitting(&self) -> bool {
        self.gate.is_busy()
    }

    pub async fn attach_video_sink(
        &self,
        sink: impl VideoSink + 'static,
    ) -> Result<(), AttendanceError> {
        self.send(SessionRequest::AttachSink(Box::new(sink))).await
    }

    pub async fn on_verification_changed(
        &self,
        listener: impl Fn(&SessionEvent) + Send + 'static,
    ) -> Result<(), AttendanceError> {
        self.send(SessionRequest::Listen(Box::new(listener))).await
    }

    pub fn view(&self) -> CameraViewTransform {
        *self.view.borrow()
    }

    pub fn set_zoom(&self, level: f32) -> CameraViewTransform {
        self.update_view(|v| v.with_zoom(level))
    }

    pub fn zoom_in(&self) -> CameraViewTransform {
        self.update_view(CameraViewTransform::zoom_in)
    }

    pub fn zoom_out(&self) -> CameraViewTransform {
        self.update_view(CameraViewTransform::zoom_out)
    }

    /// Pan by a drag delta in preview-normalised units.
    pub fn pan(&self, dx: f32, dy: f32) -> CameraViewTransform {
        self.update_view(|v| v.with_pan(dx, dy))
    }

    /// Centre the view on a pointer position in the preview (0.0..=1.0).
    pub fn pan_to(&self, x: f32, y: f32) -> CameraViewTransform {
        self.update_view(|v| v.with_pointer(x, y))
    }

    fn update_view(
        &self,
        f: impl FnOnce(CameraViewTransform) -> CameraViewTransform,
    ) -> CameraViewTransform {
        let mut updated = CameraViewTransform::identity();
        self.view.send_modify(|view| {
            *view = f(*view);
            updated = *view;
        });
        updated
    }

    /// Switch between the front and back camera.
    ///
    /// Blocks until the old stream is closed and detection state is reset
    /// before the new stream starts.
    pub async fn switch_camera(&self) -> Result<CameraDevice, AttendanceError> {
        if self.cameras.len() < 2 {
            return Err(AttendanceError::SingleCamera);
        }
        self.cancel.borrow().cancel();
        self.request(|reply| SessionRequest::SwitchCamera { reply })
            .await?
    }

    /// Stop the camera and end the session. Stopping twice is a no-op.
    pub async fn stop_session(&self) {
        self.cancel.borrow().cancel();
        match self.request(|reply| SessionRequest::Stop { reply }).await {
            Ok(()) => tracing::info!(meeting = %self.meeting_id, "attendance session stopped"),
            Err(_) => tracing::debug!(meeting = %self.meeting_id, "session already stopped"),
        }
        self.view.send_replace(CameraViewTransform::identity());
    }

    /// Capture the current frame, identify the face and submit attendance.
    ///
    /// Rejected without any collaborator call when the voter ID suffix is not
    /// four digits or liveliness is required and not yet verified. Not
    /// retried: on failure the camera keeps running for a manual retry. On
    /// success the camera is stopped and verification state is cleared.
    ///
    /// The meeting's quorum status is read ahead of the submission, and the
    /// meeting lifecycle is refreshed once when this attendance brings the
    /// meeting to quorum. Missing counts never fail a recorded attendance.
    pub async fn submit_attendance(
        &self,
        voter_id_last_four: &str,
    ) -> Result<AttendanceRecord, AttendanceError> {
        let voter_id = VoterIdSuffix::parse(voter_id_last_four)?;
        let _guard = self.gate.acquire()?;
        let request_id = uuid::Uuid::new_v4().to_string();

        let captured = self
            .request(|reply| SessionRequest::Capture { reply })
            .await??;

        let recognition = self.services.recognition.clone();
        let frame = captured.frame;
        let descriptor = blocking(move || describe_face(recognition.as_ref(), &frame)).await?;

        // Best effort: without it the counts reported by the receipt decide.
        let lifecycle = self.services.lifecycle.clone();
        let meeting_id = self.meeting_id.to_string();
        let before = match blocking(move || {
            lifecycle
                .quorum_status(&meeting_id)
                .map_err(AttendanceError::from)
        })
        .await
        {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::warn!(
                    meeting = %self.meeting_id,
                    error = %e,
                    "quorum status unavailable"
                );
                None
            }
        };

        let submission = AttendanceSubmission::new(
            self.meeting_id.to_string(),
            voter_id.clone(),
            descriptor,
            captured.still,
        );
        let method = submission.verification_method();
        let attendance = self.services.attendance.clone();
        let receipt = blocking(move || {
            attendance
                .mark_attendance(&submission)
                .map_err(AttendanceError::from)
        })
        .await
        .map_err(|e| {
            tracing::error!(
                meeting = %self.meeting_id,
                request_id = %request_id,
                error = %e,
                "attendance submission failed"
            );
            e
        })?;

        // Attendance is recorded; a session stopped in the meantime is fine.
        self.cancel.borrow().cancel();
        let _ = self
            .request(|reply| SessionRequest::Complete { reply })
            .await;
        self.view.send_replace(CameraViewTransform::identity());

        let after = receipt.status.or_else(|| before.map(|b| b.with_one_more()));
        if crossed_quorum(before.as_ref(), receipt.status.as_ref()) {
            let lifecycle = self.services.lifecycle.clone();
            let meeting_id = self.meeting_id.to_string();
            let refreshed = blocking(move || {
                lifecycle
                    .refresh(&meeting_id)
                    .map_err(AttendanceError::from)
            })
            .await;
            if let Err(e) = refreshed {
                tracing::warn!(meeting = %self.meeting_id, error = %e, "quorum refresh failed");
            }
        }

        let record = AttendanceRecord {
            meeting_id: self.meeting_id.to_string(),
            voter_id_last_four: voter_id,
            check_in_time: Utc::now(),
            verification_method: method,
            present_count: after.map(|s| s.present),
            quorum_required: after.map(|s| s.quorum_required),
            quorum_met: after.map(|s| s.quorum_met),
            request_id,
        };
        tracing::info!(
            meeting = %record.meeting_id,
            request_id = %record.request_id,
            present = ?record.present_count,
            quorum_required = ?record.quorum_required,
            quorum_met = ?record.quorum_met,
            "attendance marked"
        );
        Ok(record)
    }

    async fn send(&self, request: SessionRequest) -> Result<(), AttendanceError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| AttendanceError::SessionClosed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionRequest,
    ) -> Result<T, AttendanceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx)).await?;
        reply_rx.await.map_err(|_| AttendanceError::SessionClosed)
    }
}

/// Run a collaborator call off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, AttendanceError>
where
    F: FnOnce() -> Result<T, AttendanceError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            AttendanceError::TransientNetworkError(format!("collaborator task failed: {e}"))
        })?
}

fn describe_face(
    recognition: &dyn FaceRecognitionService,
    frame: &VideoFrame,
) -> Result<FaceDescriptor, AttendanceError> {
    let face = match recognition.detect_face(frame) {
        Ok(Some(face)) => face,
        Ok(None) => return Err(AttendanceError::FaceNotRecognized),
        Err(e) => {
            tracing::warn!(error = %e, "face detection failed");
            return Err(AttendanceError::FaceNotRecognized);
        }
    };
    match recognition.extract_descriptor(frame, &face) {
        Ok(Some(descriptor)) => Ok(descriptor),
        Ok(None) => Err(AttendanceError::FaceNotRecognized),
        Err(e) => {
            tracing::warn!(
                error = %e,
                confidence = face.confidence,
                "descriptor extraction failed"
            );
            Err(AttendanceError::FaceNotRecognized)
        }
    }
}

/// Counts consecutive troubled frames and decides which hint to show.
#[derive(Debug)]
struct HintTracker {
    after_frames: u32,
    no_face_frames: u32,
    uncalibrated_frames: u32,
    current: Option<LivelinessHint>,
}

impl HintTracker {
    fn new(after_frames: u32) -> Self {
        Self {
            after_frames: after_frames.max(1),
            no_face_frames: 0,
            uncalibrated_frames: 0,
            current: None,
        }
    }

    /// Returns the new hint when it changed.
    fn observe(&mut self, face: bool, calibrated: bool) -> Option<Option<LivelinessHint>> {
        self.no_face_frames = if face { 0 } else { self.no_face_frames.saturating_add(1) };
        self.uncalibrated_frames = if calibrated {
            0
        } else {
            self.uncalibrated_frames.saturating_add(1)
        };

        let hint = if self.no_face_frames >= self.after_frames {
            Some(LivelinessHint::FaceNotVisible)
        } else if self.uncalibrated_frames >= self.after_frames {
            Some(LivelinessHint::NotCalibrated)
        } else {
            None
        };
        if hint == self.current {
            return None;
        }
        self.current = hint;
        Some(hint)
    }

    fn reset(&mut self) {
        *self = Self::new(self.after_frames);
    }
}

struct FrameLoop {
    devices: DeviceManager,
    cameras: CameraSet,
    /// Camera the session is on, even while its stream failed to start.
    selected: Option<CameraDevice>,
    stream: Option<LandmarkStream>,
    /// Parked here while no stream is open.
    detector: Option<Box<dyn LandmarkDetector>>,
    tracker: LivelinessTracker,
    hints: HintTracker,
    view: watch::Receiver<CameraViewTransform>,
    status: watch::Sender<SessionStatus>,
    cancel: watch::Sender<CancelToken>,
    sinks: Vec<Box<dyn VideoSink>>,
    listeners: Vec<VerificationListener>,
    jpeg_quality: u8,
}

impl FrameLoop {
    fn run(
        mut self,
        mut rx: mpsc::Receiver<SessionRequest>,
        ready: oneshot::Sender<Result<Started, AttendanceError>>,
    ) {
        let started = self.start();
        let failed = started.is_err();
        if ready.send(started).is_err() || failed {
            self.close_stream();
            return;
        }
        tracing::debug!("frame loop started");

        loop {
            let request = match rx.try_recv() {
                Ok(request) => request,
                Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {
                    if self.pump() {
                        continue;
                    }
                    // No stream, or paused by a cancel: wait for the request.
                    match rx.blocking_recv() {
                        Some(request) => request,
                        None => break,
                    }
                }
            };
            if self.handle(request).is_break() {
                break;
            }
        }

        self.close_stream();
        tracing::debug!("frame loop exiting");
    }

    fn start(&mut self) -> Result<Started, AttendanceError> {
        let cameras = self.devices.enumerate()?;
        self.cameras = cameras.clone();
        let preferred = cameras
            .preferred()
            .cloned()
            .ok_or(AttendanceError::NoCameraFound)?;

        let device = match self.open(&preferred) {
            Ok(()) => preferred,
            Err(AttendanceError::StreamStartFailed(reason)) => {
                let Some(other) = cameras.other(&preferred).cloned() else {
                    return Err(AttendanceError::StreamStartFailed(reason));
                };
                tracing::warn!(
                    device = %preferred.id,
                    reason = %reason,
                    "camera failed to start, trying the other one"
                );
                self.open(&other)?;
                other
            }
            Err(e) => return Err(e),
        };
        Ok(Started { cameras, device })
    }

    fn handle(&mut self, request: SessionRequest) -> ControlFlow<()> {
        match request {
            SessionRequest::AttachSink(sink) => self.sinks.push(sink),
            SessionRequest::Listen(listener) => self.listeners.push(listener),
            SessionRequest::Capture { reply } => {
                let _ = reply.send(self.capture());
            }
            SessionRequest::Complete { reply } => {
                self.end_attempt();
                let _ = reply.send(());
            }
            SessionRequest::SwitchCamera { reply } => {
                let _ = reply.send(self.switch());
            }
            SessionRequest::Stop { reply } => {
                self.end_attempt();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Process the next frame. Returns false when there is nothing to pull.
    fn pump(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        let next = stream.next();
        let cancelled = stream.cancel_token().is_cancelled();
        match next {
            Some(Ok(item)) => {
                self.on_frame(item);
                true
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "camera stream failed");
                self.close_stream();
                self.publish();
                false
            }
            None if cancelled => false,
            None => {
                tracing::warn!("camera stream ended");
                self.close_stream();
                self.publish();
                false
            }
        }
    }

    fn on_frame(&mut self, item: StreamItem) {
        let outcome = self.tracker.observe(item.landmarks());
        let calibrated =
            self.tracker.is_calibrated() || !self.tracker.thresholds().liveliness_enabled;
        let hint = self.hints.observe(item.landmarks().is_some(), calibrated);

        if outcome.changed {
            self.emit(&SessionEvent::Verification(*self.tracker.state()));
        }
        for event in &outcome.events {
            if let VerificationEvent::Verified(kind) = event {
                self.emit(&SessionEvent::Confirmed(*kind));
            }
        }
        if let Some(hint) = hint {
            if let Some(h) = hint {
                tracing::info!(hint = %h, "liveliness hint shown");
            }
            self.emit(&SessionEvent::Hint(hint));
        }
        if outcome.changed || hint.is_some() {
            self.publish();
        }

        self.render(&item);
    }

    fn render(&mut self, item: &StreamItem) {
        if self.sinks.is_empty() {
            return;
        }
        let mirrored = self
            .stream
            .as_ref()
            .is_some_and(|s| s.device().facing != Facing::Back);
        let frame = item.frame();
        let view = *self.view.borrow();
        let outline = item.landmarks().map(|landmarks| {
            let (center, radius_x, radius_y) = landmarks.outline();
            FaceOutline {
                center,
                radius_x,
                radius_y,
            }
        });
        let preview = PreviewFrame {
            frame,
            view,
            source: view.source_rect(frame.width(), frame.height()),
            outline,
            mirrored,
        };
        for sink in &mut self.sinks {
            sink.render(&preview);
        }
    }

    fn capture(&mut self) -> Result<CapturedFrame, AttendanceError> {
        if !self.tracker.is_satisfied() {
            let state = self.tracker.state();
            let missing = if state.blink.verified {
                CheckKind::Movement
            } else {
                CheckKind::Blink
            };
            return Err(AttendanceError::LivelinessNotSatisfied(missing));
        }
        let stream = self.stream.as_mut().ok_or(AttendanceError::NoActiveStream)?;
        let frame = stream.capture_frame()?;

        // One snapshot for the whole still, the same value the preview uses.
        let view = *self.view.borrow();
        let rendered = render_still(&frame, &view)?;
        let still = encode_jpeg(&rendered, self.jpeg_quality)?;
        tracing::debug!(
            zoom = view.scale(),
            width = still.width,
            height = still.height,
            bytes = still.jpeg.len(),
            "still captured"
        );
        Ok(CapturedFrame { frame, still })
    }

    fn switch(&mut self) -> Result<CameraDevice, AttendanceError> {
        let current = self.selected.clone().ok_or(AttendanceError::NoActiveStream)?;
        let target = self
            .cameras
            .other(&current)
            .cloned()
            .ok_or(AttendanceError::SingleCamera)?;

        self.close_stream();
        self.tracker.reset();
        self.hints.reset();
        self.publish();
        tracing::info!(from = %current.facing, to = %target.facing, "switching camera");

        self.open(&target)?;
        Ok(target)
    }

    fn open(&mut self, device: &CameraDevice) -> Result<(), AttendanceError> {
        self.selected = Some(device.clone());
        let active = self.devices.open(device)?;
        let detector = self.detector.take().ok_or(AttendanceError::NoActiveStream)?;

        let token = CancelToken::new();
        self.cancel.send_replace(token.clone());
        self.stream = Some(LandmarkStream::new(active, detector, token));

        self.emit(&SessionEvent::CameraChanged(device.clone()));
        self.publish();
        Ok(())
    }

    fn close_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.detector = Some(stream.close());
        }
    }

    /// Stop the camera and clear all per-attempt state.
    fn end_attempt(&mut self) {
        self.close_stream();
        self.tracker.reset();
        self.hints.reset();
        self.publish();
        self.emit(&SessionEvent::Stopped);
    }

    fn publish(&self) {
        self.status.send_replace(SessionStatus {
            verification: *self.tracker.state(),
            camera: self.stream.as_ref().map(|s| s.device().clone()),
            streaming: self.stream.is_some(),
            hint: self.hints.current,
        });
    }

    fn emit(&self, event: &SessionEvent) {
        for listener in &self.listeners {
            listener(event);
        }
    }
}
