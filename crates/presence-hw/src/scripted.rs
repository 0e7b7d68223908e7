//! Virtual camera and landmark detector that replay pre-scripted data.
//!
//! Used by tests and by offline tooling. Frames are solid colour images with
//! timestamps spaced by a fixed interval, so detection timing is deterministic
//! regardless of how fast the consumer pulls. A [`CameraProbe`] counts
//! opened and stopped streams for leak assertions.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{Rgb, RgbImage};
use presence_core::landmarks::{LEFT_EYE, RIGHT_EYE};
use presence_core::{Point, VideoFrame, MESH_LANDMARK_COUNT};

use crate::device::{CameraBackend, CameraError, CaptureStream, DeviceInfo, Facing};
use crate::landmark_stream::{DetectorError, LandmarkDetector};

/// Lid opening of an open eye in [`synthetic_face`] meshes.
pub const EYE_OPEN: f32 = 0.03;
/// Lid opening of a closed eye in [`synthetic_face`] meshes.
pub const EYE_CLOSED: f32 = 0.005;

#[derive(Debug, Clone)]
pub struct ScriptedDevice {
    id: String,
    label: String,
    facing: Facing,
    color: Rgb<u8>,
    size: (u32, u32),
    frame_interval: Duration,
    pacing: Option<Duration>,
    fail_open: bool,
    fail_after: Option<usize>,
}

impl ScriptedDevice {
    pub fn new(id: &str, facing: Facing) -> Self {
        Self {
            id: id.to_string(),
            label: format!("Scripted camera {id}"),
            facing,
            color: Rgb([128, 128, 128]),
            size: (64, 48),
            frame_interval: Duration::from_millis(33),
            pacing: None,
            fail_open: false,
            fail_after: None,
        }
    }

    pub fn color(mut self, color: [u8; 3]) -> Self {
        self.color = Rgb(color);
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.size = (width, height);
        self
    }

    /// Spacing of frame timestamps.
    pub fn frame_interval_ms(mut self, ms: u64) -> Self {
        self.frame_interval = Duration::from_millis(ms);
        self
    }

    /// Wall-clock sleep before every frame, to emulate a live camera.
    pub fn paced(mut self, pacing: Duration) -> Self {
        self.pacing = Some(pacing);
        self
    }

    /// Opening this device by id fails.
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Each stream on this device delivers `frames` frames, then errors.
    pub fn failing_after(mut self, frames: usize) -> Self {
        self.fail_after = Some(frames);
        self
    }
}

#[derive(Debug, Default)]
struct Counters {
    opened: AtomicUsize,
    stopped: AtomicUsize,
}

/// Stream accounting shared with a [`ScriptedCamera`].
#[derive(Debug, Clone, Default)]
pub struct CameraProbe(Arc<Counters>);

impl CameraProbe {
    pub fn opened(&self) -> usize {
        self.0.opened.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.0.stopped.load(Ordering::SeqCst)
    }

    /// Streams opened but not yet stopped.
    pub fn live_streams(&self) -> usize {
        self.opened().saturating_sub(self.stopped())
    }
}

pub struct ScriptedCamera {
    devices: Vec<ScriptedDevice>,
    denied: bool,
    probe: CameraProbe,
}

impl ScriptedCamera {
    pub fn new(devices: Vec<ScriptedDevice>) -> Self {
        Self {
            devices,
            denied: false,
            probe: CameraProbe::default(),
        }
    }

    /// Refuse camera access, as when the user dismisses the permission prompt.
    pub fn deny_access(mut self) -> Self {
        self.denied = true;
        self
    }

    pub fn probe(&self) -> CameraProbe {
        self.probe.clone()
    }

    fn start(&self, device: &ScriptedDevice) -> Box<dyn CaptureStream> {
        self.probe.0.opened.fetch_add(1, Ordering::SeqCst);
        let (width, height) = device.size;
        Box::new(ScriptedStream {
            facing: device.facing,
            image: RgbImage::from_pixel(width, height, device.color),
            interval: device.frame_interval,
            pacing: device.pacing,
            fail_after: device.fail_after,
            index: 0,
            stopped: false,
            probe: self.probe.clone(),
        })
    }
}

impl CameraBackend for ScriptedCamera {
    fn open_default(&mut self) -> Result<Box<dyn CaptureStream>, CameraError> {
        if self.denied {
            return Err(CameraError::PermissionDenied);
        }
        let device = self.devices.first().ok_or(CameraError::NoCameraFound)?;
        Ok(self.start(device))
    }

    fn video_inputs(&mut self) -> Result<Vec<DeviceInfo>, CameraError> {
        if self.denied {
            return Err(CameraError::PermissionDenied);
        }
        Ok(self
            .devices
            .iter()
            .map(|d| DeviceInfo {
                id: d.id.clone(),
                label: d.label.clone(),
            })
            .collect())
    }

    fn open(&mut self, device_id: &str) -> Result<Box<dyn CaptureStream>, CameraError> {
        if self.denied {
            return Err(CameraError::PermissionDenied);
        }
        let device = self
            .devices
            .iter()
            .find(|d| d.id == device_id)
            .ok_or_else(|| CameraError::StreamStartFailed {
                device: device_id.to_string(),
                reason: "unknown device".into(),
            })?;
        if device.fail_open {
            return Err(CameraError::StreamStartFailed {
                device: device_id.to_string(),
                reason: "device busy".into(),
            });
        }
        Ok(self.start(device))
    }
}

struct ScriptedStream {
    facing: Facing,
    image: RgbImage,
    interval: Duration,
    pacing: Option<Duration>,
    fail_after: Option<usize>,
    index: u32,
    stopped: bool,
    probe: CameraProbe,
}

impl CaptureStream for ScriptedStream {
    fn facing(&self) -> Facing {
        self.facing
    }

    fn next_frame(&mut self) -> Result<VideoFrame, CameraError> {
        if self.stopped {
            return Err(CameraError::StreamClosed);
        }
        if self.fail_after.is_some_and(|n| self.index as usize >= n) {
            return Err(CameraError::Capture("scripted capture failure".into()));
        }
        if let Some(pacing) = self.pacing {
            std::thread::sleep(pacing);
        }
        let frame = VideoFrame {
            image: self.image.clone(),
            timestamp: self.interval * self.index,
        };
        self.index += 1;
        Ok(frame)
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.probe.0.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// One scripted detector result.
#[derive(Debug, Clone)]
pub enum DetectorStep {
    Face(Vec<Point>),
    NoFace,
    Fail,
}

/// Replays detector results in order, then repeats a fallback step.
pub struct ScriptedDetector {
    steps: VecDeque<DetectorStep>,
    fallback: DetectorStep,
    calls: Arc<AtomicUsize>,
}

impl ScriptedDetector {
    pub fn new(steps: Vec<DetectorStep>) -> Self {
        Self {
            steps: steps.into(),
            fallback: DetectorStep::NoFace,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Step returned once the script is exhausted (default: no face).
    pub fn then_repeat(mut self, step: DetectorStep) -> Self {
        self.fallback = step;
        self
    }

    /// Shared count of `detect` calls.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl LandmarkDetector for ScriptedDetector {
    fn detect(&mut self, _frame: &VideoFrame) -> Result<Option<Vec<Point>>, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.steps.pop_front().unwrap_or_else(|| self.fallback.clone()) {
            DetectorStep::Face(points) => Ok(Some(points)),
            DetectorStep::NoFace => Ok(None),
            DetectorStep::Fail => Err(DetectorError::Model("scripted detector failure".into())),
        }
    }
}

/// A full face mesh with both eyes at lid `opening` (eye aspect ratio is
/// `opening / 0.1`), every point shifted by `shift` along x.
pub fn synthetic_face(opening: f32, shift: f32) -> Vec<Point> {
    let mut points = vec![Point::new(0.5, 0.5); MESH_LANDMARK_COUNT];
    for (eye, cx) in [(LEFT_EYE, 0.35), (RIGHT_EYE, 0.65)] {
        let [p0, p1, p2, p3, p4, p5] = eye.0;
        points[p0] = Point::new(cx - 0.05, 0.4);
        points[p1] = Point::new(cx - 0.02, 0.4 - opening / 2.0);
        points[p2] = Point::new(cx + 0.02, 0.4 - opening / 2.0);
        points[p3] = Point::new(cx + 0.05, 0.4);
        points[p4] = Point::new(cx + 0.02, 0.4 + opening / 2.0);
        points[p5] = Point::new(cx - 0.02, 0.4 + opening / 2.0);
    }
    for p in points.iter_mut() {
        p.x += shift;
    }
    points
}

/// `blinks` natural blinks for a camera with the default 33 ms frame
/// interval: one calibration frame, then per blink two open frames followed
/// by two closed frames (a 66 ms closure) and a reopening.
pub fn blink_steps(blinks: usize) -> Vec<DetectorStep> {
    let open = || DetectorStep::Face(synthetic_face(EYE_OPEN, 0.0));
    let closed = || DetectorStep::Face(synthetic_face(EYE_CLOSED, 0.0));
    let mut steps = vec![open()];
    for _ in 0..blinks {
        steps.extend([open(), open(), closed(), closed(), open()]);
    }
    steps
}

/// `frames` frames of a face swaying side to side with open eyes. The first
/// five only build up movement history; every later frame is a movement
/// event.
pub fn movement_steps(frames: usize) -> Vec<DetectorStep> {
    (0..frames)
        .map(|i| {
            let shift = if i % 2 == 0 { 0.0 } else { 0.01 };
            DetectorStep::Face(synthetic_face(EYE_OPEN, shift))
        })
        .collect()
}

/// A steady face with open eyes. Never produces a liveliness event.
pub fn still_face() -> DetectorStep {
    DetectorStep::Face(synthetic_face(EYE_OPEN, 0.0))
}
