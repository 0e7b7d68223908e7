//! Active liveliness detection from consecutive face-mesh landmark frames.
//!
//! Two independent cues are extracted per frame:
//!
//! - **Blink**: the eye-aspect-ratio (EAR) of both eyes drops below half of a
//!   per-session baseline and recovers within a short window. The baseline is
//!   calibrated once, from the first frame with a face.
//! - **Macro movement**: five rigid reference points (nose tip, eye corners,
//!   mouth corners) move between frames by more than sensor noise, and most of
//!   the recent frames are classified as moving.
//!
//! Both detectors are pure functions of `(frame, state) -> (event, state)`;
//! [`LivenessDetector`] threads one [`DetectionState`] through them for a
//! camera session.
//!
//! # Threat Coverage
//!
//! - **Blocks:** printed photographs and still images on a screen (no EAR dip,
//!   no reference-point motion), and deliberate long eye closures held up to
//!   the camera (outside the blink window).
//! - **Does not block:** video replay of a blinking, moving face, or 3D masks
//!   with moving eyelids. Identity is matched by an external service.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::landmarks::{LandmarkFrame, LEFT_EYE, MOVEMENT_REFERENCE, RIGHT_EYE};
use crate::types::Point;

/// Tunable detector constants.
///
/// The defaults were chosen empirically and have no documented derivation,
/// so every one of them can be overridden from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Shortest eye closure (exclusive, ms) that counts as a blink.
    pub blink_min_ms: u64,
    /// Longest eye closure (exclusive, ms) that counts as a blink.
    pub blink_max_ms: u64,
    /// Baseline EAR = first observed EAR × this factor.
    pub calibration_factor: f32,
    /// Eyes are closed while EAR < baseline × this ratio.
    pub closed_ratio: f32,
    /// Per-point displacements at or below this are treated as noise.
    pub movement_noise_floor: f32,
    /// Mean displacement above which a frame is classified as moving.
    pub movement_threshold: f32,
    /// Number of recent frame classifications kept.
    pub movement_window: usize,
    /// Moving frames within the window required for a movement event.
    pub movement_majority: usize,
    /// Reference points that must clear the noise floor for a frame to count.
    pub movement_min_points: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            blink_min_ms: 50,
            blink_max_ms: 150,
            calibration_factor: 1.2,
            closed_ratio: 0.5,
            movement_noise_floor: 0.001,
            movement_threshold: 0.0025,
            movement_window: 10,
            movement_majority: 5,
            movement_min_points: 3,
        }
    }
}

/// Tuning that would make a check impossible or trivial to satisfy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectorConfigError {
    #[error("blink window is empty: {min_ms} ms is not below {max_ms} ms")]
    EmptyBlinkWindow { min_ms: u64, max_ms: u64 },
    #[error("{name} out of range: {value}")]
    OutOfRange { name: &'static str, value: f32 },
    #[error("movement majority must be at least 1")]
    ZeroMajority,
    #[error("movement majority {majority} exceeds the {window}-frame window")]
    MajorityExceedsWindow { majority: usize, window: usize },
    #[error("movement needs between 1 and {available} reference points, got {required}")]
    ReferencePoints { required: usize, available: usize },
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), DetectorConfigError> {
        if self.blink_min_ms >= self.blink_max_ms {
            return Err(DetectorConfigError::EmptyBlinkWindow {
                min_ms: self.blink_min_ms,
                max_ms: self.blink_max_ms,
            });
        }
        let ranges: [(&'static str, f32, fn(f32) -> bool); 4] = [
            ("calibration_factor", self.calibration_factor, |v| v > 0.0),
            ("closed_ratio", self.closed_ratio, |v| v > 0.0 && v < 1.0),
            ("movement_noise_floor", self.movement_noise_floor, |v| v >= 0.0),
            ("movement_threshold", self.movement_threshold, |v| v >= 0.0),
        ];
        for (name, value, ok) in ranges {
            if !value.is_finite() || !ok(value) {
                return Err(DetectorConfigError::OutOfRange { name, value });
            }
        }
        if self.movement_majority == 0 {
            return Err(DetectorConfigError::ZeroMajority);
        }
        if self.movement_majority > self.movement_window {
            return Err(DetectorConfigError::MajorityExceedsWindow {
                majority: self.movement_majority,
                window: self.movement_window,
            });
        }
        let available = MOVEMENT_REFERENCE.len();
        if self.movement_min_points == 0 || self.movement_min_points > available {
            return Err(DetectorConfigError::ReferencePoints {
                required: self.movement_min_points,
                available,
            });
        }
        Ok(())
    }
}

/// Blink detector state: calibrated baseline and the start of the current closure.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BlinkState {
    pub baseline_ear: Option<f32>,
    pub closed_since: Option<Duration>,
}

/// Macro-movement detector state: previous reference positions and the
/// bounded history of per-frame moving/still classifications.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MovementState {
    pub previous: Option<[Point; 5]>,
    pub history: VecDeque<bool>,
}

impl MovementState {
    pub fn moving_frames(&self) -> usize {
        self.history.iter().filter(|&&m| m).count()
    }
}

/// Mutable detector state for one camera session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionState {
    pub blink: BlinkState,
    pub movement: MovementState,
}

/// Eye aspect ratio: `(|p1-p5| + |p2-p4|) / (2·|p0-p3|)`.
pub fn eye_aspect_ratio(eye: &[Point; 6]) -> f32 {
    let vertical_a = eye[1].distance(&eye[5]);
    let vertical_b = eye[2].distance(&eye[4]);
    let horizontal = eye[0].distance(&eye[3]);
    (vertical_a + vertical_b) / (2.0 * horizontal)
}

/// Mean EAR of both eyes.
pub fn average_ear(frame: &LandmarkFrame) -> f32 {
    let left = eye_aspect_ratio(&frame.eye(LEFT_EYE));
    let right = eye_aspect_ratio(&frame.eye(RIGHT_EYE));
    (left + right) / 2.0
}

/// Feed one frame to the blink detector.
///
/// The first usable frame calibrates the baseline and never yields a blink.
/// A blink is reported on the frame where the eyes reopen, and only if they
/// stayed closed strictly between `blink_min_ms` and `blink_max_ms`.
pub fn detect_blink(
    frame: &LandmarkFrame,
    state: BlinkState,
    config: &DetectorConfig,
) -> (bool, BlinkState) {
    let ear = average_ear(frame);
    if !ear.is_finite() {
        // Degenerate eye geometry (zero eye width); skip the frame.
        return (false, state);
    }

    let Some(baseline) = state.baseline_ear else {
        let baseline = ear * config.calibration_factor;
        tracing::debug!(ear, baseline, "blink baseline calibrated");
        return (
            false,
            BlinkState {
                baseline_ear: Some(baseline),
                closed_since: None,
            },
        );
    };

    let now = frame.timestamp();
    if ear < baseline * config.closed_ratio {
        return (
            false,
            BlinkState {
                closed_since: Some(state.closed_since.unwrap_or(now)),
                ..state
            },
        );
    }

    let Some(start) = state.closed_since else {
        return (false, state);
    };

    let closed_for = now.saturating_sub(start);
    let is_blink = closed_for > Duration::from_millis(config.blink_min_ms)
        && closed_for < Duration::from_millis(config.blink_max_ms);
    if !is_blink {
        tracing::debug!(
            closed_ms = closed_for.as_millis() as u64,
            "eye closure outside blink window"
        );
    }

    (
        is_blink,
        BlinkState {
            closed_since: None,
            ..state
        },
    )
}

/// Feed one frame to the macro-movement detector.
///
/// The first frame only records reference positions. A frame where fewer
/// than `movement_min_points` reference points clear the noise floor is
/// inconclusive: no event, and neither the history nor the stored reference
/// positions change.
pub fn detect_movement(
    frame: &LandmarkFrame,
    state: MovementState,
    config: &DetectorConfig,
) -> (bool, MovementState) {
    let current = frame.movement_reference();
    let Some(previous) = state.previous else {
        return (
            false,
            MovementState {
                previous: Some(current),
                history: state.history,
            },
        );
    };

    let mut total = 0.0f32;
    let mut valid = 0usize;
    for (cur, prev) in current.iter().zip(previous.iter()) {
        let displacement = cur.distance(prev);
        if displacement > config.movement_noise_floor {
            total += displacement;
            valid += 1;
        }
    }

    if valid < config.movement_min_points {
        return (false, state);
    }

    let mut history = state.history;
    history.push_back(total / valid as f32 > config.movement_threshold);
    while history.len() > config.movement_window {
        history.pop_front();
    }

    let next = MovementState {
        previous: Some(current),
        history,
    };
    let is_movement = next.moving_frames() >= config.movement_majority;
    (is_movement, next)
}

/// Per-frame detector output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LivenessSignals {
    pub blink: bool,
    pub movement: bool,
}

/// Runs both detectors over the frames of one camera session.
#[derive(Debug, Clone, Default)]
pub struct LivenessDetector {
    config: DetectorConfig,
    state: DetectionState,
}

impl LivenessDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            state: DetectionState::default(),
        }
    }

    pub fn observe(&mut self, frame: &LandmarkFrame) -> LivenessSignals {
        let (blink, blink_state) = detect_blink(frame, self.state.blink, &self.config);
        let movement_state = std::mem::take(&mut self.state.movement);
        let (movement, movement_state) = detect_movement(frame, movement_state, &self.config);
        self.state = DetectionState {
            blink: blink_state,
            movement: movement_state,
        };
        LivenessSignals { blink, movement }
    }

    /// Forget the baseline EAR, any open closure and the movement history.
    pub fn reset(&mut self) {
        self.state = DetectionState::default();
    }

    pub fn is_calibrated(&self) -> bool {
        self.state.blink.baseline_ear.is_some()
    }

    pub fn state(&self) -> &DetectionState {
        &self.state
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::landmarks::{EyeIndices, MESH_LANDMARK_COUNT, MOVEMENT_REFERENCE};

    pub(crate) const OPEN: f32 = 0.03;
    pub(crate) const CLOSED: f32 = 0.005;

    fn place_eye(points: &mut [Point], eye: EyeIndices, cx: f32, opening: f32) {
        let [p0, p1, p2, p3, p4, p5] = eye.0;
        points[p0] = Point::new(cx - 0.05, 0.4);
        points[p1] = Point::new(cx - 0.02, 0.4 - opening / 2.0);
        points[p2] = Point::new(cx + 0.02, 0.4 - opening / 2.0);
        points[p3] = Point::new(cx + 0.05, 0.4);
        points[p4] = Point::new(cx + 0.02, 0.4 + opening / 2.0);
        points[p5] = Point::new(cx - 0.02, 0.4 + opening / 2.0);
    }

    /// A synthetic mesh with both eyes at the given lid opening (EAR = opening / 0.1),
    /// all other points at the frame centre shifted by `shift` on the x axis.
    pub(crate) fn face(t_ms: u64, opening: f32, shift: f32) -> LandmarkFrame {
        let mut points = vec![Point::new(0.5, 0.5); MESH_LANDMARK_COUNT];
        place_eye(&mut points, LEFT_EYE, 0.35, opening);
        place_eye(&mut points, RIGHT_EYE, 0.65, opening);
        for p in points.iter_mut() {
            p.x += shift;
        }
        LandmarkFrame::new(points, Duration::from_millis(t_ms)).unwrap()
    }

    /// Closure of `closed_ms` starting at t=100ms after a calibration frame.
    fn blink_sequence(closed_ms: u64) -> Vec<LandmarkFrame> {
        let mut frames = vec![face(0, OPEN, 0.0), face(33, OPEN, 0.0)];
        let mut t = 100;
        while t < 100 + closed_ms {
            frames.push(face(t, CLOSED, 0.0));
            t += 10;
        }
        frames.push(face(100 + closed_ms, OPEN, 0.0));
        frames
    }

    fn blink_events(frames: &[LandmarkFrame]) -> Vec<bool> {
        let config = DetectorConfig::default();
        let mut state = BlinkState::default();
        frames
            .iter()
            .map(|f| {
                let (event, next) = detect_blink(f, state, &config);
                state = next;
                event
            })
            .collect()
    }

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(DetectorConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_config_rejects_unsatisfiable_tuning() {
        let d = DetectorConfig::default();
        let cases = [
            DetectorConfig { blink_min_ms: 150, ..d },
            DetectorConfig { blink_min_ms: 200, ..d },
            DetectorConfig { calibration_factor: 0.0, ..d },
            DetectorConfig { calibration_factor: f32::NAN, ..d },
            DetectorConfig { closed_ratio: -0.5, ..d },
            DetectorConfig { closed_ratio: 1.0, ..d },
            DetectorConfig { movement_noise_floor: -0.001, ..d },
            DetectorConfig { movement_threshold: f32::INFINITY, ..d },
            DetectorConfig { movement_majority: 0, ..d },
            DetectorConfig { movement_window: 4, ..d },
            DetectorConfig { movement_min_points: 0, ..d },
            DetectorConfig { movement_min_points: 6, ..d },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "{config:?} accepted");
        }
    }

    #[test]
    fn test_config_errors_name_the_problem() {
        let d = DetectorConfig::default();
        assert_eq!(
            DetectorConfig { movement_window: 4, ..d }.validate(),
            Err(DetectorConfigError::MajorityExceedsWindow {
                majority: 5,
                window: 4
            })
        );
        assert_eq!(
            DetectorConfig { blink_max_ms: 50, ..d }.validate(),
            Err(DetectorConfigError::EmptyBlinkWindow {
                min_ms: 50,
                max_ms: 50
            })
        );
        assert!(matches!(
            DetectorConfig { closed_ratio: 0.0, ..d }.validate(),
            Err(DetectorConfigError::OutOfRange {
                name: "closed_ratio",
                ..
            })
        ));
        assert_eq!(
            DetectorConfig { movement_min_points: 6, ..d }.validate(),
            Err(DetectorConfigError::ReferencePoints {
                required: 6,
                available: 5
            })
        );
    }

    #[test]
    fn test_ear_of_known_geometry() {
        let frame = face(0, OPEN, 0.0);
        let ear = average_ear(&frame);
        assert!((ear - 0.3).abs() < 1e-4, "ear = {ear}");
    }

    #[test]
    fn test_first_frame_calibrates_without_event() {
        let config = DetectorConfig::default();
        let (event, state) = detect_blink(&face(0, OPEN, 0.0), BlinkState::default(), &config);
        assert!(!event);
        let baseline = state.baseline_ear.unwrap();
        assert!((baseline - 0.36).abs() < 1e-4);
    }

    #[test]
    fn test_calibration_happens_once() {
        let config = DetectorConfig::default();
        let (_, state) = detect_blink(&face(0, OPEN, 0.0), BlinkState::default(), &config);
        let (_, state2) = detect_blink(&face(33, 0.05, 0.0), state, &config);
        assert_eq!(state.baseline_ear, state2.baseline_ear);
    }

    #[test]
    fn test_blink_fires_only_inside_window() {
        for (closed_ms, expected) in [
            (20, false),
            (50, false),
            (60, true),
            (100, true),
            (140, true),
            (150, false),
            (400, false),
        ] {
            let events = blink_events(&blink_sequence(closed_ms));
            let fired = events.iter().filter(|&&e| e).count();
            assert_eq!(fired, usize::from(expected), "closed for {closed_ms}ms");
            // Only the reopening frame may carry the event.
            assert_eq!(*events.last().unwrap(), expected);
        }
    }

    #[test]
    fn test_closure_start_recorded_once() {
        let config = DetectorConfig::default();
        let mut state = BlinkState::default();
        for f in [face(0, OPEN, 0.0), face(100, CLOSED, 0.0), face(120, CLOSED, 0.0)] {
            state = detect_blink(&f, state, &config).1;
        }
        assert_eq!(state.closed_since, Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_rejected_closure_clears_start() {
        let frames = blink_sequence(400);
        let config = DetectorConfig::default();
        let mut state = BlinkState::default();
        for f in &frames {
            state = detect_blink(f, state, &config).1;
        }
        assert_eq!(state.closed_since, None);
        assert!(state.baseline_ear.is_some());
    }

    #[test]
    fn test_custom_blink_window() {
        let config = DetectorConfig {
            blink_min_ms: 100,
            blink_max_ms: 500,
            ..DetectorConfig::default()
        };
        let mut state = BlinkState::default();
        let mut fired = false;
        for f in &blink_sequence(300) {
            let (event, next) = detect_blink(f, state, &config);
            state = next;
            fired |= event;
        }
        assert!(fired);
    }

    /// Frames whose reference points move by 0.005 (moving) or 0.002 (still
    /// but above the noise floor), alternating direction.
    pub(crate) fn movement_frames(classes: &[bool]) -> Vec<LandmarkFrame> {
        let mut frames = vec![face(0, OPEN, 0.0)];
        let mut shift = 0.0;
        for (i, &moving) in classes.iter().enumerate() {
            let step = if moving { 0.005 } else { 0.002 };
            shift += if i % 2 == 0 { step } else { -step };
            frames.push(face((i as u64 + 1) * 33, OPEN, shift));
        }
        frames
    }

    fn movement_events(frames: &[LandmarkFrame]) -> Vec<bool> {
        let config = DetectorConfig::default();
        let mut state = MovementState::default();
        frames
            .iter()
            .map(|f| {
                let (event, next) = detect_movement(f, std::mem::take(&mut state), &config);
                state = next;
                event
            })
            .collect()
    }

    #[test]
    fn test_first_movement_frame_only_records() {
        let config = DetectorConfig::default();
        let (event, state) =
            detect_movement(&face(0, OPEN, 0.0), MovementState::default(), &config);
        assert!(!event);
        assert!(state.previous.is_some());
        assert!(state.history.is_empty());
    }

    #[test]
    fn test_movement_scenario_fires_at_fifth_moving_frame() {
        let classes = [
            true, true, true, true, true, false, false, false, false, false, true, true,
        ];
        let events = movement_events(&movement_frames(&classes));
        // Skip the reference frame; index i corresponds to classes[i].
        let events = &events[1..];
        let first = events.iter().position(|&e| e);
        assert_eq!(first, Some(4));
        // The trailing window keeps at least five moving frames from then on.
        assert!(events[4..].iter().all(|&e| e));
    }

    #[test]
    fn test_majority_holds_for_every_rotation() {
        let base = [true, true, true, true, true, false, false, false, false, false];
        for r in 0..base.len() {
            let mut classes = base;
            classes.rotate_left(r);
            let events = movement_events(&movement_frames(&classes));
            assert!(*events.last().unwrap(), "rotation {r}");
        }
    }

    #[test]
    fn test_four_of_ten_never_fires() {
        let base = [true, false, true, false, true, false, true, false, false, false];
        for r in 0..base.len() {
            let mut classes = base;
            classes.rotate_left(r);
            let events = movement_events(&movement_frames(&classes));
            assert!(events.iter().all(|&e| !e), "rotation {r}");
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let classes = [true; 25];
        let config = DetectorConfig::default();
        let mut state = MovementState::default();
        for f in &movement_frames(&classes) {
            state = detect_movement(f, state, &config).1;
        }
        assert_eq!(state.history.len(), config.movement_window);
    }

    #[test]
    fn test_insufficient_evidence_leaves_state_untouched() {
        let config = DetectorConfig::default();
        let (_, state) = detect_movement(&face(0, OPEN, 0.0), MovementState::default(), &config);
        let (_, state) = detect_movement(&face(33, OPEN, 0.01), state, &config);
        assert_eq!(state.history.len(), 1);

        // Move only two of the five reference points.
        let mut points = face(66, OPEN, 0.01).points().to_vec();
        points[MOVEMENT_REFERENCE[0]].x += 0.01;
        points[MOVEMENT_REFERENCE[3]].x += 0.01;
        let frame = LandmarkFrame::new(points, Duration::from_millis(66)).unwrap();

        let before = state.clone();
        let (event, after) = detect_movement(&frame, state, &config);
        assert!(!event);
        assert_eq!(after, before);
    }

    #[test]
    fn test_static_face_never_moves() {
        let frames: Vec<_> = (0..30).map(|i| face(i * 33, OPEN, 0.0)).collect();
        let events = movement_events(&frames);
        assert!(events.iter().all(|&e| !e));
    }

    #[test]
    fn test_reset_replays_identically() {
        let mut frames = blink_sequence(80);
        let offset = frames.last().unwrap().timestamp() + Duration::from_millis(33);
        let moving: Vec<_> = movement_frames(&[true; 8])
            .into_iter()
            .map(|f| LandmarkFrame::new(f.points().to_vec(), f.timestamp() + offset).unwrap())
            .collect();
        frames.extend(moving);

        let mut detector = LivenessDetector::new(DetectorConfig::default());
        let first: Vec<_> = frames.iter().map(|f| detector.observe(f)).collect();
        assert!(first.iter().any(|s| s.blink));
        assert!(first.iter().any(|s| s.movement));

        detector.reset();
        assert!(!detector.is_calibrated());
        let second: Vec<_> = frames.iter().map(|f| detector.observe(f)).collect();
        assert_eq!(first, second);
    }
}
