//! Per-attempt verification state machine.
//!
//! Each check (blink, movement) moves `NotStarted -> InProgress -> Verified`
//! independently as detector events arrive. Once a check is verified its count
//! is frozen. `face_detected` toggles freely with every frame and never
//! un-verifies a check.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::landmarks::LandmarkFrame;
use crate::liveness::{DetectorConfig, LivenessDetector, LivenessSignals};

#[derive(Error, Debug, PartialEq)]
pub enum ThresholdError {
    #[error("{0} threshold must be at least 1")]
    BelowMinimum(CheckKind),
}

/// Liveliness requirements for one attendance session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub blink_required: u32,
    pub movement_required: u32,
    pub liveliness_enabled: bool,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            blink_required: 2,
            movement_required: 5,
            liveliness_enabled: true,
        }
    }
}

impl Thresholds {
    pub fn new(
        blink_required: u32,
        movement_required: u32,
        liveliness_enabled: bool,
    ) -> Result<Self, ThresholdError> {
        if blink_required < 1 {
            return Err(ThresholdError::BelowMinimum(CheckKind::Blink));
        }
        if movement_required < 1 {
            return Err(ThresholdError::BelowMinimum(CheckKind::Movement));
        }
        Ok(Self {
            blink_required,
            movement_required,
            liveliness_enabled,
        })
    }

    pub fn required(&self, check: CheckKind) -> u32 {
        match check {
            CheckKind::Blink => self.blink_required,
            CheckKind::Movement => self.movement_required,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    Blink,
    Movement,
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blink => f.write_str("blink"),
            Self::Movement => f.write_str("movement"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    NotStarted,
    InProgress,
    Verified,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckProgress {
    pub verified: bool,
    pub count: u32,
}

impl CheckProgress {
    pub fn state(&self) -> CheckState {
        match (self.verified, self.count) {
            (true, _) => CheckState::Verified,
            (false, 0) => CheckState::NotStarted,
            (false, _) => CheckState::InProgress,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VerificationState {
    pub face_detected: bool,
    pub blink: CheckProgress,
    pub movement: CheckProgress,
}

impl VerificationState {
    pub fn check(&self, kind: CheckKind) -> &CheckProgress {
        match kind {
            CheckKind::Blink => &self.blink,
            CheckKind::Movement => &self.movement,
        }
    }

    fn check_mut(&mut self, kind: CheckKind) -> &mut CheckProgress {
        match kind {
            CheckKind::Blink => &mut self.blink,
            CheckKind::Movement => &mut self.movement,
        }
    }

    pub fn all_verified(&self) -> bool {
        self.blink.verified && self.movement.verified
    }
}

/// Emitted when a detector event changes a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationEvent {
    Counted { check: CheckKind, count: u32 },
    /// One-shot confirmation; emitted exactly once per check per attempt.
    Verified(CheckKind),
}

#[derive(Debug, Clone)]
pub struct VerificationMachine {
    thresholds: Thresholds,
    state: VerificationState,
}

impl VerificationMachine {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            state: VerificationState::default(),
        }
    }

    pub fn state(&self) -> &VerificationState {
        &self.state
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Record a frame with a usable face and apply its detector signals.
    ///
    /// With liveliness disabled both checks are forced to verified at their
    /// thresholds and no confirmations are emitted.
    pub fn face_seen(&mut self, signals: LivenessSignals) -> Vec<VerificationEvent> {
        self.state.face_detected = true;

        if !self.thresholds.liveliness_enabled {
            self.state.blink = CheckProgress {
                verified: true,
                count: self.thresholds.blink_required,
            };
            self.state.movement = CheckProgress {
                verified: true,
                count: self.thresholds.movement_required,
            };
            return Vec::new();
        }

        let mut events = Vec::new();
        if signals.blink {
            self.count(CheckKind::Blink, &mut events);
        }
        if signals.movement {
            self.count(CheckKind::Movement, &mut events);
        }
        events
    }

    /// Record a frame without a usable face. Check progress is kept.
    pub fn face_lost(&mut self) {
        self.state.face_detected = false;
    }

    fn count(&mut self, kind: CheckKind, events: &mut Vec<VerificationEvent>) {
        let required = self.thresholds.required(kind);
        let check = self.state.check_mut(kind);
        if check.verified {
            return;
        }
        check.count += 1;
        events.push(VerificationEvent::Counted {
            check: kind,
            count: check.count,
        });
        if check.count >= required {
            check.verified = true;
            tracing::info!(check = %kind, count = check.count, "liveliness check verified");
            events.push(VerificationEvent::Verified(kind));
        }
    }

    /// Whether the liveliness precondition for submission holds.
    pub fn is_satisfied(&self) -> bool {
        !self.thresholds.liveliness_enabled || self.state.all_verified()
    }

    pub fn reset(&mut self) {
        self.state = VerificationState::default();
    }
}

/// What one frame did to an attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameOutcome {
    pub signals: LivenessSignals,
    pub events: Vec<VerificationEvent>,
    /// Whether the verification state differs from before the frame.
    pub changed: bool,
}

/// Detectors and state machine for one attendance attempt.
///
/// Keeps the detection state and the verification state in lockstep: both
/// are cleared together by [`LivelinessTracker::reset`], since detector
/// baselines are relative to the frames of the current attempt.
#[derive(Debug, Clone)]
pub struct LivelinessTracker {
    detector: LivenessDetector,
    machine: VerificationMachine,
}

impl LivelinessTracker {
    pub fn new(thresholds: Thresholds, detector_config: DetectorConfig) -> Self {
        Self {
            detector: LivenessDetector::new(detector_config),
            machine: VerificationMachine::new(thresholds),
        }
    }

    /// Feed one landmark-stream result; `None` means no usable face.
    pub fn observe(&mut self, frame: Option<&LandmarkFrame>) -> FrameOutcome {
        let before = *self.machine.state();
        let (signals, events) = match frame {
            None => {
                self.machine.face_lost();
                (LivenessSignals::default(), Vec::new())
            }
            Some(_) if !self.machine.thresholds().liveliness_enabled => {
                let signals = LivenessSignals::default();
                (signals, self.machine.face_seen(signals))
            }
            Some(frame) => {
                let signals = self.detector.observe(frame);
                (signals, self.machine.face_seen(signals))
            }
        };
        FrameOutcome {
            signals,
            events,
            changed: before != *self.machine.state(),
        }
    }

    pub fn reset(&mut self) {
        self.detector.reset();
        self.machine.reset();
    }

    pub fn state(&self) -> &VerificationState {
        self.machine.state()
    }

    pub fn thresholds(&self) -> &Thresholds {
        self.machine.thresholds()
    }

    pub fn is_satisfied(&self) -> bool {
        self.machine.is_satisfied()
    }

    pub fn is_calibrated(&self) -> bool {
        self.detector.is_calibrated()
    }
}
