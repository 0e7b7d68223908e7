//! `presence replay`: runs a recorded landmark trace through the liveliness
//! detectors and the verification state machine.
//!
//! A trace is JSON Lines, one object per processed frame:
//!
//! ```text
//! {"t_ms": 0, "points": [[0.41, 0.38], [0.43, 0.40], ...]}
//! {"t_ms": 33, "points": null}
//! ```
//!
//! `points: null` (or fewer than 468 points) is a frame without a usable face.

use std::io::BufRead;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use presence_core::{
    CheckKind, DetectorConfig, LandmarkFrame, LivelinessTracker, Point, Thresholds,
    VerificationEvent, VerificationState,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct TraceLine {
    t_ms: u64,
    points: Option<Vec<[f32; 2]>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReplayEvent {
    /// Raw detector output, reported even after the check is verified.
    Detected {
        frame: usize,
        t_ms: u64,
        check: CheckKind,
    },
    Counted {
        frame: usize,
        t_ms: u64,
        check: CheckKind,
        count: u32,
    },
    Verified {
        frame: usize,
        t_ms: u64,
        check: CheckKind,
    },
}

impl std::fmt::Display for ReplayEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Detected { frame, t_ms, check } => {
                write!(f, "frame {frame:>5} @ {t_ms:>6} ms  {check} detected")
            }
            Self::Counted {
                frame,
                t_ms,
                check,
                count,
            } => write!(f, "frame {frame:>5} @ {t_ms:>6} ms  {check} count {count}"),
            Self::Verified { frame, t_ms, check } => {
                write!(f, "frame {frame:>5} @ {t_ms:>6} ms  {check} VERIFIED")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplaySummary {
    pub frames: usize,
    pub face_frames: usize,
    pub state: VerificationState,
    pub satisfied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Replay {
    pub events: Vec<ReplayEvent>,
    pub summary: ReplaySummary,
}

/// Load detector tuning from a TOML file. Missing keys keep their defaults.
pub fn load_tuning(path: &Path) -> Result<DetectorConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read tuning file {}", path.display()))?;
    let tuning: DetectorConfig = toml::from_str(&text)
        .with_context(|| format!("invalid tuning file {}", path.display()))?;
    tuning
        .validate()
        .with_context(|| format!("inconsistent tuning in {}", path.display()))?;
    Ok(tuning)
}

/// Replay a trace read from `reader`.
pub fn replay(
    reader: impl BufRead,
    thresholds: Thresholds,
    tuning: DetectorConfig,
) -> Result<Replay> {
    let mut tracker = LivelinessTracker::new(thresholds, tuning);
    let mut events = Vec::new();
    let mut frames = 0;
    let mut face_frames = 0;

    for (index, line) in reader.lines().enumerate() {
        let line = line.context("failed to read trace")?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: TraceLine = serde_json::from_str(&line)
            .with_context(|| format!("invalid trace entry on line {}", index + 1))?;

        let landmarks = entry.points.and_then(|points| {
            let points = points.into_iter().map(|[x, y]| Point::new(x, y)).collect();
            LandmarkFrame::new(points, Duration::from_millis(entry.t_ms)).ok()
        });
        if landmarks.is_some() {
            face_frames += 1;
        }

        let frame = frames;
        let t_ms = entry.t_ms;
        frames += 1;

        let outcome = tracker.observe(landmarks.as_ref());
        for (fired, check) in [
            (outcome.signals.blink, CheckKind::Blink),
            (outcome.signals.movement, CheckKind::Movement),
        ] {
            if fired {
                events.push(ReplayEvent::Detected { frame, t_ms, check });
            }
        }
        events.extend(outcome.events.into_iter().map(|event| match event {
            VerificationEvent::Counted { check, count } => ReplayEvent::Counted {
                frame,
                t_ms,
                check,
                count,
            },
            VerificationEvent::Verified(check) => ReplayEvent::Verified { frame, t_ms, check },
        }));
    }

    tracing::debug!(frames, face_frames, events = events.len(), "trace replayed");
    Ok(Replay {
        events,
        summary: ReplaySummary {
            frames,
            face_frames,
            state: *tracker.state(),
            satisfied: tracker.is_satisfied(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use presence_hw::scripted::{synthetic_face, EYE_CLOSED, EYE_OPEN};
    use serde_json::json;

    fn line(t_ms: u64, points: Option<Vec<Point>>) -> String {
        let points = points.map(|p| p.iter().map(|p| [p.x, p.y]).collect::<Vec<_>>());
        json!({ "t_ms": t_ms, "points": points }).to_string()
    }

    /// Calibration frame, then one blink with a closure of `closed_ms`.
    fn blink_trace(closed_ms: u64) -> String {
        let mut lines = vec![line(0, Some(synthetic_face(EYE_OPEN, 0.0)))];
        lines.push(line(100, Some(synthetic_face(EYE_CLOSED, 0.0))));
        lines.push(line(100 + closed_ms, Some(synthetic_face(EYE_OPEN, 0.0))));
        lines.join("\n")
    }

    fn run(trace: &str, thresholds: Thresholds) -> Replay {
        replay(trace.as_bytes(), thresholds, DetectorConfig::default()).unwrap()
    }

    #[test]
    fn test_blink_window_in_trace() {
        for (closed_ms, expected) in [(50, false), (51, true), (149, true), (150, false)] {
            let result = run(&blink_trace(closed_ms), Thresholds::default());
            let blinked = result
                .events
                .iter()
                .any(|e| matches!(e, ReplayEvent::Detected { check: CheckKind::Blink, .. }));
            assert_eq!(blinked, expected, "closure of {closed_ms} ms");
        }
    }

    #[test]
    fn test_counts_and_verification_reported() {
        let thresholds = Thresholds::new(1, 5, true).unwrap();
        let result = run(&blink_trace(80), thresholds);
        assert_eq!(
            result.events,
            vec![
                ReplayEvent::Detected {
                    frame: 2,
                    t_ms: 180,
                    check: CheckKind::Blink
                },
                ReplayEvent::Counted {
                    frame: 2,
                    t_ms: 180,
                    check: CheckKind::Blink,
                    count: 1
                },
                ReplayEvent::Verified {
                    frame: 2,
                    t_ms: 180,
                    check: CheckKind::Blink
                },
            ]
        );
        assert!(result.summary.state.blink.verified);
        assert!(!result.summary.satisfied);
    }

    #[test]
    fn test_null_and_short_frames_are_no_face() {
        let trace = [
            line(0, None),
            line(33, Some(vec![Point::new(0.5, 0.5); 10])),
            line(66, Some(synthetic_face(EYE_OPEN, 0.0))),
        ]
        .join("\n");
        let result = run(&trace, Thresholds::default());
        assert_eq!(result.summary.frames, 3);
        assert_eq!(result.summary.face_frames, 1);
        assert!(result.summary.state.face_detected);
    }

    #[test]
    fn test_disabled_liveliness_satisfied_on_first_face() {
        let thresholds = Thresholds::new(2, 5, false).unwrap();
        let result = run(&line(0, Some(synthetic_face(EYE_OPEN, 0.0))), thresholds);
        assert!(result.events.is_empty());
        assert!(result.summary.satisfied);
        assert_eq!(result.summary.state.movement.count, 5);
    }

    #[test]
    fn test_bad_line_reports_line_number() {
        let trace = format!("{}\nnot json\n", line(0, None));
        let err = replay(trace.as_bytes(), Thresholds::default(), DetectorConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
    }

    #[test]
    fn test_tuning_overrides_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tuning.toml");
        std::fs::write(&path, "blink_min_ms = 20\nblink_max_ms = 400\n").unwrap();
        let tuning = load_tuning(&path).unwrap();
        assert_eq!(tuning.blink_min_ms, 20);
        assert_eq!(tuning.blink_max_ms, 400);
        assert_eq!(tuning.movement_window, DetectorConfig::default().movement_window);

        let result = replay(blink_trace(200).as_bytes(), Thresholds::default(), tuning).unwrap();
        assert!(result
            .events
            .iter()
            .any(|e| matches!(e, ReplayEvent::Detected { check: CheckKind::Blink, .. })));
    }

    #[test]
    fn test_inconsistent_tuning_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in [
            ("window.toml", "movement_window = 4\n"),
            ("majority.toml", "movement_majority = 0\n"),
            ("blink.toml", "blink_min_ms = 150\nblink_max_ms = 100\n"),
            ("points.toml", "movement_min_points = 6\n"),
            ("ratio.toml", "closed_ratio = -1.0\n"),
        ] {
            let path = dir.path().join(name);
            std::fs::write(&path, body).unwrap();
            let err = load_tuning(&path).unwrap_err();
            assert!(format!("{err:#}").contains("inconsistent tuning"), "{name}: {err:#}");
        }
    }
}
