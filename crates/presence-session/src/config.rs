use std::time::Duration;

use presence_core::DetectorConfig;

/// Session configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the backend API (default: http://localhost:5000/api).
    pub api_url: String,
    /// Bearer token for the attendance endpoints. Unset means unauthenticated.
    pub api_token: Option<String>,
    /// Global timeout for one HTTP call.
    pub http_timeout_secs: u64,
    /// Panchayat scope sent along with attendance submissions.
    pub panchayat_id: Option<String>,
    /// Consecutive frames without a usable face (or without blink calibration)
    /// before a hint is shown. 90 frames is about 3 s at 30 fps.
    pub no_face_hint_frames: u32,
    /// Frames discarded after opening a camera (auto-exposure settling).
    pub warmup_frames: usize,
    /// JPEG quality of the submitted still (1-100).
    pub jpeg_quality: u8,
    /// Blink and movement detector tuning.
    pub detector: DetectorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000/api".to_string(),
            api_token: None,
            http_timeout_secs: 15,
            panchayat_id: None,
            no_face_hint_frames: 90,
            warmup_frames: 0,
            jpeg_quality: 85,
            detector: DetectorConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from `PRESENCE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let d = defaults.detector;

        Self {
            api_url: std::env::var("PRESENCE_API_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_url),
            api_token: std::env::var("PRESENCE_API_TOKEN")
                .ok()
                .filter(|v| !v.is_empty()),
            http_timeout_secs: env_u64("PRESENCE_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs),
            panchayat_id: std::env::var("PRESENCE_PANCHAYAT_ID")
                .ok()
                .filter(|v| !v.is_empty()),
            no_face_hint_frames: env_u32(
                "PRESENCE_NO_FACE_HINT_FRAMES",
                defaults.no_face_hint_frames,
            ),
            warmup_frames: env_usize("PRESENCE_WARMUP_FRAMES", defaults.warmup_frames),
            jpeg_quality: env_u8("PRESENCE_JPEG_QUALITY", defaults.jpeg_quality).clamp(1, 100),
            detector: checked_detector(DetectorConfig {
                blink_min_ms: env_u64("PRESENCE_BLINK_MIN_MS", d.blink_min_ms),
                blink_max_ms: env_u64("PRESENCE_BLINK_MAX_MS", d.blink_max_ms),
                calibration_factor: env_f32(
                    "PRESENCE_BLINK_CALIBRATION_FACTOR",
                    d.calibration_factor,
                ),
                closed_ratio: env_f32("PRESENCE_BLINK_CLOSED_RATIO", d.closed_ratio),
                movement_noise_floor: env_f32(
                    "PRESENCE_MOVEMENT_NOISE_FLOOR",
                    d.movement_noise_floor,
                ),
                movement_threshold: env_f32("PRESENCE_MOVEMENT_THRESHOLD", d.movement_threshold),
                movement_window: env_usize("PRESENCE_MOVEMENT_WINDOW", d.movement_window),
                movement_majority: env_usize("PRESENCE_MOVEMENT_MAJORITY", d.movement_majority),
                movement_min_points: env_usize(
                    "PRESENCE_MOVEMENT_MIN_POINTS",
                    d.movement_min_points,
                ),
            }),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// `detector` if its values are consistent, otherwise the defaults.
fn checked_detector(detector: DetectorConfig) -> DetectorConfig {
    match detector.validate() {
        Ok(()) => detector,
        Err(e) => {
            tracing::warn!(error = %e, "invalid detector tuning, using defaults");
            DetectorConfig::default()
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u8(key: &str, default: u8) -> u8 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
