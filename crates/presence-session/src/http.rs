//! Backend collaborators over HTTP + JSON.
//!
//! Endpoints, relative to the API base URL:
//!
//! - `GET  /platform-configurations/camera`: per-context liveliness settings
//! - `POST /gram-sabha/{meeting}/mark-attendance`: record one attendance
//! - `GET  /gram-sabha/{meeting}/attendance-stats`: present and quorum counts

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use presence_core::Thresholds;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use ureq::Agent;

use crate::config::Config;
use crate::services::{
    AttendanceService, ConfigurationService, LivelinessContext, MeetingLifecycle, ServiceError,
    StaticToken, TokenProvider,
};
use crate::submission::{AttendanceReceipt, AttendanceSubmission, QuorumStatus};

/// HTTP client for the configuration, attendance and meeting endpoints.
#[derive(Clone)]
pub struct HttpBackend {
    agent: Agent,
    base_url: String,
    token: Arc<dyn TokenProvider>,
    panchayat_id: Option<String>,
}

impl HttpBackend {
    pub fn new(config: &Config, token: Arc<dyn TokenProvider>) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(config.http_timeout()))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token,
            panchayat_id: config.panchayat_id.clone(),
        }
    }

    /// Backend authenticated with the static token from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config, Arc::new(StaticToken::new(config.api_token.clone())))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn bearer(&self) -> Option<String> {
        self.token.token().map(|t| format!("Bearer {t}"))
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ServiceError> {
        let url = self.url(path);
        let mut request = self.agent.get(&url);
        if let Some(auth) = self.bearer() {
            request = request.header("Authorization", auth);
        }
        let response = request
            .call()
            .map_err(|e| ServiceError::Transport(format!("GET {url}: {e}")))?;
        read_response(response)
    }

    fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, ServiceError> {
        let url = self.url(path);
        let mut request = self.agent.post(&url);
        if let Some(auth) = self.bearer() {
            request = request.header("Authorization", auth);
        }
        let response = request
            .send_json(body)
            .map_err(|e| ServiceError::Transport(format!("POST {url}: {e}")))?;
        read_response(response)
    }

    fn stats(&self, meeting_id: &str) -> Result<QuorumStatus, ServiceError> {
        self.get_json(&format!("gram-sabha/{meeting_id}/attendance-stats"))
    }
}

fn read_response<T: DeserializeOwned>(
    mut response: ureq::http::Response<ureq::Body>,
) -> Result<T, ServiceError> {
    let status = response.status();
    let text = response
        .body_mut()
        .read_to_string()
        .map_err(|e| ServiceError::Transport(e.to_string()))?;

    if !status.is_success() {
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|body| body.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| format!("request failed with status {status}"));
        if status.is_server_error() {
            return Err(ServiceError::Transport(message));
        }
        return Err(ServiceError::Rejected {
            status: status.as_u16(),
            message,
        });
    }
    serde_json::from_str(&text).map_err(|e| ServiceError::InvalidResponse(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct CameraSettings {
    #[serde(default)]
    value: CameraSettingsValue,
}

#[derive(Debug, Default, Deserialize)]
struct CameraSettingsValue {
    #[serde(default)]
    liveliness: Value,
    #[serde(default)]
    blink_count: Value,
    #[serde(default)]
    movement_count: Value,
}

/// Thresholds for `context` from the camera settings document; each missing
/// field falls back to its default on its own.
fn thresholds_from_settings(
    settings: CameraSettings,
    context: LivelinessContext,
) -> Result<Thresholds, ServiceError> {
    let defaults = Thresholds::default();
    let key = context.key();
    let value = settings.value;

    let enabled = value
        .liveliness
        .get(key)
        .and_then(Value::as_bool)
        .unwrap_or(defaults.liveliness_enabled);
    let count = |v: &Value, default: u32| {
        v.get(key)
            .and_then(Value::as_u64)
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .unwrap_or(default)
    };
    let blink = count(&value.blink_count, defaults.blink_required);
    let movement = count(&value.movement_count, defaults.movement_required);

    Thresholds::new(blink, movement, enabled)
        .map_err(|e| ServiceError::InvalidResponse(e.to_string()))
}

/// JSON body of a mark-attendance request.
fn attendance_body(submission: &AttendanceSubmission, panchayat_id: Option<&str>) -> Value {
    json!({
        "faceDescriptor": submission.face_descriptor(),
        "voterIdLastFour": submission.voter_id_last_four(),
        "panchayatId": panchayat_id,
        "faceImage": jpeg_data_url(&submission.captured_image().jpeg),
        "verificationMethod": submission.verification_method(),
    })
}

fn jpeg_data_url(jpeg: &[u8]) -> String {
    format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg))
}

impl ConfigurationService for HttpBackend {
    fn liveliness_config(&self, context: LivelinessContext) -> Result<Thresholds, ServiceError> {
        let settings: CameraSettings = self.get_json("platform-configurations/camera")?;
        let thresholds = thresholds_from_settings(settings, context)?;
        tracing::debug!(
            context = %context,
            blink_required = thresholds.blink_required,
            movement_required = thresholds.movement_required,
            liveliness_enabled = thresholds.liveliness_enabled,
            "liveliness configuration loaded"
        );
        Ok(thresholds)
    }
}

impl AttendanceService for HttpBackend {
    fn mark_attendance(
        &self,
        submission: &AttendanceSubmission,
    ) -> Result<AttendanceReceipt, ServiceError> {
        let meeting_id = submission.meeting_id();
        let body = attendance_body(submission, self.panchayat_id.as_deref());
        let _: Value = self.post_json(&format!("gram-sabha/{meeting_id}/mark-attendance"), &body)?;

        // The mark endpoint does not report counts. Reading them back is best
        // effort: the attendance is recorded either way.
        match self.stats(meeting_id) {
            Ok(stats) => Ok(AttendanceReceipt::counted(stats)),
            Err(e) => {
                tracing::warn!(
                    meeting = meeting_id,
                    error = %e,
                    "attendance marked but stats unavailable"
                );
                Ok(AttendanceReceipt::default())
            }
        }
    }
}

impl MeetingLifecycle for HttpBackend {
    fn quorum_status(&self, meeting_id: &str) -> Result<QuorumStatus, ServiceError> {
        self.stats(meeting_id)
    }

    fn refresh(&self, meeting_id: &str) -> Result<(), ServiceError> {
        let status = self.stats(meeting_id)?;
        tracing::info!(
            meeting = meeting_id,
            present = status.present,
            quorum_required = status.quorum_required,
            quorum_met = status.quorum_met,
            "meeting quorum refreshed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::VoterIdSuffix;
    use presence_core::{FaceDescriptor, StillImage, DESCRIPTOR_DIM};
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::Mutex;

    fn settings(json: &str) -> CameraSettings {
        serde_json::from_str(json).unwrap()
    }

    fn submission() -> AttendanceSubmission {
        AttendanceSubmission::new(
            "meeting-1".into(),
            VoterIdSuffix::parse("4321").unwrap(),
            FaceDescriptor::new(vec![0.25; DESCRIPTOR_DIM]).unwrap(),
            StillImage {
                jpeg: vec![0xFF, 0xD8, 0xFF],
                width: 1,
                height: 1,
            },
        )
    }

    /// Read one request off `reader`, body included, and return its request line.
    fn read_request(reader: &mut impl BufRead) -> String {
        let mut request_line = String::new();
        reader.read_line(&mut request_line).unwrap();
        let mut content_length = 0;
        let mut chunked = false;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if line.trim().is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                let value = value.trim();
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.parse().unwrap();
                } else if name.eq_ignore_ascii_case("transfer-encoding") {
                    chunked = value.eq_ignore_ascii_case("chunked");
                }
            }
        }
        if chunked {
            loop {
                let mut size = String::new();
                reader.read_line(&mut size).unwrap();
                let size = usize::from_str_radix(size.trim(), 16).unwrap();
                let mut chunk = vec![0; size + 2];
                reader.read_exact(&mut chunk).unwrap();
                if size == 0 {
                    break;
                }
            }
        } else {
            let mut body = vec![0; content_length];
            reader.read_exact(&mut body).unwrap();
        }
        request_line.trim().to_string()
    }

    /// Answer one request per connection with the given statuses and bodies,
    /// in order. Returns the API base URL and the request lines seen.
    fn serve(responses: Vec<(u16, &'static str)>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        std::thread::spawn(move || {
            for (status, body) in responses {
                let Ok((mut stream, _)) = listener.accept() else {
                    return;
                };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                log.lock().unwrap().push(read_request(&mut reader));
                let reply = format!(
                    "HTTP/1.1 {status} Canned\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(reply.as_bytes()).unwrap();
                stream.flush().unwrap();
            }
        });
        (format!("http://{addr}/api"), seen)
    }

    fn backend(api_url: String) -> HttpBackend {
        HttpBackend::from_config(&Config {
            api_url,
            http_timeout_secs: 5,
            ..Config::default()
        })
    }

    #[test]
    fn test_thresholds_read_per_context() {
        let doc = r#"{"value":{
            "liveliness":{"attendance":false,"faceRegistration":true,"citizenLogin":true},
            "blink_count":{"attendance":3,"faceRegistration":2,"citizenLogin":4},
            "movement_count":{"attendance":7,"faceRegistration":5,"citizenLogin":5}
        }}"#;
        let attendance =
            thresholds_from_settings(settings(doc), LivelinessContext::Attendance).unwrap();
        assert_eq!(attendance, Thresholds::new(3, 7, false).unwrap());
        let login =
            thresholds_from_settings(settings(doc), LivelinessContext::CitizenLogin).unwrap();
        assert_eq!(login, Thresholds::new(4, 5, true).unwrap());
    }

    #[test]
    fn test_missing_fields_fall_back_individually() {
        let doc = r#"{"value":{"blink_count":{"attendance":4}}}"#;
        let t = thresholds_from_settings(settings(doc), LivelinessContext::Attendance).unwrap();
        assert_eq!(t, Thresholds::new(4, 5, true).unwrap());

        let t = thresholds_from_settings(settings("{}"), LivelinessContext::Attendance).unwrap();
        assert_eq!(t, Thresholds::default());
    }

    #[test]
    fn test_zero_threshold_is_invalid_response() {
        let doc = r#"{"value":{"movement_count":{"attendance":0}}}"#;
        let err =
            thresholds_from_settings(settings(doc), LivelinessContext::Attendance).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidResponse(_)));
    }

    #[test]
    fn test_attendance_body_shape() {
        let body = attendance_body(&submission(), Some("p-9"));
        assert_eq!(body["voterIdLastFour"], "4321");
        assert_eq!(body["panchayatId"], "p-9");
        assert_eq!(body["verificationMethod"], "FACE_RECOGNITION");
        assert_eq!(body["faceDescriptor"].as_array().unwrap().len(), DESCRIPTOR_DIM);
        assert_eq!(body["faceImage"], "data:image/jpeg;base64,/9j/");
    }

    #[test]
    fn test_unreachable_backend_is_transport_error() {
        let config = Config {
            api_url: "http://127.0.0.1:1/api".into(),
            http_timeout_secs: 2,
            ..Config::default()
        };
        let backend = HttpBackend::from_config(&config);
        let err = backend
            .liveliness_config(LivelinessContext::Attendance)
            .unwrap_err();
        assert!(matches!(err, ServiceError::Transport(_)));
    }

    #[test]
    fn test_mark_attendance_reads_stats_back() {
        let (url, seen) = serve(vec![
            (200, r#"{"success":true}"#),
            (200, r#"{"present":10,"quorumRequired":10,"quorumMet":true}"#),
        ]);
        let receipt = backend(url).mark_attendance(&submission()).unwrap();
        assert_eq!(
            receipt.status,
            Some(QuorumStatus {
                present: 10,
                quorum_required: 10,
                quorum_met: true
            })
        );
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], "POST /api/gram-sabha/meeting-1/mark-attendance HTTP/1.1");
        assert_eq!(seen[1], "GET /api/gram-sabha/meeting-1/attendance-stats HTTP/1.1");
    }

    #[test]
    fn test_marked_attendance_survives_missing_stats() {
        let (url, seen) = serve(vec![
            (200, r#"{"success":true}"#),
            (503, r#"{"message":"stats offline"}"#),
        ]);
        let receipt = backend(url).mark_attendance(&submission()).unwrap();
        assert_eq!(receipt.status, None);
        let posts = seen
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line.starts_with("POST"))
            .count();
        assert_eq!(posts, 1);
    }

    #[test]
    fn test_rejected_mark_skips_stats() {
        let (url, seen) = serve(vec![(
            400,
            r#"{"message":"Attendance already marked for this user"}"#,
        )]);
        let err = backend(url).mark_attendance(&submission()).unwrap_err();
        match err {
            ServiceError::Rejected { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Attendance already marked for this user");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_url_joining() {
        let config = Config {
            api_url: "http://example.test/api/".into(),
            ..Config::default()
        };
        let backend = HttpBackend::from_config(&config);
        assert_eq!(
            backend.url("/gram-sabha/m1/attendance-stats"),
            "http://example.test/api/gram-sabha/m1/attendance-stats"
        );
    }
}
