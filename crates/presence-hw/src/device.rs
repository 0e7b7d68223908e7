//! Camera discovery and stream ownership.
//!
//! Discovery follows the browser-style permission model: a throwaway capture
//! triggers the permission prompt (and unlocks device labels), then each
//! video input is briefly opened to read the facing it reports. Every probe
//! stream is stopped right after the read. The first front and the first back
//! device found are kept; everything else is ignored.

use presence_core::VideoFrame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("no camera found")]
    NoCameraFound,
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("failed to start camera stream on {device}: {reason}")]
    StreamStartFailed { device: String, reason: String },
    #[error("frame capture failed: {0}")]
    Capture(String),
    #[error("camera stream is closed")]
    StreamClosed,
}

/// Facing reported by a camera's video track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facing {
    Front,
    Back,
    Unknown,
}

impl std::fmt::Display for Facing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Front => f.write_str("front"),
            Self::Back => f.write_str("back"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// A video input as listed by the platform, before probing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub label: String,
}

/// A classified camera. Immutable once enumerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDevice {
    pub id: String,
    pub label: String,
    pub facing: Facing,
}

/// Platform camera access.
pub trait CameraBackend: Send {
    /// Open whichever camera the platform picks. Used once to trigger the
    /// permission prompt.
    fn open_default(&mut self) -> Result<Box<dyn CaptureStream>, CameraError>;

    /// List video input devices.
    fn video_inputs(&mut self) -> Result<Vec<DeviceInfo>, CameraError>;

    /// Open a capture stream on a specific device.
    fn open(&mut self, device_id: &str) -> Result<Box<dyn CaptureStream>, CameraError>;
}

/// A running capture on one device.
pub trait CaptureStream: Send {
    /// Facing attribute reported by the stream's video track.
    fn facing(&self) -> Facing;

    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<VideoFrame, CameraError>;

    /// Release the device. Called at most once by [`ActiveStream`].
    fn stop(&mut self);
}

/// Front and back cameras retained from enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraSet {
    pub front: Option<CameraDevice>,
    pub back: Option<CameraDevice>,
}

impl CameraSet {
    pub fn len(&self) -> usize {
        usize::from(self.front.is_some()) + usize::from(self.back.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The camera an attempt starts on: front if present, else back.
    pub fn preferred(&self) -> Option<&CameraDevice> {
        self.front.as_ref().or(self.back.as_ref())
    }

    /// The camera on the other side of `current`, if there is one.
    pub fn other(&self, current: &CameraDevice) -> Option<&CameraDevice> {
        [self.front.as_ref(), self.back.as_ref()]
            .into_iter()
            .flatten()
            .find(|d| d.id != current.id)
    }
}

/// An open stream on a classified device.
///
/// Closing is idempotent and also happens on drop, so a stream can never
/// outlive its owner.
pub struct ActiveStream {
    device: CameraDevice,
    inner: Option<Box<dyn CaptureStream>>,
}

impl ActiveStream {
    pub fn device(&self) -> &CameraDevice {
        &self.device
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    pub fn next_frame(&mut self) -> Result<VideoFrame, CameraError> {
        match self.inner.as_mut() {
            Some(stream) => stream.next_frame(),
            None => Err(CameraError::StreamClosed),
        }
    }

    /// Stop the stream. Closing an already-closed stream is a no-op.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.inner.take() {
            stream.stop();
            tracing::info!(device = %self.device.id, facing = %self.device.facing, "camera closed");
        }
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ActiveStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveStream")
            .field("device", &self.device)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Enumerates, classifies and opens cameras through a [`CameraBackend`].
pub struct DeviceManager {
    backend: Box<dyn CameraBackend>,
    warmup_frames: usize,
}

impl DeviceManager {
    /// `warmup_frames` are read and discarded after every open (camera
    /// auto-exposure settling); a failure there counts as a failed start.
    pub fn new(backend: Box<dyn CameraBackend>, warmup_frames: usize) -> Self {
        Self {
            backend,
            warmup_frames,
        }
    }

    /// Discover the front and back cameras.
    ///
    /// Fails with [`CameraError::NoCameraFound`] when the platform lists no
    /// video input or every probe fails, and with
    /// [`CameraError::PermissionDenied`] when access is refused.
    pub fn enumerate(&mut self) -> Result<CameraSet, CameraError> {
        let mut permission_probe = self.backend.open_default()?;
        permission_probe.stop();

        let inputs = self.backend.video_inputs()?;
        if inputs.is_empty() {
            return Err(CameraError::NoCameraFound);
        }

        let mut set = CameraSet::default();
        for info in inputs {
            let mut probe = match self.backend.open(&info.id) {
                Ok(probe) => probe,
                Err(CameraError::PermissionDenied) => return Err(CameraError::PermissionDenied),
                Err(e) => {
                    tracing::warn!(
                        device = %info.id,
                        label = %info.label,
                        error = %e,
                        "camera probe failed"
                    );
                    continue;
                }
            };
            let facing = probe.facing();
            probe.stop();

            let device = CameraDevice {
                id: info.id,
                label: info.label,
                facing,
            };
            // Cameras that report no facing are treated as front cameras.
            let slot = match facing {
                Facing::Front | Facing::Unknown => &mut set.front,
                Facing::Back => &mut set.back,
            };
            if slot.is_none() {
                tracing::debug!(device = %device.id, facing = %facing, "camera classified");
                *slot = Some(device);
            }
            if set.front.is_some() && set.back.is_some() {
                break;
            }
        }

        if set.is_empty() {
            return Err(CameraError::NoCameraFound);
        }
        tracing::info!(
            front = ?set.front.as_ref().map(|d| &d.label),
            back = ?set.back.as_ref().map(|d| &d.label),
            "cameras enumerated"
        );
        Ok(set)
    }

    /// Open a stream on `device` and discard the warmup frames.
    ///
    /// On any failure after the device was opened, the stream is stopped
    /// before the error is returned.
    pub fn open(&mut self, device: &CameraDevice) -> Result<ActiveStream, CameraError> {
        let inner = self.backend.open(&device.id).map_err(|e| match e {
            CameraError::PermissionDenied => CameraError::PermissionDenied,
            other => CameraError::StreamStartFailed {
                device: device.id.clone(),
                reason: other.to_string(),
            },
        })?;

        let mut stream = ActiveStream {
            device: device.clone(),
            inner: Some(inner),
        };
        for _ in 0..self.warmup_frames {
            if let Err(e) = stream.next_frame() {
                stream.close();
                return Err(CameraError::StreamStartFailed {
                    device: device.id.clone(),
                    reason: e.to_string(),
                });
            }
        }

        tracing::info!(device = %device.id, facing = %device.facing, "camera opened");
        Ok(stream)
    }
}
