use serde::Serialize;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("Camera device unavailable")]
    DeviceUnavailable,

    #[error("Capture process failed to start: {detail}")]
    StartFailed { detail: String },

    #[error("Unknown capture mode: {0}")]
    UnknownMode(String),

    #[error("Camera is not streaming")]
    NotStreaming,

    #[error("No frame available yet")]
    NoFrameAvailable,

    #[error("Failed to write capture: {0}")]
    WriteFailed(#[source] io::Error),

    #[error("Capture output is already being streamed")]
    StreamBusy,

    #[error("Invalid mode catalog: {0}")]
    InvalidCatalog(String),
}

impl CameraError {
    pub(crate) fn start_failed(detail: impl Into<String>) -> Self {
        CameraError::StartFailed {
            detail: detail.into(),
        }
    }
}

// Allow serializing errors into JSON response bodies
impl Serialize for CameraError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}
