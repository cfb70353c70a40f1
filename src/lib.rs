pub mod capture;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod snapshot;
pub mod utils;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use capture::{CaptureMode, Frame, FrameDemuxer, ModeCatalog, ProcessSupervisor};
pub use error::CameraError;
pub use pipeline::{FrameStream, SessionStatus, StreamSession, StreamState};
pub use snapshot::CaptureArtifact;

/// Config file read when no path is given on the command line
pub const DEFAULT_CONFIG_FILE: &str = "camstream.toml";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Directory snapshots are written to
    pub capture_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Capture program emitting MJPEG on stdout
    pub program: String,
    /// Arguments; `{width}`, `{height}` and `{framerate}` are filled from the mode
    pub args: Vec<String>,
    /// Diagnostic command used to detect the camera
    pub probe_program: String,
    pub probe_args: Vec<String>,
    pub probe_timeout_ms: u64,
    /// How long a fresh process must survive before it counts as started
    pub start_grace_ms: u64,
    /// Time allowed between SIGTERM and SIGKILL
    pub stop_timeout_ms: u64,
    pub read_chunk_size: usize,
    /// Frames buffered between the reader thread and a slow consumer
    pub channel_capacity: usize,
    pub max_frame_bytes: usize,
    pub default_mode: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".into(),
            capture_dir: PathBuf::from("captures"),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let args = [
            "-t", "0", // Run indefinitely
            "--codec", "mjpeg",
            "--width", "{width}",
            "--height", "{height}",
            "--framerate", "{framerate}",
            "--nopreview",
            "--flush",
            "-o", "-", // Output to stdout
        ];

        Self {
            program: "rpicam-vid".into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            probe_program: "rpicam-hello".into(),
            probe_args: vec!["--list-cameras".into()],
            probe_timeout_ms: 5_000,
            start_grace_ms: 500,
            stop_timeout_ms: 5_000,
            read_chunk_size: 64 * 1024,
            channel_capacity: 8,
            max_frame_bytes: capture::demux::DEFAULT_MAX_FRAME_BYTES,
            default_mode: "sd_480p".into(),
        }
    }
}

impl CaptureConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn start_grace(&self) -> Duration {
        Duration::from_millis(self.start_grace_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Config {
    /// Load from an optional TOML file, then `CAMSTREAM__SECTION__KEY` overrides.
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let file = match path {
            Some(p) => config::File::with_name(p),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix("CAMSTREAM").separator("__"))
            .build()?
            .try_deserialize()
    }
}
