//! Snapshot capture: persist the latest live frame as a standalone JPEG

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::capture::Frame;
use crate::error::CameraError;
use crate::pipeline::{StreamSession, StreamState};

/// Describes a snapshot written to disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureArtifact {
    pub filename: String,
    pub size_bytes: u64,
    pub timestamp: DateTime<Utc>,
}

/// Write the session's most recent frame into `dir`
pub fn capture(session: &StreamSession, dir: &Path) -> Result<CaptureArtifact, CameraError> {
    if session.state() != StreamState::Streaming {
        return Err(CameraError::NotStreaming);
    }
    let frame = session.latest_frame().ok_or(CameraError::NoFrameAvailable)?;

    let artifact = write_frame(&frame, dir, Utc::now()).map_err(CameraError::WriteFailed)?;
    metrics::counter!("camstream_snapshots_total").increment(1);
    info!(
        file = %artifact.filename,
        bytes = artifact.size_bytes,
        "Snapshot captured"
    );
    Ok(artifact)
}

/// Attempts at a free name before giving up on a directory
const MAX_NAME_ATTEMPTS: u32 = 100;

pub fn snapshot_filename(timestamp: DateTime<Utc>) -> String {
    format!("capture_{}.jpg", timestamp.format("%Y%m%d_%H%M%S_%3f"))
}

/// Same-millisecond captures get a `_N` suffix instead of replacing each other
fn numbered_filename(timestamp: DateTime<Utc>, attempt: u32) -> String {
    match attempt {
        0 => snapshot_filename(timestamp),
        n => format!("capture_{}_{}.jpg", timestamp.format("%Y%m%d_%H%M%S_%3f"), n),
    }
}

fn write_frame(frame: &Frame, dir: &Path, timestamp: DateTime<Utc>) -> io::Result<CaptureArtifact> {
    fs::create_dir_all(dir)?;

    let (filename, path, mut file) = create_unique(dir, timestamp)?;
    file.write_all(&frame.data)?;
    drop(file);

    let size_bytes = fs::metadata(&path)?.len();
    if size_bytes == 0 || size_bytes != frame.len() as u64 {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!(
                "{} has {} bytes, expected {}",
                path.display(),
                size_bytes,
                frame.len()
            ),
        ));
    }

    Ok(CaptureArtifact {
        filename,
        size_bytes,
        timestamp,
    })
}

fn create_unique(
    dir: &Path,
    timestamp: DateTime<Utc>,
) -> io::Result<(String, PathBuf, fs::File)> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let filename = numbered_filename(timestamp, attempt);
        let path = dir.join(&filename);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((filename, path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free snapshot name for {}", snapshot_filename(timestamp)),
    ))
}
