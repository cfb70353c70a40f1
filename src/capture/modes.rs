use std::collections::HashSet;

use serde::Serialize;

use crate::error::CameraError;

/// A named resolution and frame rate the capture process can be asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CaptureMode {
    pub id: &'static str,
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

const BUILTIN_MODES: &[CaptureMode] = &[
    CaptureMode {
        id: "sd_480p",
        label: "SD 640x480 @ 30fps",
        width: 640,
        height: 480,
        frame_rate: 30,
    },
    CaptureMode {
        id: "hd_720p",
        label: "HD 1280x720 @ 80fps",
        width: 1280,
        height: 720,
        frame_rate: 80,
    },
    CaptureMode {
        id: "hd_1080p",
        label: "Full HD 1920x1080 @ 30fps",
        width: 1920,
        height: 1080,
        frame_rate: 30,
    },
    CaptureMode {
        id: "fast_480p",
        label: "SD 640x480 @ 120fps",
        width: 640,
        height: 480,
        frame_rate: 120,
    },
];

/// Fixed, ordered set of capture modes
#[derive(Debug, Clone)]
pub struct ModeCatalog {
    modes: Vec<CaptureMode>,
}

impl ModeCatalog {
    /// Build a catalog, rejecting empty sets, duplicate ids and zero-sized modes
    pub fn new(modes: Vec<CaptureMode>) -> Result<Self, CameraError> {
        if modes.is_empty() {
            return Err(CameraError::InvalidCatalog("no modes defined".into()));
        }

        let mut seen = HashSet::new();
        for mode in &modes {
            if !seen.insert(mode.id) {
                return Err(CameraError::InvalidCatalog(format!(
                    "duplicate mode id {}",
                    mode.id
                )));
            }
            if mode.width == 0 || mode.height == 0 || mode.frame_rate == 0 {
                return Err(CameraError::InvalidCatalog(format!(
                    "mode {} has a zero dimension or frame rate",
                    mode.id
                )));
            }
        }

        Ok(Self { modes })
    }

    /// Modes compiled into the binary, checked like any other catalog
    pub fn builtin() -> Result<Self, CameraError> {
        Self::new(BUILTIN_MODES.to_vec())
    }

    pub fn list(&self) -> &[CaptureMode] {
        &self.modes
    }

    pub fn resolve(&self, id: &str) -> Result<CaptureMode, CameraError> {
        self.modes
            .iter()
            .find(|m| m.id == id)
            .copied()
            .ok_or_else(|| CameraError::UnknownMode(id.to_string()))
    }
}
