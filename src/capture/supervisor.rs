//! Capture process supervision
//!
//! Launches the external MJPEG capture program, checks it survives start-up,
//! and tears it down with SIGTERM followed by SIGKILL.

use std::io::{BufRead, BufReader};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread;
use std::time::Instant;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, instrument, warn};

use crate::capture::CaptureMode;
use crate::error::CameraError;
use crate::utils::{collect_output, drain_output, render_args, wait_timeout};
use crate::CaptureConfig;

/// Handle to a running capture process
pub struct ProcessHandle {
    child: Child,
    output: Option<ChildStdout>,
    mode: CaptureMode,
    started_at: Instant,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn mode(&self) -> &CaptureMode {
        &self.mode
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Hand out the MJPEG output pipe. Only the first caller gets it.
    pub fn take_output(&mut self) -> Option<ChildStdout> {
        self.output.take()
    }

    /// Whether a frame reader has taken the output pipe
    pub fn is_claimed(&self) -> bool {
        self.output.is_none()
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            warn!(pid = self.child.id(), "Capture handle dropped while running, killing");
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

pub struct ProcessSupervisor {
    config: CaptureConfig,
}

impl ProcessSupervisor {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Run the camera diagnostic command. Any failure or timeout reads as "no camera".
    ///
    /// The probe timeout bounds the whole call, output collection included.
    #[instrument(skip(self), fields(program = %self.config.probe_program))]
    pub fn probe(&self) -> bool {
        let deadline = Instant::now() + self.config.probe_timeout();
        let spawned = Command::new(&self.config.probe_program)
            .args(&self.config.probe_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to run camera probe: {}", e);
                return false;
            }
        };

        let stdout = child.stdout.take().map(collect_output);
        let stderr = child.stderr.take().map(collect_output);

        match wait_timeout(&mut child, self.config.probe_timeout()) {
            Ok(Some(status)) => {
                let mut output = String::new();
                for rx in [stdout, stderr].into_iter().flatten() {
                    output.push_str(&drain_output(&rx, deadline));
                }

                if !status.success() {
                    warn!(%status, "Camera probe failed: {}", output.trim());
                    return false;
                }
                if output.to_lowercase().contains("no cameras") {
                    warn!("Camera probe found no cameras");
                    return false;
                }

                info!("Camera detected");
                true
            }
            Ok(None) => {
                warn!(
                    "Camera probe timed out after {:?}",
                    self.config.probe_timeout()
                );
                let _ = child.kill();
                let _ = child.wait();
                false
            }
            Err(e) => {
                warn!("Failed waiting for camera probe: {}", e);
                let _ = child.kill();
                let _ = child.wait();
                false
            }
        }
    }

    /// Launch the capture program for `mode` and confirm it is still alive after the grace interval
    #[instrument(skip(self, mode), fields(mode = mode.id))]
    pub fn start(&self, mode: &CaptureMode) -> Result<ProcessHandle, CameraError> {
        let program = &self.config.program;
        let args = render_args(&self.config.args, mode);

        info!(
            "Starting {}: {}x{} @ {}fps",
            program, mode.width, mode.height, mode.frame_rate
        );
        debug!("{} args: {:?}", program, args);

        let mut child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                metrics::counter!("camstream_start_failures_total").increment(1);
                CameraError::start_failed(format!("failed to spawn {}: {}", program, e))
            })?;

        thread::sleep(self.config.start_grace());

        match child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => {
                // Bounded: a forked helper may still hold stderr open
                let deadline = Instant::now() + self.config.start_grace();
                let detail = child
                    .stderr
                    .take()
                    .map(|stderr| drain_output(&collect_output(stderr), deadline))
                    .unwrap_or_default();
                let detail = match detail.trim() {
                    "" => format!("{} exited with {}", program, status),
                    text => text.to_string(),
                };

                warn!(%status, "Capture process exited during start-up: {}", detail);
                metrics::counter!("camstream_start_failures_total").increment(1);
                return Err(CameraError::start_failed(detail));
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                metrics::counter!("camstream_start_failures_total").increment(1);
                return Err(CameraError::start_failed(e.to_string()));
            }
        }

        let output = child.stdout.take();
        if let Some(stderr) = child.stderr.take() {
            let pid = child.id();
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines() {
                    match line {
                        Ok(line) if !line.trim().is_empty() => {
                            debug!(pid, "capture stderr: {}", line.trim())
                        }
                        Ok(_) => {}
                        Err(_) => break,
                    }
                }
            });
        }

        info!(pid = child.id(), "Capture process running");
        metrics::counter!("camstream_process_starts_total").increment(1);

        Ok(ProcessHandle {
            child,
            output,
            mode: *mode,
            started_at: Instant::now(),
        })
    }

    /// SIGTERM, wait for the configured stop timeout, then SIGKILL. Always reaps the child.
    #[instrument(skip(self, handle), fields(pid = handle.pid()))]
    pub fn stop(&self, mut handle: ProcessHandle) {
        match handle.child.try_wait() {
            Ok(Some(status)) => {
                debug!(%status, "Capture process already exited");
                return;
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to query capture process: {}", e),
        }

        info!(mode = handle.mode().id, uptime = ?handle.uptime(), "Stopping capture process");
        let pid = Pid::from_raw(handle.pid() as i32);
        if let Err(e) = signal::kill(pid, Signal::SIGTERM) {
            warn!("Failed to send SIGTERM: {}", e);
        }

        match wait_timeout(&mut handle.child, self.config.stop_timeout()) {
            Ok(Some(status)) => {
                info!(%status, "Capture process stopped");
                return;
            }
            Ok(None) => warn!(
                "Capture process ignored SIGTERM for {:?}, killing",
                self.config.stop_timeout()
            ),
            Err(e) => warn!("Failed waiting for capture process: {}", e),
        }

        let _ = handle.child.kill();
        let _ = handle.child.wait();
    }
}
