//! Streaming session state machine
//!
//! Binds the process supervisor and the demuxer into one logical stream.
//! Start, stop, mode changes and re-probes serialize on a single mutex;
//! status reads go through atomics and never wait on it.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use arc_swap::{ArcSwap, ArcSwapOption};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::capture::{CaptureMode, Frame, ModeCatalog, ProcessHandle, ProcessSupervisor};
use crate::error::CameraError;
use crate::pipeline::stream::FrameStream;
use crate::CaptureConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum StreamState {
    Idle = 0,
    Starting = 1,
    Streaming = 2,
    Stopping = 3,
    Unavailable = 4,
}

impl StreamState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => StreamState::Starting,
            2 => StreamState::Streaming,
            3 => StreamState::Stopping,
            4 => StreamState::Unavailable,
            _ => StreamState::Idle,
        }
    }
}

/// Point-in-time view of the session, safe to take from any thread
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: StreamState,
    pub streaming: bool,
    pub mode: CaptureMode,
    pub last_access: Option<DateTime<Utc>>,
    pub frame_available: bool,
}

struct LatestFrame {
    generation: u64,
    frame: Frame,
}

struct Control {
    handle: Option<ProcessHandle>,
}

pub(crate) struct Shared {
    supervisor: ProcessSupervisor,
    catalog: ModeCatalog,
    control: Mutex<Control>,
    state: AtomicU8,
    // Bumped on every start and stop; readers from older generations go quiet
    generation: AtomicU64,
    mode: ArcSwap<CaptureMode>,
    last_access: ArcSwapOption<DateTime<Utc>>,
    latest: ArcSwapOption<LatestFrame>,
}

/// The single camera stream of a running server
#[derive(Clone)]
pub struct StreamSession {
    inner: Arc<Shared>,
}

impl StreamSession {
    /// Create an idle session whose current mode is `config.default_mode`
    pub fn new(config: CaptureConfig, catalog: ModeCatalog) -> Result<Self, CameraError> {
        let mode = catalog.resolve(&config.default_mode)?;

        Ok(Self {
            inner: Arc::new(Shared {
                supervisor: ProcessSupervisor::new(config),
                catalog,
                control: Mutex::new(Control { handle: None }),
                state: AtomicU8::new(StreamState::Idle as u8),
                generation: AtomicU64::new(0),
                mode: ArcSwap::from_pointee(mode),
                last_access: ArcSwapOption::empty(),
                latest: ArcSwapOption::empty(),
            }),
        })
    }

    pub fn start_streaming(&self) -> bool {
        match self.try_start_streaming() {
            Ok(()) => true,
            Err(e) => {
                warn!("Streaming not started: {}", e);
                false
            }
        }
    }

    /// Like [`start_streaming`](Self::start_streaming) but keeps the reason for a refusal
    pub fn try_start_streaming(&self) -> Result<(), CameraError> {
        let mut control = self.inner.lock();
        self.inner.start_locked(&mut control)
    }

    pub fn stop_streaming(&self) {
        let mut control = self.inner.lock();
        self.inner.stop_locked(&mut control);
    }

    /// Claim the live frame sequence of the running process.
    ///
    /// Only one consumer can hold it per start. The process is stopped when
    /// the sequence ends, whether by EOF, read error or the consumer dropping it.
    pub fn frames(&self) -> Result<FrameStream, CameraError> {
        let mut control = self.inner.lock();
        if self.inner.state() != StreamState::Streaming || self.inner.reap_exited(&mut control) {
            return Err(CameraError::NotStreaming);
        }

        let handle = control.handle.as_mut().ok_or(CameraError::NotStreaming)?;
        let output = handle.take_output().ok_or(CameraError::StreamBusy)?;
        let generation = self.inner.generation.load(Ordering::Acquire);
        drop(control);

        debug!(generation, "Frame stream claimed");
        Ok(FrameStream::spawn(self.inner.clone(), generation, output))
    }

    /// Switch capture mode, restarting the process if it was streaming
    pub fn set_mode(&self, id: &str) -> Result<bool, CameraError> {
        let mode = self.inner.catalog.resolve(id)?;

        let mut control = self.inner.lock();
        let was_streaming = self.inner.state() == StreamState::Streaming;
        if was_streaming {
            self.inner.stop_locked(&mut control);
        }

        self.inner.mode.store(Arc::new(mode));
        info!(mode = mode.id, "Capture mode set to {}", mode.label);

        if !was_streaming {
            return Ok(true);
        }
        match self.inner.start_locked(&mut control) {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("Restart after mode change failed: {}", e);
                Ok(false)
            }
        }
    }

    /// Stop any stream and re-run the device probe. A failed probe parks the session in `Unavailable`.
    pub fn reprobe(&self) -> bool {
        let mut control = self.inner.lock();
        self.inner.stop_locked(&mut control);

        let available = self.inner.supervisor.probe();
        let state = if available {
            StreamState::Idle
        } else {
            StreamState::Unavailable
        };
        self.inner.set_state(state);
        available
    }

    /// Run the device probe without touching session state
    pub fn probe(&self) -> bool {
        self.inner.supervisor.probe()
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.check_unclaimed();
        let state = self.inner.state();
        SessionStatus {
            state,
            streaming: state == StreamState::Streaming,
            mode: self.current_mode(),
            last_access: self.inner.last_access.load_full().map(|t| *t),
            frame_available: self.latest_frame().is_some(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.inner.check_unclaimed();
        self.inner.state()
    }

    pub fn current_mode(&self) -> CaptureMode {
        **self.inner.mode.load()
    }

    pub fn list_modes(&self) -> &[CaptureMode] {
        self.inner.catalog.list()
    }

    /// Most recent frame demuxed from the current process
    pub fn latest_frame(&self) -> Option<Frame> {
        self.inner.latest_frame()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: StreamState) {
        let previous = StreamState::from_u8(self.state.swap(state as u8, Ordering::AcqRel));
        if previous != state {
            debug!(?previous, ?state, "Stream state changed");
        }
    }

    pub(crate) fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    fn start_locked(&self, control: &mut Control) -> Result<(), CameraError> {
        if self.state() == StreamState::Streaming && !self.reap_exited(control) {
            return Ok(());
        }
        if self.state() == StreamState::Unavailable {
            return Err(CameraError::DeviceUnavailable);
        }

        // Never two capture processes at once
        if let Some(handle) = control.handle.take() {
            self.supervisor.stop(handle);
        }

        self.set_state(StreamState::Starting);
        let mode = **self.mode.load();

        match self.supervisor.start(&mode) {
            Ok(handle) => {
                let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                self.latest.store(None);
                control.handle = Some(handle);
                self.set_state(StreamState::Streaming);
                info!(generation, mode = mode.id, "Streaming started");
                Ok(())
            }
            Err(e) => {
                self.set_state(StreamState::Idle);
                Err(e)
            }
        }
    }

    fn stop_locked(&self, control: &mut Control) {
        let state = self.state();
        if control.handle.is_none()
            && matches!(state, StreamState::Idle | StreamState::Unavailable)
        {
            return;
        }

        self.set_state(StreamState::Stopping);
        // Invalidate readers before the process goes away so late reads are not recorded
        self.generation.fetch_add(1, Ordering::AcqRel);

        if let Some(handle) = control.handle.take() {
            self.supervisor.stop(handle);
        }
        self.latest.store(None);
        self.set_state(StreamState::Idle);
        info!("Streaming stopped");
    }

    /// Run the stop path if the capture process died while `Streaming`. Returns true if it did.
    fn reap_exited(&self, control: &mut Control) -> bool {
        if self.state() != StreamState::Streaming {
            return false;
        }
        let exited = match control.handle.as_mut() {
            Some(handle) => !handle.is_alive(),
            None => true,
        };
        if exited {
            warn!("Capture process exited unexpectedly");
            metrics::counter!("camstream_process_exits_total").increment(1);
            self.stop_locked(control);
        }
        exited
    }

    /// Liveness check for status reads. Skipped when the lock is busy or a
    /// reader owns the pipe, since that reader releases the process itself at EOF.
    fn check_unclaimed(&self) {
        if self.state() != StreamState::Streaming {
            return;
        }
        let mut control = match self.control.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => return,
        };
        if control.handle.as_ref().is_some_and(ProcessHandle::is_claimed) {
            return;
        }
        self.reap_exited(&mut control);
    }

    /// Stop path for a finished frame reader; ignored once the generation has moved on
    pub(crate) fn release(&self, generation: u64) {
        let mut control = self.lock();
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        info!(generation, "Frame stream ended, releasing capture process");
        self.stop_locked(&mut control);
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
            && self.state() == StreamState::Streaming
    }

    /// Record a successful read from the capture pipe
    pub(crate) fn touch(&self, generation: u64) {
        if self.is_current(generation) {
            self.last_access.store(Some(Arc::new(Utc::now())));
        }
    }

    /// Make `frame` the snapshot candidate. Returns false if the reader is stale.
    pub(crate) fn publish(&self, generation: u64, frame: &Frame) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        metrics::counter!("camstream_frames_total").increment(1);
        self.latest.store(Some(Arc::new(LatestFrame {
            generation,
            frame: frame.clone(),
        })));
        true
    }

    fn latest_frame(&self) -> Option<Frame> {
        let latest = self.latest.load_full()?;
        if latest.generation != self.generation.load(Ordering::Acquire) {
            return None;
        }
        Some(latest.frame.clone())
    }
}
