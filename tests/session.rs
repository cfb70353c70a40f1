//! Session tests against `sh -c` stand-ins for the capture program
//!
//! Each stub writes JPEG-shaped bytes to stdout (octal escapes for the
//! markers) and then `exec`s into `sleep` so SIGTERM reaches the process
//! holding the pipe.

use std::time::{Duration, Instant};

use camstream::snapshot;
use camstream::{CameraError, CaptureConfig, ModeCatalog, StreamSession, StreamState};
use futures_util::StreamExt;

const FRAME_A: &str = r"\377\330frame-a\377\331";
const FRAME_A_BYTES: &[u8] = b"\xFF\xD8frame-a\xFF\xD9";

fn config(script: &str) -> CaptureConfig {
    CaptureConfig {
        program: "sh".into(),
        args: vec!["-c".into(), script.into()],
        probe_program: "true".into(),
        probe_args: vec![],
        probe_timeout_ms: 1_000,
        start_grace_ms: 100,
        stop_timeout_ms: 1_000,
        read_chunk_size: 7,
        ..CaptureConfig::default()
    }
}

fn session(script: &str) -> StreamSession {
    StreamSession::new(config(script), ModeCatalog::builtin().unwrap()).unwrap()
}

/// Emit one frame, then idle
fn one_frame() -> String {
    format!("printf '\\001\\002{}'; exec sleep 30", FRAME_A)
}

fn wait_for_state(session: &StreamSession, state: StreamState) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while session.state() != state {
        assert!(Instant::now() < deadline, "still {:?}", session.state());
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn streams_frames_and_stops_on_drop() {
    let session = session(&one_frame());
    assert!(session.start_streaming());
    assert_eq!(session.state(), StreamState::Streaming);

    let mut frames = session.frames().unwrap();
    let frame = frames.next().unwrap();
    assert_eq!(frame.data.as_ref(), FRAME_A_BYTES);

    let status = session.status();
    assert!(status.streaming);
    assert!(status.frame_available);
    assert!(status.last_access.is_some());
    assert_eq!(session.latest_frame().unwrap().data, frame.data);

    // Consumer walks away while the stub is blocked in sleep
    drop(frames);
    wait_for_state(&session, StreamState::Idle);
    assert!(session.latest_frame().is_none());
}

#[test]
fn stream_ends_when_process_exits() {
    let session = session(&format!(
        "printf '{a}{a}'; sleep 0.3; exit 0",
        a = FRAME_A
    ));
    assert!(session.start_streaming());

    let frames: Vec<_> = session.frames().unwrap().collect();
    assert_eq!(frames.len(), 2);
    assert!(frames.iter().all(|f| f.data.as_ref() == FRAME_A_BYTES));

    wait_for_state(&session, StreamState::Idle);

    // A fresh start gets a fresh process and demuxer
    assert!(session.start_streaming());
    let again = session.frames().unwrap().next().unwrap();
    assert_eq!(again.sequence, 0);
    session.stop_streaming();
}

#[test]
fn stop_keeps_last_access() {
    let session = session(&one_frame());
    assert!(session.start_streaming());

    let mut frames = session.frames().unwrap();
    frames.next().unwrap();
    let last_access = session.status().last_access;
    assert!(last_access.is_some());

    session.stop_streaming();
    let status = session.status();
    assert_eq!(status.state, StreamState::Idle);
    assert_eq!(status.last_access, last_access);
    assert!(!status.frame_available);

    // The stream ends once the process is gone
    assert!(frames.next().is_none());
}

#[test]
fn frames_need_a_running_stream_and_one_consumer() {
    let session = session("exec sleep 30");
    assert!(matches!(session.frames(), Err(CameraError::NotStreaming)));

    assert!(session.start_streaming());
    let _first = session.frames().unwrap();
    assert!(matches!(session.frames(), Err(CameraError::StreamBusy)));

    session.stop_streaming();
}

#[test]
fn set_mode_restarts_and_clears_latest_frame() {
    let session = session(&one_frame());
    assert!(session.start_streaming());

    let mut frames = session.frames().unwrap();
    frames.next().unwrap();
    assert!(session.latest_frame().is_some());

    assert!(session.set_mode("hd_720p").unwrap());
    assert_eq!(session.state(), StreamState::Streaming);
    assert_eq!(session.current_mode().id, "hd_720p");
    assert!(session.latest_frame().is_none());

    // The old reader must not tear down the new process when it winds up
    assert!(frames.next().is_none());
    drop(frames);
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(session.state(), StreamState::Streaming);

    let frame = session.frames().unwrap().next().unwrap();
    assert_eq!(frame.data.as_ref(), FRAME_A_BYTES);
    session.stop_streaming();
}

#[test]
fn set_mode_while_idle_only_records_mode() {
    let session = session("exec sleep 30");
    assert!(session.set_mode("hd_1080p").unwrap());
    assert_eq!(session.state(), StreamState::Idle);
    assert_eq!(session.current_mode().width, 1920);

    assert!(matches!(
        session.set_mode("nope"),
        Err(CameraError::UnknownMode(_))
    ));
    assert_eq!(session.current_mode().id, "hd_1080p");
}

#[test]
fn mode_reaches_capture_arguments() {
    let mut config = config(r#"[ "$0x$1@$2" = "1280x720@80" ] && exec sleep 30; exit 3"#);
    config
        .args
        .extend(["{width}", "{height}", "{framerate}"].map(String::from));
    let session = StreamSession::new(config, ModeCatalog::builtin().unwrap()).unwrap();

    // Default sd_480p does not match the stub's expectation
    assert!(!session.start_streaming());
    assert!(session.set_mode("hd_720p").unwrap());
    assert!(session.start_streaming());
    session.stop_streaming();
}

#[test]
fn immediate_exit_reports_stderr_and_returns_to_idle() {
    let session = session("echo 'no cameras detected' >&2; exit 1");
    session.set_mode("hd_720p").unwrap();

    match session.try_start_streaming() {
        Err(CameraError::StartFailed { detail }) => assert_eq!(detail, "no cameras detected"),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(session.state(), StreamState::Idle);
    assert!(matches!(session.frames(), Err(CameraError::NotStreaming)));
}

#[test]
fn unread_process_exit_returns_to_idle() {
    let dir = tempfile::tempdir().unwrap();
    let session = session("sleep 0.3; exit 1");
    assert!(session.start_streaming());
    std::thread::sleep(Duration::from_secs(1));

    let status = session.status();
    assert_eq!(status.state, StreamState::Idle);
    assert!(!status.streaming);
    assert!(!status.frame_available);
    assert!(matches!(session.frames(), Err(CameraError::NotStreaming)));
    assert!(matches!(
        snapshot::capture(&session, dir.path()),
        Err(CameraError::NotStreaming)
    ));

    // A new start launches a fresh process rather than reusing the dead one
    assert!(session.start_streaming());
    assert_eq!(session.state(), StreamState::Streaming);
    session.stop_streaming();
}

#[test]
fn frames_refused_once_process_has_exited() {
    let session = session("sleep 0.3; exit 1");
    assert!(session.start_streaming());
    std::thread::sleep(Duration::from_secs(1));

    assert!(matches!(session.frames(), Err(CameraError::NotStreaming)));
    assert_eq!(session.state(), StreamState::Idle);
}

#[test]
fn failed_probe_blocks_streaming() {
    let mut config = config("exec sleep 30");
    config.probe_program = "false".into();
    let session = StreamSession::new(config, ModeCatalog::builtin().unwrap()).unwrap();

    assert!(!session.probe());
    assert!(!session.reprobe());
    assert_eq!(session.state(), StreamState::Unavailable);

    assert!(!session.start_streaming());
    assert_eq!(session.state(), StreamState::Unavailable);
}

#[test]
fn successful_reprobe_recovers() {
    let session = session("exec sleep 30");
    assert!(session.start_streaming());

    assert!(session.reprobe());
    assert_eq!(session.state(), StreamState::Idle);
    assert!(session.start_streaming());
    session.stop_streaming();
}

#[test]
fn capture_writes_latest_frame() {
    let dir = tempfile::tempdir().unwrap();
    let session = session(&one_frame());

    assert!(matches!(
        snapshot::capture(&session, dir.path()),
        Err(CameraError::NotStreaming)
    ));

    assert!(session.start_streaming());
    assert!(matches!(
        snapshot::capture(&session, dir.path()),
        Err(CameraError::NoFrameAvailable)
    ));

    let mut frames = session.frames().unwrap();
    frames.next().unwrap();

    let artifact = snapshot::capture(&session, dir.path()).unwrap();
    let path = dir.path().join(&artifact.filename);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), artifact.size_bytes);
    assert_eq!(std::fs::read(&path).unwrap(), FRAME_A_BYTES);

    session.stop_streaming();
}

#[tokio::test]
async fn async_stream_yields_multipart_ready_frames() {
    let session = session(&one_frame());
    let starter = session.clone();
    assert!(tokio::task::spawn_blocking(move || starter.start_streaming())
        .await
        .unwrap());

    let mut stream = Box::pin(session.frames().unwrap().into_async());
    let frame = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap()
        .unwrap();

    let part = frame.to_multipart();
    assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8"));
    assert!(part.ends_with(b"\xFF\xD9\r\n"));

    drop(stream);
    let session_for_wait = session.clone();
    tokio::task::spawn_blocking(move || wait_for_state(&session_for_wait, StreamState::Idle))
        .await
        .unwrap();
}
