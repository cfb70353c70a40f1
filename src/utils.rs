use std::io::{self, ErrorKind, Read};
use std::process::{Child, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use crate::capture::CaptureMode;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Fill `{width}`, `{height}` and `{framerate}` in an argument template
pub fn render_args(template: &[String], mode: &CaptureMode) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            arg.replace("{width}", &mode.width.to_string())
                .replace("{height}", &mode.height.to_string())
                .replace("{framerate}", &mode.frame_rate.to_string())
        })
        .collect()
}

/// Poll `child` until it exits or `timeout` passes. `Ok(None)` means still running.
pub fn wait_timeout(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

/// Read a pipe on its own thread so the writer never blocks on a full pipe.
///
/// Chunks arrive on the returned channel as they are read; it disconnects at EOF.
pub fn collect_output<R: Read + Send + 'static>(mut reader: R) -> flume::Receiver<Vec<u8>> {
    let (tx, rx) = flume::unbounded();
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });
    rx
}

/// Gather collected output until EOF or `deadline`, whichever comes first.
///
/// A grandchild that inherited the pipe can hold it open long after the
/// direct child exits; whatever arrived before the deadline is returned.
pub fn drain_output(rx: &flume::Receiver<Vec<u8>>, deadline: Instant) -> String {
    let mut buf = Vec::new();
    while let Ok(chunk) = rx.recv_deadline(deadline) {
        buf.extend_from_slice(&chunk);
    }
    String::from_utf8_lossy(&buf).into_owned()
}
