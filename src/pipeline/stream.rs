use std::io::{ErrorKind, Read};
use std::process::ChildStdout;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use futures_util::Stream;
use tracing::{debug, info, warn};

use crate::capture::{Frame, FrameDemuxer};
use crate::pipeline::session::Shared;

/// Live frames from the capture process.
///
/// Iterating blocks on the reader thread; use [`FrameStream::into_async`]
/// from async code. Dropping the stream stops the capture process.
pub struct FrameStream {
    rx: flume::Receiver<Frame>,
    _release: ReleaseOnDrop,
}

impl FrameStream {
    pub(crate) fn spawn(session: Arc<Shared>, generation: u64, output: ChildStdout) -> Self {
        let capacity = session.supervisor().config().channel_capacity.max(1);
        let (tx, rx) = flume::bounded(capacity);
        let finished = Arc::new(AtomicBool::new(false));

        let reader = Reader {
            session: session.clone(),
            generation,
            finished: finished.clone(),
        };
        // On failure the sender is dropped with the closure, so the stream just ends
        if let Err(e) = thread::Builder::new()
            .name(format!("mjpeg-reader-{}", generation))
            .spawn(move || reader.run(output, tx))
        {
            warn!("Failed to spawn frame reader: {}", e);
        }

        Self {
            rx,
            _release: ReleaseOnDrop {
                session,
                generation,
                finished,
            },
        }
    }

    /// Adapt into an async stream; the release guard travels with it
    pub fn into_async(self) -> impl Stream<Item = Frame> + Send + 'static {
        futures_util::stream::unfold(self, |stream| async move {
            let frame = stream.rx.recv_async().await.ok()?;
            Some((frame, stream))
        })
    }
}

impl Iterator for FrameStream {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.rx.recv().ok()
    }
}

struct ReleaseOnDrop {
    session: Arc<Shared>,
    generation: u64,
    finished: Arc<AtomicBool>,
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        if self.finished.load(Ordering::Acquire) {
            return;
        }

        // The reader may sit in a blocking read for a long time; stop the process from here.
        // Stopping can take the whole stop timeout, so keep it off the consumer's thread.
        debug!(generation = self.generation, "Frame consumer went away");
        let session = self.session.clone();
        let generation = self.generation;
        thread::spawn(move || session.release(generation));
    }
}

struct Reader {
    session: Arc<Shared>,
    generation: u64,
    finished: Arc<AtomicBool>,
}

impl Reader {
    fn run(self, mut output: ChildStdout, tx: flume::Sender<Frame>) {
        let config = self.session.supervisor().config();
        let mut demuxer = FrameDemuxer::with_max_frame_bytes(config.max_frame_bytes);
        let mut buf = vec![0u8; config.read_chunk_size.max(1)];
        let mut total_bytes = 0u64;

        'read: loop {
            if !self.session.is_current(self.generation) {
                debug!("Frame reader superseded");
                break;
            }

            match output.read(&mut buf) {
                Ok(0) => {
                    info!("Capture stream ended (EOF)");
                    break;
                }
                Ok(n) => {
                    total_bytes += n as u64;
                    self.session.touch(self.generation);

                    for frame in demuxer.feed(&buf[..n]) {
                        if !self.session.publish(self.generation, &frame) {
                            break 'read;
                        }
                        if tx.send(frame).is_err() {
                            info!("Frame consumer dropped, stopping capture");
                            break 'read;
                        }
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Error reading capture stream: {}", e);
                    break;
                }
            }
        }

        info!(
            frames = demuxer.frames_emitted(),
            bytes = total_bytes,
            "Frame reader finished"
        );
        self.finished.store(true, Ordering::Release);
        self.session.release(self.generation);
    }
}
