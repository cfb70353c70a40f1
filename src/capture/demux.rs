//! MJPEG demultiplexer
//!
//! Cuts complete JPEG images out of an unstructured byte stream by scanning
//! for SOI/EOI markers. No I/O happens here; callers feed whatever chunks the
//! pipe hands them and get back every frame those bytes completed.

use bytes::{Buf, BytesMut};
use tracing::warn;

use super::frame::{Frame, EOI, SOI};

/// Upper bound for a single frame before the demuxer gives up on its start marker
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

pub struct FrameDemuxer {
    buffer: BytesMut,
    // Offset into `buffer` where the next EOI search resumes
    scan_from: usize,
    max_frame_bytes: usize,
    sequence: u64,
}

impl Default for FrameDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDemuxer {
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            scan_from: 0,
            max_frame_bytes: max_frame_bytes.max(SOI.len() + EOI.len()),
            sequence: 0,
        }
    }

    /// Append `chunk` and iterate over the frames it completes.
    ///
    /// Frames are produced lazily; any left unconsumed when the iterator is
    /// dropped are returned by the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(chunk);
        Frames { demuxer: self }
    }

    /// Bytes currently held back waiting for more input
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Number of frames emitted so far
    pub fn frames_emitted(&self) -> u64 {
        self.sequence
    }

    fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if !self.buffer.starts_with(&SOI) {
                match find_marker(&self.buffer, &SOI) {
                    Some(start) => self.buffer.advance(start),
                    None => {
                        // A trailing 0xFF may be the first half of the next SOI
                        let keep = usize::from(self.buffer.last() == Some(&SOI[0]));
                        let discard = self.buffer.len() - keep;
                        self.buffer.advance(discard);
                        self.scan_from = 0;
                        return None;
                    }
                }
                self.scan_from = 0;
            }

            let from = self.scan_from.max(SOI.len());
            match find_marker(&self.buffer[from..], &EOI) {
                Some(offset) => {
                    let end = from + offset + EOI.len();
                    let data = self.buffer.split_to(end).freeze();
                    self.scan_from = 0;

                    let frame = Frame::new(data, self.sequence);
                    self.sequence += 1;
                    return Some(frame);
                }
                None if self.buffer.len() > self.max_frame_bytes => {
                    warn!(
                        buffered = self.buffer.len(),
                        limit = self.max_frame_bytes,
                        "Unterminated JPEG exceeds frame limit, resyncing"
                    );
                    self.buffer.advance(SOI.len());
                    self.scan_from = 0;
                }
                None => {
                    // Resume at the last byte next time; it may be half of an EOI
                    self.scan_from = (self.buffer.len() - 1).max(SOI.len());
                    return None;
                }
            }
        }
    }
}

/// Frames completed by one [`FrameDemuxer::feed`] call
pub struct Frames<'a> {
    demuxer: &'a mut FrameDemuxer,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.demuxer.next_frame()
    }
}

fn find_marker(haystack: &[u8], marker: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == marker)
}
