use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};

/// JPEG start-of-image marker
pub const SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Boundary used for the multipart/x-mixed-replace body
pub const MULTIPART_BOUNDARY: &str = "frame";
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
const PART_TRAILER: &[u8] = b"\r\n";

/// One complete JPEG image cut out of the capture stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Immutable JPEG bytes, SOI through EOI inclusive
    pub data: Bytes,

    /// Position of this frame in the stream it was demuxed from
    pub sequence: u64,

    /// Wall-clock time the frame was completed
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(data: Bytes, sequence: u64) -> Self {
        Self {
            data,
            sequence,
            captured_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Wrap the frame as one part of a multipart/x-mixed-replace body
    pub fn to_multipart(&self) -> Bytes {
        let mut part = BytesMut::with_capacity(PART_HEADER.len() + self.data.len() + 2);
        part.put_slice(PART_HEADER);
        part.put_slice(&self.data);
        part.put_slice(PART_TRAILER);
        part.freeze()
    }
}
