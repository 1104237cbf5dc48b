//! Buffers carried over links between stages.

use bytes::Bytes;
use std::time::Duration;

/// A chunk of media data plus the timing metadata stages need.
///
/// Cloning is cheap: the payload is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    data: Bytes,
    sequence: u64,
    pts: Option<Duration>,
}

impl Buffer {
    /// Create a buffer with sequence 0 and no timestamp.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            sequence: 0,
            pts: None,
        }
    }

    /// Set the sequence number.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Set the presentation timestamp.
    pub fn with_pts(mut self, pts: Duration) -> Self {
        self.pts = Some(pts);
        self
    }

    /// Payload bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Sequence number assigned by the producing stage.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Presentation timestamp, if known.
    pub fn pts(&self) -> Option<Duration> {
        self.pts
    }

    /// Consume the buffer, returning the payload.
    pub fn into_data(self) -> Bytes {
        self.data
    }
}
