//! RTP jitter buffer for packet reordering.
//!
//! Packets are held in a map keyed by extended sequence number (the 16-bit
//! wire sequence unwrapped into a monotonic counter) and released strictly
//! in order. A missing packet is waited for until either the first packet
//! behind the gap has been held for `latency` or more than `max-packets`
//! are buffered; then the gap is declared lost and release continues.
//!
//! Release is driven by arrivals and by end of stream. Packets that arrive
//! behind the release point are dropped as late.

use super::parse_packet;
use crate::buffer::Buffer;
use crate::element::{Output, PortTemplate, StageContext, StageKind, Transform};
use crate::error::Result;
use crate::format::Caps;
use crate::pipeline::{PropertyReader, Properties};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Default jitter buffer latency in milliseconds.
const DEFAULT_LATENCY_MS: u64 = 200;

/// Default maximum number of packets to buffer.
const DEFAULT_MAX_PACKETS: usize = 512;

/// Counters kept by the jitter buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JitterBufferStats {
    /// Packets accepted into the buffer.
    pub received: u64,
    /// Packets released downstream.
    pub released: u64,
    /// Packets that arrived after their slot was released.
    pub late: u64,
    /// Packets seen twice.
    pub duplicates: u64,
    /// Sequence numbers given up on.
    pub lost: u64,
}

struct Held {
    buffer: Buffer,
    arrived: Instant,
}

/// `rtpjitterbuffer`: reorders RTP packets by sequence number.
///
/// | key | meaning | default |
/// |---|---|---|
/// | `latency` | how long to wait for a missing packet, in ms | 200 |
/// | `max-packets` | buffer depth that forces a gap to be skipped | 512 |
pub struct RtpJitterBuffer {
    packets: BTreeMap<u64, Held>,
    latency: Duration,
    max_packets: usize,
    highest: Option<u64>,
    next_out: Option<u64>,
    stats: JitterBufferStats,
}

impl RtpJitterBuffer {
    /// Create a jitter buffer with default settings.
    pub fn new() -> Self {
        Self {
            packets: BTreeMap::new(),
            latency: Duration::from_millis(DEFAULT_LATENCY_MS),
            max_packets: DEFAULT_MAX_PACKETS,
            highest: None,
            next_out: None,
            stats: JitterBufferStats::default(),
        }
    }

    /// Create a jitter buffer from stage configuration.
    pub fn from_properties(props: &Properties) -> Result<Self> {
        let mut reader = PropertyReader::new("rtpjitterbuffer", props);
        let mut jitter = Self::new();
        if let Some(ms) = reader.u64_in("latency", 0, 60_000)? {
            jitter.latency = Duration::from_millis(ms);
        }
        if let Some(max) = reader.u64_in("max-packets", 1, 65_535)? {
            jitter.max_packets = max as usize;
        }
        reader.finish()?;
        Ok(jitter)
    }

    /// Set the latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Set the buffer depth.
    pub fn with_max_packets(mut self, max: usize) -> Self {
        self.max_packets = max.max(1);
        self
    }

    /// Statistics so far.
    pub fn stats(&self) -> JitterBufferStats {
        self.stats
    }

    /// Packets currently held.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Whether no packet is held.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Unwrap a wire sequence number relative to the highest one seen.
    fn extend_seq(&mut self, seq: u16) -> u64 {
        let Some(highest) = self.highest else {
            // Start one cycle in so early reordering cannot go negative.
            let ext = (1 << 16) + u64::from(seq);
            self.highest = Some(ext);
            return ext;
        };
        let delta = i64::from(seq.wrapping_sub(highest as u16) as i16);
        let ext = highest.saturating_add_signed(delta);
        if ext > highest {
            self.highest = Some(ext);
        }
        ext
    }

    fn insert(&mut self, seq: u16, buffer: Buffer, now: Instant, ctx: &StageContext) {
        let ext = self.extend_seq(seq);
        if self.next_out.is_some_and(|next| ext < next) {
            trace!(stage = %ctx.name(), seq, "late packet");
            self.stats.late += 1;
            ctx.metrics().record_drop("late");
            return;
        }
        if self.packets.contains_key(&ext) {
            self.stats.duplicates += 1;
            ctx.metrics().record_drop("duplicate");
            return;
        }
        self.stats.received += 1;
        self.packets.insert(ext, Held { buffer, arrived: now });
    }

    fn release(&mut self, now: Instant, drain: bool) -> Vec<Buffer> {
        let mut out = Vec::new();
        loop {
            let held = self.packets.len();
            let Some(entry) = self.packets.first_entry() else {
                break;
            };
            let ext = *entry.key();
            let next = self.next_out.unwrap_or(ext);
            if ext != next {
                let waited = now.saturating_duration_since(entry.get().arrived);
                if !drain && held <= self.max_packets && waited < self.latency {
                    break;
                }
                debug!(missing = ext - next, "giving up on missing packets");
                self.stats.lost += ext - next;
            }
            out.push(entry.remove().buffer);
            self.next_out = Some(ext + 1);
        }
        self.stats.released += out.len() as u64;
        out
    }
}

impl Default for RtpJitterBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for RtpJitterBuffer {
    fn transform(&mut self, buffer: Buffer, ctx: &mut StageContext) -> Result<Output> {
        let now = Instant::now();
        match parse_packet(buffer.data()) {
            Ok(packet) => self.insert(packet.header.sequence_number, buffer, now, ctx),
            Err(e) => {
                debug!(stage = %ctx.name(), error = %e, "dropping packet");
                ctx.metrics().record_drop("malformed");
            }
        }
        Ok(self.release(now, false).into())
    }

    fn flush(&mut self, _ctx: &mut StageContext) -> Result<Output> {
        Ok(self.release(Instant::now(), true).into())
    }

    fn kind(&self) -> StageKind {
        StageKind::JitterBuffer
    }

    fn port_templates(&self) -> Vec<PortTemplate> {
        vec![
            PortTemplate::input("sink").with_caps(Caps::new("application/x-rtp")),
            PortTemplate::output("src").with_caps(Caps::new("application/x-rtp")),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::rtp::marshal_packet;
    use bytes::Bytes;
    use rtp::header::Header;
    use rtp::packet::Packet;

    fn packet(seq: u16) -> Buffer {
        let packet = Packet {
            header: Header {
                version: 2,
                payload_type: 96,
                sequence_number: seq,
                ..Default::default()
            },
            payload: Bytes::from_static(&[0x41, 0xAA, 0xBB]),
        };
        Buffer::new(marshal_packet(&packet).unwrap())
    }

    fn seqs(out: Output) -> Vec<u16> {
        out.into_iter()
            .map(|b| parse_packet(b.data()).unwrap().header.sequence_number)
            .collect()
    }

    fn feed(jitter: &mut RtpJitterBuffer, order: &[u16]) -> Vec<Vec<u16>> {
        let mut ctx = StageContext::detached("jitter");
        order
            .iter()
            .map(|seq| seqs(jitter.transform(packet(*seq), &mut ctx).unwrap()))
            .collect()
    }

    #[test]
    fn test_reorders_within_window() {
        let mut jitter = RtpJitterBuffer::new();
        let released = feed(&mut jitter, &[1, 3, 2, 4]);

        assert_eq!(released, vec![vec![1], vec![], vec![2, 3], vec![4]]);
        assert_eq!(jitter.stats().lost, 0);
    }

    #[test]
    fn test_late_and_duplicate_packets_dropped() {
        let mut jitter = RtpJitterBuffer::new();
        let released = feed(&mut jitter, &[10, 11, 10, 13, 13]);

        assert_eq!(released, vec![vec![10], vec![11], vec![], vec![], vec![]]);
        assert_eq!(jitter.stats().late, 1);
        assert_eq!(jitter.stats().duplicates, 1);
        assert_eq!(jitter.len(), 1);
    }

    #[test]
    fn test_overflow_skips_gap() {
        let mut jitter = RtpJitterBuffer::new().with_max_packets(2);
        let released = feed(&mut jitter, &[1, 3, 4, 5]);

        assert_eq!(released, vec![vec![1], vec![], vec![], vec![3, 4, 5]]);
        assert_eq!(jitter.stats().lost, 1);
    }

    #[test]
    fn test_zero_latency_never_waits() {
        let mut jitter = RtpJitterBuffer::new().with_latency(Duration::ZERO);
        let released = feed(&mut jitter, &[1, 3, 2]);

        assert_eq!(released, vec![vec![1], vec![3], vec![]]);
        assert_eq!(jitter.stats().late, 1);
    }

    #[test]
    fn test_sequence_wraparound() {
        let mut jitter = RtpJitterBuffer::new();
        let released = feed(&mut jitter, &[65534, 0, 65535, 1]);

        assert_eq!(released, vec![vec![65534], vec![], vec![65535, 0], vec![1]]);
    }

    #[test]
    fn test_flush_drains_in_order() {
        let mut jitter = RtpJitterBuffer::new();
        feed(&mut jitter, &[5, 8, 7]);
        let mut ctx = StageContext::detached("jitter");

        assert_eq!(seqs(jitter.flush(&mut ctx).unwrap()), vec![7, 8]);
        assert!(jitter.is_empty());
        assert_eq!(jitter.stats().lost, 1);
    }

    #[test]
    fn test_properties() {
        let props = Properties::new().with("latency", "50").with("max-packets", 16);
        let jitter = RtpJitterBuffer::from_properties(&props).unwrap();
        assert_eq!(jitter.latency, Duration::from_millis(50));
        assert_eq!(jitter.max_packets, 16);

        assert!(RtpJitterBuffer::from_properties(&Properties::new().with("latency", -1)).is_err());
    }
}
