//! H.264 payloader and depayloader.
//!
//! ## Payloader (access unit → RTP)
//!
//! Splits an Annex B access unit into NAL units. Units that fit the MTU
//! go out as single-NAL packets, larger ones as FU-A fragments. All
//! packets of one access unit share its 90 kHz timestamp and the last one
//! carries the marker bit.
//!
//! ## Depayloader (RTP → access unit)
//!
//! Reverses the above and emits one Annex B buffer per marker bit. A
//! sequence gap throws away the access unit in progress and resumes at the
//! next NAL unit start.

use super::{
    DEFAULT_PAYLOAD_TYPE, VIDEO_CLOCK_RATE, marshal_packet, parse_packet, pts_to_rtp_timestamp,
    rtp_timestamp_to_pts,
};
use crate::buffer::Buffer;
use crate::element::{Output, PortTemplate, StageContext, StageKind, Transform};
use crate::error::{Error, Result};
use crate::format::Caps;
use crate::pipeline::{PropertyReader, Properties};
use bytes::{Bytes, BytesMut};
use rtp::codecs::h264::{H264Packet, H264Payloader};
use rtp::header::Header;
use rtp::packet::Packet;
use rtp::packetizer::{Depacketizer, Payloader};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

/// Default MTU for RTP payloaders.
const DEFAULT_MTU: u64 = 1400;

/// Fixed RTP header size.
const RTP_HEADER_LEN: usize = 12;

fn h264_caps() -> Caps {
    Caps::new("video/x-h264").with_param("stream-format", "byte-stream")
}

// ============================================================================
// H.264 Payloader
// ============================================================================

/// `rtph264pay`: packetizes H.264 access units.
///
/// | key | meaning | default |
/// |---|---|---|
/// | `mtu` | maximum packet size including the RTP header | 1400 |
/// | `pt` | payload type | 96 |
/// | `ssrc` | synchronization source | derived from the clock |
/// | `seqnum-offset` | first sequence number | 0 |
pub struct RtpH264Pay {
    payloader: H264Payloader,
    mtu: usize,
    payload_type: u8,
    ssrc: u32,
    next_seq: u16,
    frames: u64,
}

impl RtpH264Pay {
    /// Create a payloader with default settings.
    pub fn new() -> Self {
        Self {
            payloader: H264Payloader::default(),
            mtu: DEFAULT_MTU as usize,
            payload_type: DEFAULT_PAYLOAD_TYPE,
            ssrc: clock_ssrc(),
            next_seq: 0,
            frames: 0,
        }
    }

    /// Create a payloader from stage configuration.
    pub fn from_properties(props: &Properties) -> Result<Self> {
        let mut reader = PropertyReader::new("rtph264pay", props);
        let mut pay = Self::new();
        if let Some(mtu) = reader.u64_in("mtu", 64, 65_535)? {
            pay.mtu = mtu as usize;
        }
        if let Some(pt) = reader.u64_in("pt", 96, 127)? {
            pay.payload_type = pt as u8;
        }
        if let Some(ssrc) = reader.u64_in("ssrc", 0, u64::from(u32::MAX))? {
            pay.ssrc = ssrc as u32;
        }
        if let Some(offset) = reader.u64_in("seqnum-offset", 0, u64::from(u16::MAX))? {
            pay.next_seq = offset as u16;
        }
        reader.finish()?;
        Ok(pay)
    }

    /// Set the MTU.
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the synchronization source.
    pub fn with_ssrc(mut self, ssrc: u32) -> Self {
        self.ssrc = ssrc;
        self
    }

    /// Access units packetized so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Default for RtpH264Pay {
    fn default() -> Self {
        Self::new()
    }
}

fn clock_ssrc() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0x5EED_0001, |d| d.subsec_nanos() ^ (d.as_secs() as u32))
}

impl Transform for RtpH264Pay {
    fn transform(&mut self, buffer: Buffer, _ctx: &mut StageContext) -> Result<Output> {
        let payloads = self
            .payloader
            .payload(self.mtu.saturating_sub(RTP_HEADER_LEN), buffer.data())
            .map_err(|e| Error::InvalidData(format!("H.264 packetize error: {e}")))?;
        if payloads.is_empty() {
            return Ok(Output::None);
        }

        let timestamp = buffer.pts().map_or(0, pts_to_rtp_timestamp);
        let last = payloads.len() - 1;
        let mut packets = Vec::with_capacity(payloads.len());
        for (i, payload) in payloads.into_iter().enumerate() {
            let sequence_number = self.next_seq;
            self.next_seq = self.next_seq.wrapping_add(1);
            let packet = Packet {
                header: Header {
                    version: 2,
                    marker: i == last,
                    payload_type: self.payload_type,
                    sequence_number,
                    timestamp,
                    ssrc: self.ssrc,
                    ..Default::default()
                },
                payload,
            };
            let mut out = Buffer::new(marshal_packet(&packet)?).with_sequence(u64::from(sequence_number));
            if let Some(pts) = buffer.pts() {
                out = out.with_pts(pts);
            }
            packets.push(out);
        }

        self.frames += 1;
        trace!(frame = self.frames, packets = packets.len(), "packetized access unit");
        Ok(packets.into())
    }

    fn kind(&self) -> StageKind {
        StageKind::Payloader
    }

    fn port_templates(&self) -> Vec<PortTemplate> {
        let rtp_caps = Caps::new("application/x-rtp")
            .with_encoding("H264")
            .with_param("media", "video")
            .with_param("clock-rate", VIDEO_CLOCK_RATE)
            .with_param("payload", u32::from(self.payload_type));
        vec![
            PortTemplate::input("sink").with_caps(Caps::new("video/x-h264")),
            PortTemplate::output("src").with_caps(rtp_caps),
        ]
    }
}

// ============================================================================
// H.264 Depayloader
// ============================================================================

/// `rtph264depay`: reassembles H.264 access units.
///
/// Output is Annex B (`00 00 00 01` start codes), one buffer per access
/// unit. Packets that fail to parse are dropped.
pub struct RtpH264Depay {
    depacketizer: H264Packet,
    pending: BytesMut,
    pending_timestamp: Option<u32>,
    last_seq: Option<u16>,
    resync: bool,
}

impl RtpH264Depay {
    /// Create a new depayloader.
    pub fn new() -> Self {
        Self {
            depacketizer: H264Packet::default(),
            pending: BytesMut::new(),
            pending_timestamp: None,
            last_seq: None,
            resync: false,
        }
    }

    /// Create a depayloader from stage configuration.
    pub fn from_properties(props: &Properties) -> Result<Self> {
        PropertyReader::new("rtph264depay", props).finish()?;
        Ok(Self::new())
    }

    fn discard(&mut self) {
        self.depacketizer = H264Packet::default();
        self.pending.clear();
        self.pending_timestamp = None;
        self.resync = true;
    }

    fn take_access_unit(&mut self) -> Option<Buffer> {
        if self.pending.is_empty() {
            return None;
        }
        let pts = self.pending_timestamp.take().map(rtp_timestamp_to_pts);
        let buffer = Buffer::new(self.pending.split().freeze());
        Some(match pts {
            Some(pts) => buffer.with_pts(pts),
            None => buffer,
        })
    }
}

impl Default for RtpH264Depay {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for RtpH264Depay {
    fn transform(&mut self, buffer: Buffer, ctx: &mut StageContext) -> Result<Output> {
        let packet = match parse_packet(buffer.data()) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(stage = %ctx.name(), error = %e, "dropping packet");
                ctx.metrics().record_drop("malformed");
                return Ok(Output::None);
            }
        };
        let header = &packet.header;

        if let Some(last) = self.last_seq {
            if header.sequence_number != last.wrapping_add(1) {
                debug!(
                    stage = %ctx.name(),
                    expected = last.wrapping_add(1),
                    got = header.sequence_number,
                    "sequence gap, discarding access unit"
                );
                self.discard();
            }
        }
        self.last_seq = Some(header.sequence_number);

        if self.resync {
            if !self.depacketizer.is_partition_head(&packet.payload) {
                ctx.metrics().record_drop("resync");
                return Ok(Output::None);
            }
            self.resync = false;
        }

        let mut output = Vec::new();
        if self.pending_timestamp.is_some_and(|ts| ts != header.timestamp) {
            // A new timestamp without a marker on the previous unit.
            output.extend(self.take_access_unit());
        }

        match self.depacketizer.depacketize(&packet.payload) {
            Ok(nalus) => {
                if !nalus.is_empty() {
                    self.pending.extend_from_slice(&nalus);
                }
                self.pending_timestamp = Some(header.timestamp);
            }
            Err(e) => {
                debug!(stage = %ctx.name(), error = %e, "H.264 depacketize error");
                ctx.metrics().record_drop("malformed");
                self.discard();
                return Ok(output.into());
            }
        }

        if header.marker {
            output.extend(self.take_access_unit());
        }
        Ok(output.into())
    }

    fn flush(&mut self, _ctx: &mut StageContext) -> Result<Output> {
        Ok(self.take_access_unit().into())
    }

    fn kind(&self) -> StageKind {
        StageKind::Depayloader
    }

    fn port_templates(&self) -> Vec<PortTemplate> {
        vec![
            PortTemplate::input("sink").with_caps(Caps::new("application/x-rtp").with_encoding("H264")),
            PortTemplate::output("src").with_caps(h264_caps()),
        ]
    }
}
