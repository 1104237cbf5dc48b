//! RTP stages and packet helpers.
//!
//! - [`RtpH264Pay`] (`rtph264pay`): access units to RTP packets
//! - [`RtpH264Depay`] (`rtph264depay`): RTP packets to access units
//! - [`RtpJitterBuffer`] (`rtpjitterbuffer`): sequence-number reordering
//!
//! Buffers between these stages carry whole marshaled RTP packets, so any
//! of them can be replaced by a host stage working on the wire format.

mod jitter_buffer;
mod rtp_codecs;

pub use jitter_buffer::{JitterBufferStats, RtpJitterBuffer};
pub use rtp_codecs::{RtpH264Depay, RtpH264Pay};

use crate::error::{Error, Result};
use bytes::Bytes;
use rtp::packet::Packet;
use std::time::Duration;
use webrtc_util::marshal::{Marshal, Unmarshal};

/// Clock rate of video RTP timestamps.
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

const RTP_VERSION: u8 = 2;

/// Dynamic payload type the stock pipelines use for H.264.
pub const DEFAULT_PAYLOAD_TYPE: u8 = 96;

/// Parse a marshaled RTP packet.
pub fn parse_packet(data: &[u8]) -> Result<Packet> {
    let mut buf = data;
    let packet = Packet::unmarshal(&mut buf)
        .map_err(|e| Error::InvalidData(format!("RTP parse error: {e}")))?;
    if packet.header.version != RTP_VERSION {
        return Err(Error::InvalidData(format!(
            "unsupported RTP version {}",
            packet.header.version
        )));
    }
    Ok(packet)
}

/// Serialize an RTP packet.
pub fn marshal_packet(packet: &Packet) -> Result<Bytes> {
    packet
        .marshal()
        .map_err(|e| Error::InvalidData(format!("RTP marshal error: {e}")))
}

/// Convert a presentation time to a 90 kHz RTP timestamp.
pub fn pts_to_rtp_timestamp(pts: Duration) -> u32 {
    let ticks = pts.as_micros() * u128::from(VIDEO_CLOCK_RATE) / 1_000_000;
    (ticks % (1u128 << 32)) as u32
}

/// Convert a 90 kHz RTP timestamp to a presentation time.
pub fn rtp_timestamp_to_pts(timestamp: u32) -> Duration {
    Duration::from_micros(u64::from(timestamp) * 1_000_000 / u64::from(VIDEO_CLOCK_RATE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtp::header::Header;

    #[test]
    fn test_packet_roundtrip() {
        let packet = Packet {
            header: Header {
                version: 2,
                marker: true,
                payload_type: 96,
                sequence_number: 7,
                timestamp: 9000,
                ssrc: 0x1234,
                ..Default::default()
            },
            payload: Bytes::from_static(&[0x65, 1, 2, 3]),
        };
        let bytes = marshal_packet(&packet).unwrap();
        assert_eq!(bytes.len(), 12 + 4);

        let parsed = parse_packet(&bytes).unwrap();
        assert_eq!(parsed.header.sequence_number, 7);
        assert!(parsed.header.marker);
        assert_eq!(parsed.payload, packet.payload);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(parse_packet(b"hello"), Err(Error::InvalidData(_))));
    }

    #[test]
    fn test_timestamp_conversion() {
        assert_eq!(pts_to_rtp_timestamp(Duration::from_millis(50)), 4500);
        assert_eq!(rtp_timestamp_to_pts(90_000), Duration::from_secs(1));
    }
}
