//! UDP source and sink stages.
//!
//! - [`UdpSrc`] (`udpsrc`): receives datagrams on a local port
//! - [`UdpSink`] (`udpsink`): sends each buffer as one datagram
//!
//! Sockets are opened on the READY → PAUSED transition and closed on the
//! way back down, so a port that is already taken refuses startup.

use crate::buffer::Buffer;
use crate::element::{PortTemplate, Sink, Source, StageContext, StateChange};
use crate::elements::rtp::parse_packet;
use crate::error::{Error, Result};
use crate::format::Caps;
use crate::pipeline::{PropertyReader, Properties};
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;
use tracing::{debug, info, trace};

/// Port both stock pipelines use.
pub const DEFAULT_PORT: u16 = 5004;

/// How often a blocked receive wakes up to check for shutdown.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Largest datagram accepted by default.
const DEFAULT_BUFFER_SIZE: usize = 65_536;

fn not_bound(stage: &str) -> Error {
    Error::Io(std::io::Error::new(
        ErrorKind::NotConnected,
        format!("{stage} socket is not open"),
    ))
}

/// Why a datagram was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refusal {
    NotRtp,
    PayloadType,
}

impl Refusal {
    fn as_str(self) -> &'static str {
        match self {
            Refusal::NotRtp => "not-rtp",
            Refusal::PayloadType => "payload-type",
        }
    }
}

/// Admission check for RTP streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RtpFilter {
    payload_type: Option<u8>,
}

impl RtpFilter {
    fn from_caps(caps: &Caps) -> Option<Self> {
        if caps.media_kind() != "application/x-rtp" {
            return None;
        }
        let payload_type = caps
            .param("payload")
            .and_then(|v| v.as_i64())
            .and_then(|pt| u8::try_from(pt).ok());
        Some(Self { payload_type })
    }

    fn check(&self, data: &[u8]) -> std::result::Result<u16, Refusal> {
        let packet = parse_packet(data).map_err(|_| Refusal::NotRtp)?;
        match self.payload_type {
            Some(pt) if packet.header.payload_type != pt => Err(Refusal::PayloadType),
            _ => Ok(packet.header.sequence_number),
        }
    }
}

// ============================================================================
// UdpSrc
// ============================================================================

/// `udpsrc`: a UDP receiver.
///
/// | key | meaning | default |
/// |---|---|---|
/// | `port` | local port | 5004 |
/// | `address` | local address | `0.0.0.0` |
/// | `caps` | caps of the received stream | none |
/// | `buffer-size` | largest datagram, in bytes | 65536 |
///
/// With `application/x-rtp` caps, datagrams that do not parse as RTP, or
/// carry another payload type than the caps' `payload`, are dropped here.
/// The source never ends the stream on its own.
pub struct UdpSrc {
    address: String,
    port: u16,
    caps: Option<Caps>,
    filter: Option<RtpFilter>,
    socket: Option<UdpSocket>,
    recv_buf: Vec<u8>,
    received: u64,
}

impl UdpSrc {
    /// Create a source for `address:port`.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            caps: None,
            filter: None,
            socket: None,
            recv_buf: vec![0; DEFAULT_BUFFER_SIZE],
            received: 0,
        }
    }

    /// Create a source from stage configuration.
    pub fn from_properties(props: &Properties) -> Result<Self> {
        let mut reader = PropertyReader::new("udpsrc", props);
        let port = reader
            .u64_in("port", 0, u64::from(u16::MAX))?
            .map_or(DEFAULT_PORT, |p| p as u16);
        let address = reader
            .string("address")
            .unwrap_or_else(|| "0.0.0.0".to_string());
        let mut src = Self::new(address, port);
        if let Some(caps) = reader.caps("caps")? {
            src = src.with_caps(caps);
        }
        if let Some(size) = reader.u64_in("buffer-size", 64, 1 << 20)? {
            src.recv_buf = vec![0; size as usize];
        }
        reader.finish()?;
        Ok(src)
    }

    /// Declare the caps of the received stream.
    pub fn with_caps(mut self, caps: Caps) -> Self {
        self.filter = RtpFilter::from_caps(&caps);
        self.caps = Some(caps);
        self
    }

    /// Address the socket is bound to, once open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    fn open(&mut self) -> Result<()> {
        let socket = UdpSocket::bind((self.address.as_str(), self.port))?;
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        info!(local = %socket.local_addr()?, "udpsrc listening");
        self.socket = Some(socket);
        Ok(())
    }
}

impl Source for UdpSrc {
    fn produce(&mut self, ctx: &mut StageContext) -> Result<Option<Buffer>> {
        let socket = self.socket.as_ref().ok_or_else(|| not_bound("udpsrc"))?;
        loop {
            if ctx.is_shutting_down() {
                return Err(Error::Flushing);
            }
            let (len, from) = match socket.recv_from(&mut self.recv_buf) {
                Ok(received) => received,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
                Err(e) => return Err(e.into()),
            };
            let data = &self.recv_buf[..len];

            let sequence = match self.filter.map(|f| f.check(data)) {
                Some(Err(refusal)) => {
                    trace!(%from, len, reason = refusal.as_str(), "dropping datagram");
                    ctx.metrics().record_drop(refusal.as_str());
                    continue;
                }
                Some(Ok(seq)) => u64::from(seq),
                None => self.received,
            };

            self.received += 1;
            return Ok(Some(Buffer::new(data.to_vec()).with_sequence(sequence)));
        }
    }

    fn port_templates(&self) -> Vec<PortTemplate> {
        let src = PortTemplate::output("src");
        vec![match &self.caps {
            Some(caps) => src.with_caps(caps.clone()),
            None => src,
        }]
    }

    fn change_state(&mut self, change: StateChange) -> Result<()> {
        match change {
            StateChange::ReadyToPaused => self.open(),
            StateChange::PausedToReady => {
                debug!(received = self.received, "udpsrc closing");
                self.socket = None;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

// ============================================================================
// UdpSink
// ============================================================================

/// `udpsink`: a UDP sender.
///
/// | key | meaning |
/// |---|---|
/// | `host` | destination host (required) |
/// | `port` | destination port (required) |
pub struct UdpSink {
    host: String,
    port: u16,
    destination: Option<SocketAddr>,
    socket: Option<UdpSocket>,
    sent: u64,
}

impl UdpSink {
    /// Create a sink sending to `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            destination: None,
            socket: None,
            sent: 0,
        }
    }

    /// Create a sink from stage configuration.
    pub fn from_properties(props: &Properties) -> Result<Self> {
        let mut reader = PropertyReader::new("udpsink", props);
        let host = reader.required_string("host")?;
        let port = reader.required_port("port")?;
        reader.finish()?;
        Ok(Self::new(host, port))
    }

    /// Datagrams sent so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    fn open(&mut self) -> Result<()> {
        let destination = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::invalid_property("host", format!("{} does not resolve", self.host)))?;
        let local: SocketAddr = if destination.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        self.socket = Some(UdpSocket::bind(local)?);
        self.destination = Some(destination);
        info!(%destination, "udpsink ready");
        Ok(())
    }
}

impl Sink for UdpSink {
    fn consume(&mut self, buffer: Buffer, ctx: &mut StageContext) -> Result<()> {
        let (Some(socket), Some(destination)) = (&self.socket, self.destination) else {
            return Err(not_bound("udpsink"));
        };
        match socket.send_to(buffer.data(), destination) {
            Ok(_) => {
                self.sent += 1;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                // Loopback reports the receiver's ICMP unreachable on the next send.
                ctx.metrics().record_drop("refused");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn finish(&mut self, ctx: &mut StageContext) -> Result<()> {
        debug!(stage = %ctx.name(), sent = self.sent, "udpsink finished");
        Ok(())
    }

    fn change_state(&mut self, change: StateChange) -> Result<()> {
        match change {
            StateChange::ReadyToPaused => self.open(),
            StateChange::PausedToReady => {
                self.socket = None;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Output, Transform};
    use crate::elements::rtp::RtpH264Pay;

    fn rtp_datagram(pt_caps: &str) -> (UdpSrc, SocketAddr) {
        let caps = Caps::parse(pt_caps).unwrap();
        let mut src = UdpSrc::new("127.0.0.1", 0).with_caps(caps);
        src.change_state(StateChange::ReadyToPaused).unwrap();
        let addr = src.local_addr().unwrap();
        (src, addr)
    }

    fn rtp_packet() -> Buffer {
        let mut pay = RtpH264Pay::new();
        let mut ctx = StageContext::detached("pay");
        match pay
            .transform(Buffer::new(vec![0, 0, 0, 1, 0x65, 1, 2, 3]), &mut ctx)
            .unwrap()
        {
            Output::Single(b) => b,
            other => panic!("expected one packet, got {}", other.len()),
        }
    }

    #[test]
    fn test_udpsrc_drops_foreign_datagrams() {
        let (mut src, addr) = rtp_datagram("application/x-rtp,encoding-name=H264,payload=96");
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let packet = rtp_packet();

        sender.send_to(b"not rtp at all", addr).unwrap();
        let mut wrong_pt = packet.data().to_vec();
        wrong_pt[1] = (wrong_pt[1] & 0x80) | 97;
        sender.send_to(&wrong_pt, addr).unwrap();
        sender.send_to(packet.data(), addr).unwrap();

        let mut ctx = StageContext::detached("udpsrc");
        let received = src.produce(&mut ctx).unwrap().unwrap();
        assert_eq!(received.data(), packet.data());
    }

    #[test]
    fn test_udpsink_sends_datagrams() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let port = receiver.local_addr().unwrap().port();

        let mut sink = UdpSink::new("127.0.0.1", port);
        sink.change_state(StateChange::ReadyToPaused).unwrap();
        let mut ctx = StageContext::detached("udpsink");
        sink.consume(Buffer::new(vec![1, 2, 3]), &mut ctx).unwrap();

        let mut buf = [0u8; 16];
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[1, 2, 3]);
        assert_eq!(sink.sent(), 1);
    }

    #[test]
    fn test_consume_before_open_fails() {
        let mut sink = UdpSink::new("127.0.0.1", 5004);
        let mut ctx = StageContext::detached("udpsink");
        assert!(sink.consume(Buffer::new(vec![1]), &mut ctx).is_err());
    }

    #[test]
    fn test_socket_closed_when_paused_to_ready() {
        let (mut src, _) = rtp_datagram("application/x-rtp");
        assert!(src.local_addr().is_some());
        src.change_state(StateChange::PausedToReady).unwrap();
        assert!(src.local_addr().is_none());

        let mut ctx = StageContext::detached("udpsrc");
        assert!(src.produce(&mut ctx).is_err());
    }

    #[test]
    fn test_properties() {
        let src = UdpSrc::from_properties(
            &Properties::new()
                .with("port", 5004)
                .with("caps", "application/x-rtp,media=video,encoding-name=H264,payload=96"),
        )
        .unwrap();
        assert_eq!(src.filter.unwrap().payload_type, Some(96));
        assert_eq!(src.port_templates()[0].caps.as_ref().unwrap().encoding_name(), Some("H264"));

        assert!(UdpSrc::from_properties(&Properties::new().with("port", 70_000)).is_err());
    }
}
