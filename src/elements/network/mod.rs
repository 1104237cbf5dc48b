//! Network stages.

mod udp;

pub use udp::{DEFAULT_PORT, UdpSink, UdpSrc};
