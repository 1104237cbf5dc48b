//! Built-in reference stages.
//!
//! Registered by [`register_builtins`] under the element names of the
//! stock sender and receiver pipelines:
//!
//! ## Sources
//! - `videotestsrc` ([`VideoTestSrc`]): generates RGB test patterns
//! - `udpsrc` ([`UdpSrc`]): receives datagrams, filtering RTP by payload type
//!
//! ## Transforms
//! - `capsfilter` ([`CapsFilterStage`]): enforces caps on a link
//! - `videoscale`, `videoconvert` ([`VideoScale`], [`VideoConvert`])
//! - `x264enc` ([`X264Enc`]): raw frames to an H.264 byte stream
//! - `rtph264pay` ([`RtpH264Pay`]), `rtph264depay` ([`RtpH264Depay`])
//! - `rtpjitterbuffer` ([`RtpJitterBuffer`]): reorders by sequence number
//! - `decodebin` ([`DecodeBin`]): announces its output at runtime
//!
//! ## Sinks
//! - `udpsink` ([`UdpSink`]): sends datagrams
//! - `autovideosink`, `ximagesink` ([`VideoRenderer`])
//! - `fakesink` ([`FakeSink`]): discards buffers

pub mod app;
pub mod codec;
pub mod network;
pub mod rtp;
pub mod testing;
pub mod transform;

pub use app::VideoRenderer;
pub use codec::{DecodeBin, X264Enc};
pub use network::{UdpSink, UdpSrc};
pub use rtp::{RtpH264Depay, RtpH264Pay, RtpJitterBuffer};
pub use testing::{FakeSink, VideoPattern, VideoTestSrc};
pub use transform::{CapsFilterStage, VideoConvert, VideoScale};

use crate::element::{ElementDyn, SinkAdapter, SourceAdapter, TransformAdapter};
use crate::pipeline::StageFactory;

fn source(src: impl crate::element::Source + 'static) -> Box<dyn ElementDyn> {
    Box::new(SourceAdapter::new(src))
}

fn transform(t: impl crate::element::Transform + 'static) -> Box<dyn ElementDyn> {
    Box::new(TransformAdapter::new(t))
}

fn sink(s: impl crate::element::Sink + 'static) -> Box<dyn ElementDyn> {
    Box::new(SinkAdapter::new(s))
}

/// Register every built-in stage type.
pub fn register_builtins(factory: &mut StageFactory) {
    factory.register("videotestsrc", |p| VideoTestSrc::from_properties(p).map(source));
    factory.register("udpsrc", |p| UdpSrc::from_properties(p).map(source));

    factory.register("capsfilter", |p| CapsFilterStage::from_properties(p).map(transform));
    factory.register("videoscale", |p| VideoScale::from_properties(p).map(transform));
    factory.register("videoconvert", |p| VideoConvert::from_properties(p).map(transform));
    factory.register("x264enc", |p| X264Enc::from_properties(p).map(transform));
    factory.register("rtph264pay", |p| RtpH264Pay::from_properties(p).map(transform));
    factory.register("rtph264depay", |p| RtpH264Depay::from_properties(p).map(transform));
    factory.register("rtpjitterbuffer", |p| RtpJitterBuffer::from_properties(p).map(transform));
    factory.register("decodebin", |p| DecodeBin::from_properties(p).map(transform));

    factory.register("udpsink", |p| UdpSink::from_properties(p).map(sink));
    factory.register("autovideosink", |p| VideoRenderer::auto_from_properties(p).map(sink));
    factory.register("ximagesink", |p| VideoRenderer::ximage_from_properties(p).map(sink));
    factory.register("fakesink", |p| FakeSink::from_properties(p).map(sink));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::StageKind;
    use crate::pipeline::Properties;

    #[test]
    fn test_builtin_kinds() {
        let factory = StageFactory::with_builtins();
        let kind = |name: &str| factory.create(name, &Properties::new()).unwrap().kind();

        assert_eq!(factory.list().len(), 14);
        assert_eq!(kind("videotestsrc"), StageKind::Source);
        assert_eq!(kind("udpsrc"), StageKind::Source);
        assert_eq!(kind("capsfilter"), StageKind::Filter);
        assert_eq!(kind("x264enc"), StageKind::Encoder);
        assert_eq!(kind("rtph264pay"), StageKind::Payloader);
        assert_eq!(kind("rtph264depay"), StageKind::Depayloader);
        assert_eq!(kind("rtpjitterbuffer"), StageKind::JitterBuffer);
        assert_eq!(kind("decodebin"), StageKind::Decoder);
        assert_eq!(kind("videoconvert"), StageKind::Converter);
        assert_eq!(kind("autovideosink"), StageKind::Sink);
    }

    #[test]
    fn test_decodebin_output_is_sometimes() {
        let factory = StageFactory::with_builtins();
        let decoder = factory.create("decodebin", &Properties::new()).unwrap();
        let templates = decoder.port_templates();

        assert!(templates.iter().any(|t| t.is_always() && t.name == "sink"));
        assert!(templates.iter().any(|t| !t.is_always() && t.name == "src_%u"));
    }
}
