//! The two stock pipelines: an H.264 RTP sender and its receiver.
//!
//! ```text
//! sender:   videotestsrc ! capsfilter ! videoscale ! videoconvert ! x264enc ! rtph264pay ! udpsink
//! receiver: udpsrc ! rtpjitterbuffer ! rtph264depay ! decodebin ~> videoconvert ! autovideosink
//! ```
//!
//! `~>` is a deferred link: the decoder's output only exists once it has
//! seen the stream, so it is linked when announced.

use crate::engine::EngineContext;
use crate::error::{Error, Result};
use crate::format::CapsFilter;
use crate::pipeline::{PipelineGraph, Properties};
use tracing::info;

/// Name both stock pipelines run under.
pub const PIPELINE_NAME: &str = "rtp-stream";

/// Caps the receiver expects on the wire.
pub const RTP_H264_CAPS: &str = "application/x-rtp,media=video,encoding-name=H264,payload=96";

/// Settings of the sender pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct SenderConfig {
    /// Destination host.
    pub host: String,
    /// Destination UDP port.
    pub port: u16,
    /// Encoder bitrate in kbit/s.
    pub bitrate: u32,
    /// Encoder speed preset.
    pub speed_preset: String,
    /// Encoder tuning.
    pub tune: String,
    /// Test pattern index.
    pub pattern: u32,
    /// Frame rate as numerator / denominator.
    pub framerate: (u32, u32),
    /// Stop after this many frames. `None` streams forever.
    pub num_buffers: Option<u64>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5004,
            bitrate: 500,
            speed_preset: "superfast".to_string(),
            tune: "zerolatency".to_string(),
            pattern: 1,
            framerate: (20, 1),
            num_buffers: None,
        }
    }
}

/// Settings of the receiver pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverConfig {
    /// Local UDP port to listen on.
    pub port: u16,
    /// Caps of the incoming RTP stream.
    pub caps: String,
    /// Jitter buffer latency in milliseconds.
    pub latency_ms: u64,
    /// Renderer stage type.
    pub sink: String,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            port: 5004,
            caps: RTP_H264_CAPS.to_string(),
            latency_ms: 200,
            sink: "autovideosink".to_string(),
        }
    }
}

/// Build the sender graph.
pub fn build_sender(engine: &EngineContext, config: &SenderConfig) -> Result<PipelineGraph> {
    let graph = engine.new_graph(PIPELINE_NAME);
    let (num, den) = config.framerate;

    let mut source_props = Properties::new().with("pattern", config.pattern);
    if let Some(n) = config.num_buffers {
        source_props.insert("num-buffers", n);
    }
    let source = graph.add_named_stage("videotestsrc", "source", &source_props)?;
    let filter = graph.add_named_stage(
        "capsfilter",
        "filter",
        &Properties::new().with("caps", format!("video/x-raw,framerate={num}/{den}")),
    )?;
    let scale = graph.add_named_stage("videoscale", "videoscale", &Properties::new())?;
    let convert = graph.add_named_stage("videoconvert", "videoconvert", &Properties::new())?;
    let encoder = graph.add_named_stage(
        "x264enc",
        "encoder",
        &Properties::new()
            .with("tune", config.tune.as_str())
            .with("bitrate", config.bitrate)
            .with("speed-preset", config.speed_preset.as_str()),
    )?;
    let pay = graph.add_named_stage("rtph264pay", "rtppay", &Properties::new())?;
    let sink = graph.add_named_stage(
        "udpsink",
        "udpsink",
        &Properties::new()
            .with("host", config.host.as_str())
            .with("port", config.port),
    )?;

    graph.link_many(&[source, filter, scale, convert, encoder, pay, sink])?;
    info!(host = %config.host, port = config.port, "sender pipeline built");
    Ok(graph)
}

/// Build the receiver graph.
pub fn build_receiver(engine: &EngineContext, config: &ReceiverConfig) -> Result<PipelineGraph> {
    let graph = engine.new_graph(PIPELINE_NAME);

    let source = graph.add_named_stage(
        "udpsrc",
        "source",
        &Properties::new()
            .with("port", config.port)
            .with("caps", config.caps.as_str()),
    )?;
    let jitter = graph.add_named_stage(
        "rtpjitterbuffer",
        "buffer",
        &Properties::new().with("latency", config.latency_ms),
    )?;
    let depay = graph.add_named_stage("rtph264depay", "rtpdepay", &Properties::new())?;
    let decoder = graph.add_named_stage("decodebin", "decoder", &Properties::new())?;
    let convert = graph.add_named_stage("videoconvert", "converter", &Properties::new())?;
    let sink = graph.add_named_stage(&config.sink, "sink", &Properties::new())?;

    graph.link_many(&[source, jitter, depay, decoder])?;
    graph.link_stages(convert, sink)?;

    let target = graph
        .port_id(convert, "sink")
        .ok_or_else(|| Error::PortNotFound("converter:sink".to_string()))?;
    graph.register_deferred_link(decoder, target, CapsFilter::kind_prefix("video/x-raw"))?;

    info!(port = config.port, "receiver pipeline built");
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_graph_shape() {
        let engine = EngineContext::new();
        let graph = build_sender(&engine, &SenderConfig::default()).unwrap();

        assert_eq!(graph.name(), PIPELINE_NAME);
        assert_eq!(graph.stage_count(), 7);
        assert_eq!(graph.link_count(), 6);
        let source = graph.stage_by_name("source").unwrap();
        let sink = graph.stage_by_name("udpsink").unwrap();
        assert!(graph.is_reachable(source, sink));
    }

    #[test]
    fn test_numeric_settings_reach_stages() {
        let engine = EngineContext::new();
        let sender = SenderConfig {
            num_buffers: Some(5),
            ..SenderConfig::default()
        };
        assert!(build_sender(&engine, &sender).is_ok());

        let receiver = ReceiverConfig {
            latency_ms: 60_001,
            ..ReceiverConfig::default()
        };
        let err = build_receiver(&engine, &receiver).unwrap_err();
        assert!(matches!(err, Error::Creation { .. }));
    }

    #[test]
    fn test_receiver_graph_shape() {
        let engine = EngineContext::new();
        let graph = build_receiver(&engine, &ReceiverConfig::default()).unwrap();

        assert_eq!(graph.stage_count(), 6);
        assert_eq!(graph.link_count(), 4);
        let decoder = graph.stage_by_name("decoder").unwrap();
        let sink = graph.stage_by_name("sink").unwrap();
        assert!(!graph.is_reachable(decoder, sink));
        assert!(graph.intent(decoder).is_some());
    }

    #[test]
    fn test_receiver_with_unknown_sink() {
        let engine = EngineContext::new();
        let config = ReceiverConfig {
            sink: "glimagesink".to_string(),
            ..ReceiverConfig::default()
        };
        let err = build_receiver(&engine, &config).unwrap_err();
        assert!(matches!(err, Error::Creation { .. }));
    }
}
