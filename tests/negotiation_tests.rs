//! Deferred link resolution on the receiver graph.

use rtpcast::negotiation::Resolution;
use rtpcast::pipeline::Properties;
use rtpcast::presets::{ReceiverConfig, build_receiver};
use rtpcast::{Caps, EngineContext, Error};

fn receiver() -> rtpcast::pipeline::PipelineGraph {
    let config = ReceiverConfig {
        sink: "fakesink".to_string(),
        ..ReceiverConfig::default()
    };
    build_receiver(&EngineContext::new(), &config).unwrap()
}

/// An audio pad on the decoder is ignored; the video pad after it is linked.
#[test]
fn test_mismatched_pad_then_video() {
    let graph = receiver();
    let decoder = graph.stage_by_name("decoder").unwrap();
    let converter = graph.stage_by_name("converter").unwrap();
    let sink = graph.stage_by_name("sink").unwrap();
    assert!(!graph.is_reachable(decoder, sink));
    let links_before = graph.link_count();

    let audio = graph.announce_output_port(decoder, "src_0", Caps::new("audio/x-raw"));
    assert!(matches!(audio, Resolution::Mismatch { .. }));
    assert_eq!(graph.link_count(), links_before);
    assert!(graph.intent(decoder).unwrap().fulfilled.is_none());

    let video = graph.announce_output_port(
        decoder,
        "src_1",
        Caps::new("video/x-raw").with_param("format", "I420"),
    );
    assert!(video.is_linked());
    assert_eq!(graph.link_count(), links_before + 1);
    assert!(graph.is_reachable(decoder, converter));
    assert!(graph.is_reachable(decoder, sink));

    let audio_port = graph.port_id(decoder, "src_0").unwrap();
    assert!(!graph.port(audio_port).unwrap().is_linked());
}

/// Announcing the same port again adds nothing.
#[test]
fn test_resolution_is_idempotent() {
    let graph = receiver();
    let decoder = graph.stage_by_name("decoder").unwrap();
    let raw = Caps::new("video/x-raw");

    let Resolution::Linked { link, .. } = graph.announce_output_port(decoder, "src_0", raw.clone())
    else {
        panic!("first announcement should link");
    };
    let links = graph.link_count();

    let again = graph.announce_output_port(decoder, "src_0", raw);
    assert!(!matches!(again, Resolution::Linked { .. }));
    assert_eq!(graph.link_count(), links);
    assert_eq!(graph.intent(decoder).unwrap().fulfilled, Some(link));
}

/// The first compatible pad wins even when more follow.
#[test]
fn test_first_match_wins() {
    let graph = receiver();
    let decoder = graph.stage_by_name("decoder").unwrap();

    assert!(
        graph
            .announce_output_port(decoder, "src_0", Caps::new("video/x-raw"))
            .is_linked()
    );
    assert_eq!(
        graph.announce_output_port(decoder, "src_1", Caps::new("video/x-raw")),
        Resolution::AlreadyLinked
    );
}

/// An unknown stage type fails creation and leaves the graph unchanged.
#[test]
fn test_unknown_type_adds_nothing() {
    let graph = receiver();
    let stages = graph.stage_count();

    let err = graph
        .add_stage("nosuchdecoder", &Properties::new())
        .unwrap_err();
    assert!(matches!(err, Error::Creation { .. }));
    assert_eq!(graph.stage_count(), stages);
}

/// Static links still negotiate caps: RTP caps cannot feed a raw video input.
#[test]
fn test_static_link_checks_caps() {
    let engine = EngineContext::new();
    let graph = engine.new_graph("caps");
    let depay = graph.add_stage("rtph264depay", &Properties::new()).unwrap();
    let sink = graph.add_stage("autovideosink", &Properties::new()).unwrap();

    let err = graph.link_stages(depay, sink).unwrap_err();
    assert!(matches!(err, Error::Link { .. }));
    assert_eq!(graph.link_count(), 0);
}
