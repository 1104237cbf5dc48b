//! Sender and receiver pipelines talking over the loopback interface.

use rtpcast::element::SinkAdapter;
use rtpcast::elements::FakeSink;
use rtpcast::format::CapsFilter;
use rtpcast::pipeline::{Controller, PipelineGraph, PipelineState, Properties, Termination};
use rtpcast::presets::RTP_H264_CAPS;
use rtpcast::EngineContext;
use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

fn free_port() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

/// The stock receiver with its renderer replaced by a counting sink.
fn receiver(engine: &EngineContext, port: u16) -> (PipelineGraph, Arc<AtomicU64>) {
    let graph = engine.new_graph("receiver");
    let source = graph
        .add_named_stage(
            "udpsrc",
            "source",
            &Properties::new().with("port", port).with("caps", RTP_H264_CAPS),
        )
        .unwrap();
    let jitter = graph
        .add_named_stage("rtpjitterbuffer", "buffer", &Properties::new().with("latency", 50))
        .unwrap();
    let depay = graph
        .add_named_stage("rtph264depay", "rtpdepay", &Properties::new())
        .unwrap();
    let decoder = graph
        .add_named_stage("decodebin", "decoder", &Properties::new())
        .unwrap();
    let convert = graph
        .add_named_stage("videoconvert", "converter", &Properties::new())
        .unwrap();
    let sink = FakeSink::new();
    let frames = sink.counter();
    let sink = graph
        .add_element("sink", Box::new(SinkAdapter::new(sink)))
        .unwrap();

    graph.link_many(&[source, jitter, depay, decoder]).unwrap();
    graph.link_stages(convert, sink).unwrap();
    let target = graph.port_id(convert, "sink").unwrap();
    graph
        .register_deferred_link(decoder, target, CapsFilter::kind_prefix("video/x-raw"))
        .unwrap();
    (graph, frames)
}

fn sender(engine: &EngineContext, port: u16, frames: u64) -> PipelineGraph {
    engine
        .parse_launch_named(
            "sender",
            &format!(
                "videotestsrc pattern=1 num-buffers={frames} width=32 height=24 \
                 ! video/x-raw,framerate=20/1 ! videoscale ! videoconvert \
                 ! x264enc tune=zerolatency bitrate=500 speed-preset=superfast \
                 ! rtph264pay ! udpsink host=127.0.0.1 port={port}"
            ),
        )
        .unwrap()
}

#[test]
fn test_frames_arrive_over_loopback() {
    let engine = EngineContext::new();
    let port = free_port();

    let (graph, frames) = receiver(&engine, port);
    let mut receiving = Controller::new(graph);
    receiving.set_playing().unwrap();

    let mut sending = Controller::new(sender(&engine, port, 20));
    assert_eq!(sending.run().unwrap(), Termination::EndOfStream);

    let deadline = Instant::now() + Duration::from_secs(5);
    while frames.load(Ordering::Relaxed) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }

    // udpsrc never ends its stream, so the receiver is still running.
    assert_eq!(receiving.timed_wait_terminal(Duration::from_millis(100)), None);
    assert!(frames.load(Ordering::Relaxed) > 0);

    let decoder = receiving.graph().stage_by_name("decoder").unwrap();
    let intent = receiving.graph().intent(decoder).unwrap();
    assert!(intent.fulfilled.is_some());

    receiving.teardown();
    assert_eq!(receiving.state(), PipelineState::Stopped);
}

#[test]
fn test_foreign_traffic_is_ignored() {
    let engine = EngineContext::new();
    let port = free_port();

    let (graph, frames) = receiver(&engine, port);
    let mut receiving = Controller::new(graph);
    receiving.set_playing().unwrap();

    let noise = UdpSocket::bind("127.0.0.1:0").unwrap();
    for _ in 0..10 {
        noise.send_to(b"not an rtp packet", ("127.0.0.1", port)).unwrap();
    }
    thread::sleep(Duration::from_millis(200));

    assert_eq!(receiving.timed_wait_terminal(Duration::from_millis(50)), None);
    assert_eq!(frames.load(Ordering::Relaxed), 0);
    receiving.teardown();
}
