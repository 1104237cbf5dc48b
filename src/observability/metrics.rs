//! Metrics collection using metrics-rs.

use metrics::{Counter, Unit, counter};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

const BUFFERS_PUSHED: &str = "rtpcast_buffers_pushed";
const BUFFERS_DROPPED: &str = "rtpcast_buffers_dropped";
const BYTES_PUSHED: &str = "rtpcast_bytes_pushed";
const LINKS_CREATED: &str = "rtpcast_links_created";
const LINK_RESOLUTIONS: &str = "rtpcast_link_resolutions";
const BUS_MESSAGES: &str = "rtpcast_bus_messages";

/// Initialize metrics descriptions.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(
        BUFFERS_PUSHED,
        Unit::Count,
        "Total number of buffers pushed onto links"
    );
    metrics::describe_counter!(
        BUFFERS_DROPPED,
        Unit::Count,
        "Total number of buffers dropped before reaching a link"
    );
    metrics::describe_counter!(BYTES_PUSHED, Unit::Bytes, "Total bytes pushed onto links");
    metrics::describe_counter!(
        LINKS_CREATED,
        Unit::Count,
        "Links created between ports, static or dynamic"
    );
    metrics::describe_counter!(
        LINK_RESOLUTIONS,
        Unit::Count,
        "Outcomes of resolving announced output ports"
    );
    metrics::describe_counter!(
        BUS_MESSAGES,
        Unit::Count,
        "Messages posted on pipeline buses"
    );
}

/// Record a buffer dropped by a stage.
#[inline]
pub fn record_buffer_dropped(pipeline: &str, stage: &str, reason: &'static str) {
    counter!(
        BUFFERS_DROPPED,
        "pipeline" => pipeline.to_string(),
        "stage" => stage.to_string(),
        "reason" => reason
    )
    .increment(1);
}

/// Record a link creation.
#[inline]
pub fn record_link_created(pipeline: &str, dynamic: bool) {
    let kind = if dynamic { "dynamic" } else { "static" };
    counter!(LINKS_CREATED, "pipeline" => pipeline.to_string(), "kind" => kind).increment(1);
}

/// Record the outcome of resolving an announced port.
#[inline]
pub fn record_resolution(pipeline: &str, outcome: &'static str) {
    counter!(LINK_RESOLUTIONS, "pipeline" => pipeline.to_string(), "outcome" => outcome)
        .increment(1);
}

/// Record a message posted on a bus.
#[inline]
pub fn record_bus_message(pipeline: &str, kind: &'static str) {
    counter!(BUS_MESSAGES, "pipeline" => pipeline.to_string(), "kind" => kind).increment(1);
}

/// Metrics collector for one stage.
///
/// Holds pre-labelled counters so the data path avoids per-buffer
/// label allocation.
#[derive(Clone)]
pub struct StageMetrics {
    pipeline: String,
    stage: String,
    buffers_pushed: Counter,
    bytes_pushed: Counter,
}

impl StageMetrics {
    /// Create a collector for a stage.
    pub fn new(pipeline: &str, stage: &str) -> Self {
        Self {
            pipeline: pipeline.to_string(),
            stage: stage.to_string(),
            buffers_pushed: counter!(
                BUFFERS_PUSHED,
                "pipeline" => pipeline.to_string(),
                "stage" => stage.to_string()
            ),
            bytes_pushed: counter!(
                BYTES_PUSHED,
                "pipeline" => pipeline.to_string(),
                "stage" => stage.to_string()
            ),
        }
    }

    /// Record a pushed buffer.
    #[inline]
    pub fn record_push(&self, bytes: usize) {
        self.buffers_pushed.increment(1);
        self.bytes_pushed.increment(bytes as u64);
    }

    /// Record a dropped buffer.
    #[inline]
    pub fn record_drop(&self, reason: &'static str) {
        record_buffer_dropped(&self.pipeline, &self.stage, reason);
    }

    /// Pipeline name.
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Stage name.
    pub fn stage(&self) -> &str {
        &self.stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        init_metrics();
        // idempotent
        init_metrics();
    }

    #[test]
    fn test_stage_metrics() {
        let metrics = StageMetrics::new("test-pipeline", "pay");

        metrics.record_push(1400);
        metrics.record_drop("unlinked");

        assert_eq!(metrics.pipeline(), "test-pipeline");
        assert_eq!(metrics.stage(), "pay");
    }

    #[test]
    fn test_global_recording_functions() {
        // No recorder installed: these must be no-ops.
        record_buffer_dropped("test", "udpsrc0", "not-rtp");
        record_link_created("test", true);
        record_resolution("test", "linked");
        record_bus_message("test", "eos");
    }
}
