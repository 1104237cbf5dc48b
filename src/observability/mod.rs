//! Observability: metrics and tracing.
//!
//! - **Metrics**: counters via `metrics`. Nothing is exported unless the
//!   host installs a recorder.
//! - **Tracing**: structured logging and spans via `tracing`.
//!
//! ## Metrics
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `rtpcast_buffers_pushed` | Counter | Buffers pushed onto a link |
//! | `rtpcast_buffers_dropped` | Counter | Buffers dropped (unlinked port, bad packet, late packet) |
//! | `rtpcast_bytes_pushed` | Counter | Bytes pushed onto a link |
//! | `rtpcast_links_created` | Counter | Links created, labelled `static` or `dynamic` |
//! | `rtpcast_link_resolutions` | Counter | Resolver outcomes by `outcome` label |
//! | `rtpcast_bus_messages` | Counter | Messages posted on a pipeline bus by `kind` |
//!
//! ## Tracing
//!
//! The controller enters a `pipeline` span; each stage worker enters a
//! `stage` span carrying the pipeline name, stage name and stage kind.

mod metrics;
mod tracing_support;

pub use self::metrics::{
    StageMetrics, init_metrics, record_buffer_dropped, record_bus_message, record_link_created,
    record_resolution,
};
pub use tracing_support::{instrument_pipeline, instrument_stage, span_pipeline, span_stage};
