//! Video renderer reference stages: `autovideosink` and `ximagesink`.
//!
//! No window is opened. Frames are counted, optionally held until their
//! presentation time, and reported in the log. Hosts that can draw
//! register their own constructors under these names.

use crate::buffer::Buffer;
use crate::element::{PortTemplate, Sink, StageContext};
use crate::error::Result;
use crate::format::Caps;
use crate::pipeline::{PropertyReader, Properties};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Holds frames until their presentation time.
#[derive(Debug, Default)]
struct ClockSync {
    base: Option<(Instant, Duration)>,
}

impl ClockSync {
    /// Time to wait before showing a frame stamped `pts`.
    fn delay(&mut self, pts: Duration, now: Instant) -> Duration {
        let (start, first_pts) = *self.base.get_or_insert((now, pts));
        let due = start + pts.saturating_sub(first_pts);
        due.saturating_duration_since(now)
    }
}

/// A sink standing in for an on-screen video renderer.
///
/// | key | meaning | default |
/// |---|---|---|
/// | `sync` | hold frames until their presentation time | true |
/// | `display` | X display name (`ximagesink` only) | `$DISPLAY` |
pub struct VideoRenderer {
    factory: &'static str,
    sync: bool,
    display: Option<String>,
    clock: ClockSync,
    frames: u64,
}

impl VideoRenderer {
    /// Create a renderer registered as `factory`.
    pub fn new(factory: &'static str) -> Self {
        Self {
            factory,
            sync: true,
            display: None,
            clock: ClockSync::default(),
            frames: 0,
        }
    }

    /// `autovideosink` from stage configuration.
    pub fn auto_from_properties(props: &Properties) -> Result<Self> {
        let mut reader = PropertyReader::new("autovideosink", props);
        let mut sink = Self::new("autovideosink");
        if let Some(sync) = reader.bool("sync")? {
            sink.sync = sync;
        }
        reader.finish()?;
        Ok(sink)
    }

    /// `ximagesink` from stage configuration.
    pub fn ximage_from_properties(props: &Properties) -> Result<Self> {
        let mut reader = PropertyReader::new("ximagesink", props);
        let mut sink = Self::new("ximagesink");
        if let Some(sync) = reader.bool("sync")? {
            sink.sync = sync;
        }
        sink.display = reader
            .string("display")
            .or_else(|| std::env::var("DISPLAY").ok());
        reader.finish()?;
        Ok(sink)
    }

    /// Disable or enable presentation-time pacing.
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Frames shown so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Sink for VideoRenderer {
    fn consume(&mut self, buffer: Buffer, ctx: &mut StageContext) -> Result<()> {
        if self.sync {
            if let Some(pts) = buffer.pts() {
                let wait = self.clock.delay(pts, Instant::now());
                if !wait.is_zero() {
                    std::thread::sleep(wait);
                }
            }
        }
        if self.frames == 0 {
            info!(
                stage = %ctx.name(),
                renderer = self.factory,
                display = self.display.as_deref().unwrap_or("default"),
                caps = ?ctx.input_caps().map(ToString::to_string),
                len = buffer.len(),
                "first frame"
            );
        }
        self.frames += 1;
        debug!(stage = %ctx.name(), frame = self.frames, pts = ?buffer.pts(), "frame");
        Ok(())
    }

    fn finish(&mut self, ctx: &mut StageContext) -> Result<()> {
        info!(stage = %ctx.name(), frames = self.frames, "renderer reached end of stream");
        Ok(())
    }

    fn port_templates(&self) -> Vec<PortTemplate> {
        vec![PortTemplate::input("sink").with_caps(Caps::new("video/x-raw"))]
    }
}
