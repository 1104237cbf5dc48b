//! `fakesink`: discards everything it receives.

use crate::buffer::Buffer;
use crate::element::{Sink, StageContext};
use crate::error::Result;
use crate::pipeline::{PropertyReader, Properties};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// A sink that discards all buffers.
///
/// Useful for draining a pipeline without side effects. The buffer count
/// is shared through [`counter`](Self::counter) so it can be read while
/// the pipeline runs.
///
/// | key | meaning | default |
/// |---|---|---|
/// | `silent` | log nothing per buffer | true |
pub struct FakeSink {
    silent: bool,
    count: Arc<AtomicU64>,
    bytes: u64,
}

impl FakeSink {
    /// Create a new silent sink.
    pub fn new() -> Self {
        Self {
            silent: true,
            count: Arc::new(AtomicU64::new(0)),
            bytes: 0,
        }
    }

    /// Create a sink from stage configuration.
    pub fn from_properties(props: &Properties) -> Result<Self> {
        let mut reader = PropertyReader::new("fakesink", props);
        let mut sink = Self::new();
        if let Some(silent) = reader.bool("silent")? {
            sink.silent = silent;
        }
        reader.finish()?;
        Ok(sink)
    }

    /// Shared count of consumed buffers.
    pub fn counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.count)
    }

    /// Get the number of buffers consumed.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for FakeSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for FakeSink {
    fn consume(&mut self, buffer: Buffer, ctx: &mut StageContext) -> Result<()> {
        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        self.bytes += buffer.len() as u64;
        if !self.silent {
            info!(
                stage = %ctx.name(),
                n,
                len = buffer.len(),
                pts = ?buffer.pts(),
                "chain"
            );
        }
        Ok(())
    }

    fn finish(&mut self, ctx: &mut StageContext) -> Result<()> {
        info!(stage = %ctx.name(), buffers = self.count(), bytes = self.bytes, "fakesink reached end of stream");
        Ok(())
    }
}
