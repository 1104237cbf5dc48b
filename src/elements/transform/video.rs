//! `videoscale` and `videoconvert` reference stages.
//!
//! Both accept and produce `video/x-raw` and forward frames untouched:
//! they exist so graphs keep the shape the real elements give them.
//! Register a different constructor under the same name to do real
//! scaling or pixel-format conversion.

use crate::buffer::Buffer;
use crate::element::{Output, PortTemplate, StageContext, StageKind, Transform};
use crate::error::Result;
use crate::format::Caps;
use crate::pipeline::{PropertyReader, Properties};
use tracing::debug;

fn raw_video_ports() -> Vec<PortTemplate> {
    vec![
        PortTemplate::input("sink").with_caps(Caps::new("video/x-raw")),
        PortTemplate::output("src").with_caps(Caps::new("video/x-raw")),
    ]
}

/// `videoscale`: frame size adapter.
#[derive(Debug, Default)]
pub struct VideoScale {
    frames: u64,
}

impl VideoScale {
    /// Create a new scaler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scaler from stage configuration.
    pub fn from_properties(props: &Properties) -> Result<Self> {
        PropertyReader::new("videoscale", props).finish()?;
        Ok(Self::new())
    }
}

impl Transform for VideoScale {
    fn transform(&mut self, buffer: Buffer, _ctx: &mut StageContext) -> Result<Output> {
        self.frames += 1;
        Ok(Output::Single(buffer))
    }

    fn flush(&mut self, ctx: &mut StageContext) -> Result<Output> {
        debug!(stage = %ctx.name(), frames = self.frames, "videoscale drained");
        Ok(Output::None)
    }

    fn kind(&self) -> StageKind {
        StageKind::Converter
    }

    fn port_templates(&self) -> Vec<PortTemplate> {
        raw_video_ports()
    }
}

/// `videoconvert`: pixel format adapter.
#[derive(Debug, Default)]
pub struct VideoConvert {
    frames: u64,
}

impl VideoConvert {
    /// Create a new converter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a converter from stage configuration.
    pub fn from_properties(props: &Properties) -> Result<Self> {
        PropertyReader::new("videoconvert", props).finish()?;
        Ok(Self::new())
    }
}

impl Transform for VideoConvert {
    fn transform(&mut self, buffer: Buffer, _ctx: &mut StageContext) -> Result<Output> {
        self.frames += 1;
        Ok(Output::Single(buffer))
    }

    fn flush(&mut self, ctx: &mut StageContext) -> Result<Output> {
        debug!(stage = %ctx.name(), frames = self.frames, "videoconvert drained");
        Ok(Output::None)
    }

    fn kind(&self) -> StageKind {
        StageKind::Converter
    }

    fn port_templates(&self) -> Vec<PortTemplate> {
        raw_video_ports()
    }
}
