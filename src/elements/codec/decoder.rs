//! `decodebin`: a decoder whose output appears once the stream is known.

use super::h264::frame_from_access_unit;
use crate::buffer::Buffer;
use crate::element::{Output, PortTemplate, StageContext, StageKind, Transform};
use crate::error::{Error, Result};
use crate::format::Caps;
use crate::negotiation::Resolution;
use crate::pipeline::{PropertyReader, Properties};
use tracing::{debug, info, warn};

/// Name of the output port announced for the first stream.
pub const FIRST_OUTPUT: &str = "src_0";

/// What the decoder does with its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Path {
    /// Unwrap H.264 access units into raw frames.
    H264,
    /// Already raw; forwarded as is.
    Raw,
}

/// `decodebin`: auto-plugging decoder.
///
/// Declares only its input and a sometimes-present `src_%u` output. On
/// the first buffer it inspects the input caps (or sniffs an Annex B
/// start code when there are none), picks a path and announces
/// `src_0` with the decoded caps. Whether that output gets linked is up to
/// the graph's deferred link for this stage; frames pushed while it is
/// unlinked are dropped.
///
/// Encoded H.264 decodes to `video/x-raw,format=RGB`. Raw audio or video
/// passes through under its own caps. Anything else is a stream error.
#[derive(Debug, Default)]
pub struct DecodeBin {
    path: Option<Path>,
    announced: Option<Resolution>,
    frames: u64,
}

impl DecodeBin {
    /// Create a new decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a decoder from stage configuration.
    pub fn from_properties(props: &Properties) -> Result<Self> {
        PropertyReader::new("decodebin", props).finish()?;
        Ok(Self::new())
    }

    /// Outcome of announcing the output, once it happened.
    pub fn announced(&self) -> Option<&Resolution> {
        self.announced.as_ref()
    }

    fn choose(input: Option<&Caps>, first: &Buffer) -> Result<(Path, Caps)> {
        let raw_rgb = || Caps::new("video/x-raw").with_param("format", "RGB");
        match input {
            Some(caps) if caps.media_kind() == "video/x-h264" => Ok((Path::H264, raw_rgb())),
            Some(caps) if caps.media_kind().ends_with("/x-raw") => Ok((Path::Raw, caps.clone())),
            Some(caps) => Err(Error::Caps {
                input: caps.to_string(),
                reason: "no decoder available for this stream".to_string(),
            }),
            None if first.data().starts_with(&[0, 0, 1]) || first.data().starts_with(&[0, 0, 0, 1]) => {
                Ok((Path::H264, raw_rgb()))
            }
            None => Err(Error::Caps {
                input: "unknown".to_string(),
                reason: "cannot identify the stream type".to_string(),
            }),
        }
    }
}

impl Transform for DecodeBin {
    fn transform(&mut self, buffer: Buffer, ctx: &mut StageContext) -> Result<Output> {
        let path = match self.path {
            Some(path) => path,
            None => {
                let (path, caps) = Self::choose(ctx.input_caps(), &buffer)?;
                info!(stage = %ctx.name(), caps = %caps, "stream identified");
                let resolution = ctx.announce_output(FIRST_OUTPUT, caps);
                if !resolution.is_linked() {
                    warn!(
                        stage = %ctx.name(),
                        outcome = ?resolution,
                        "decoded output not linked, frames will be dropped"
                    );
                }
                self.announced = Some(resolution);
                self.path = Some(path);
                path
            }
        };

        let frame = match path {
            Path::Raw => buffer,
            Path::H264 => match frame_from_access_unit(buffer.data()) {
                Ok(Some(frame)) => {
                    let out = Buffer::new(frame).with_sequence(self.frames);
                    match buffer.pts() {
                        Some(pts) => out.with_pts(pts),
                        None => out,
                    }
                }
                Ok(None) => return Ok(Output::None),
                Err(e) => {
                    debug!(stage = %ctx.name(), error = %e, "dropping undecodable access unit");
                    ctx.metrics().record_drop("corrupt");
                    return Ok(Output::None);
                }
            },
        };
        self.frames += 1;
        Ok(Output::Single(frame))
    }

    fn flush(&mut self, ctx: &mut StageContext) -> Result<Output> {
        debug!(stage = %ctx.name(), frames = self.frames, "decodebin drained");
        Ok(Output::None)
    }

    fn kind(&self) -> StageKind {
        StageKind::Decoder
    }

    fn port_templates(&self) -> Vec<PortTemplate> {
        vec![PortTemplate::input("sink"), PortTemplate::sometimes_output("src_%u")]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::codec::h264::access_unit_from_frame;

    #[test]
    fn test_announces_raw_video_for_h264() {
        let mut dec = DecodeBin::new();
        let mut ctx = StageContext::detached("decoder");
        ctx.set_input_caps(Caps::new("video/x-h264"));

        let au = access_unit_from_frame(&[1, 2, 3, 4], true);
        let out = dec.transform(Buffer::new(au), &mut ctx).unwrap();

        assert_eq!(out.into_vec()[0].data().as_ref(), &[1, 2, 3, 4]);
        assert_eq!(ctx.output_caps(FIRST_OUTPUT).unwrap().media_kind(), "video/x-raw");
        // A detached context has no graph to resolve against.
        assert_eq!(dec.announced(), Some(&Resolution::NoIntent));
    }

    #[test]
    fn test_sniffs_annex_b_without_caps() {
        let mut dec = DecodeBin::new();
        let mut ctx = StageContext::detached("decoder");
        let au = access_unit_from_frame(&[9; 16], false);
        assert_eq!(dec.transform(Buffer::new(au), &mut ctx).unwrap().len(), 1);
    }

    #[test]
    fn test_raw_audio_passes_through() {
        let mut dec = DecodeBin::new();
        let mut ctx = StageContext::detached("decoder");
        ctx.set_input_caps(Caps::new("audio/x-raw"));

        let out = dec.transform(Buffer::new(vec![5, 5]), &mut ctx).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(ctx.output_caps(FIRST_OUTPUT).unwrap().media_kind(), "audio/x-raw");
    }

    #[test]
    fn test_unknown_stream_is_an_error() {
        let mut dec = DecodeBin::new();
        let mut ctx = StageContext::detached("decoder");
        ctx.set_input_caps(Caps::new("application/x-unknown"));

        let err = dec.transform(Buffer::new(vec![1]), &mut ctx).unwrap_err();
        assert!(matches!(err, Error::Caps { .. }));
    }

    #[test]
    fn test_corrupt_unit_dropped() {
        let mut dec = DecodeBin::new();
        let mut ctx = StageContext::detached("decoder");
        ctx.set_input_caps(Caps::new("video/x-h264"));
        let out = dec.transform(Buffer::new(vec![0, 0, 0, 1, 0x65, 1]), &mut ctx).unwrap();
        assert!(out.is_empty());
    }
}
