//! H.264 byte-stream framing and the `x264enc` reference stage.
//!
//! The reference encoder does not compress. It wraps each raw frame in a
//! single NAL unit (IDR every `key-int-max` frames, non-IDR slices in
//! between) with emulation prevention and RBSP trailing bits, so the
//! output is a well-formed Annex B stream that packetizes like real
//! encoder output. [`frame_from_access_unit`] undoes the wrapping.

use crate::buffer::Buffer;
use crate::element::{Output, PortTemplate, StageContext, StageKind, StateChange, Transform};
use crate::error::{Error, Result};
use crate::format::Caps;
use crate::pipeline::{PropertyReader, Properties};
use bytes::Bytes;
use tracing::{info, trace};

/// Annex B start code.
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Coded slice of a non-IDR picture.
pub const NAL_SLICE: u8 = 1;

/// Coded slice of an IDR picture.
pub const NAL_IDR: u8 = 5;

const NAL_TYPE_MASK: u8 = 0x1F;
const RBSP_STOP_BYTE: u8 = 0x80;

/// x264 speed presets, fastest first.
pub const SPEED_PRESETS: &[&str] = &[
    "None",
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
    "placebo",
];

/// x264 tunings.
pub const TUNES: &[&str] = &[
    "film",
    "animation",
    "grain",
    "stillimage",
    "psnr",
    "ssim",
    "fastdecode",
    "zerolatency",
];

/// Append `rbsp` to `out`, inserting emulation prevention bytes.
pub fn escape_rbsp(rbsp: &[u8], out: &mut Vec<u8>) {
    let mut zeros = 0;
    for &byte in rbsp {
        if zeros >= 2 && byte <= 3 {
            out.push(3);
            zeros = 0;
        }
        out.push(byte);
        zeros = if byte == 0 { zeros + 1 } else { 0 };
    }
}

/// Remove emulation prevention bytes.
pub fn unescape_rbsp(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &byte in data {
        if zeros >= 2 && byte == 3 {
            zeros = 0;
            continue;
        }
        out.push(byte);
        zeros = if byte == 0 { zeros + 1 } else { 0 };
    }
    out
}

/// Split an Annex B stream into NAL units, start codes removed.
pub fn split_nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i..i + 3] == [0, 0, 1] {
            starts.push((i, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut units = Vec::with_capacity(starts.len());
    for (n, &(_, body)) in starts.iter().enumerate() {
        let mut end = starts.get(n + 1).map_or(data.len(), |&(code, _)| code);
        // A four-byte start code leaves its leading zero on the previous unit.
        while end > body && data[end - 1] == 0 {
            end -= 1;
        }
        if end > body {
            units.push(&data[body..end]);
        }
    }
    units
}

/// Wrap a raw frame as one Annex B access unit.
pub fn access_unit_from_frame(frame: &[u8], keyframe: bool) -> Bytes {
    let (ref_idc, nal_type) = if keyframe { (3, NAL_IDR) } else { (2, NAL_SLICE) };
    let mut out = Vec::with_capacity(frame.len() + frame.len() / 64 + 6);
    out.extend_from_slice(&START_CODE);
    out.push((ref_idc << 5) | nal_type);
    escape_rbsp(frame, &mut out);
    out.push(RBSP_STOP_BYTE);
    Bytes::from(out)
}

/// Recover the raw frame carried by an access unit.
///
/// Units other than coded slices are skipped. Returns `None` when the
/// access unit holds no slice.
pub fn frame_from_access_unit(data: &[u8]) -> Result<Option<Vec<u8>>> {
    let mut frame: Option<Vec<u8>> = None;
    for unit in split_nal_units(data) {
        let nal_type = unit[0] & NAL_TYPE_MASK;
        if nal_type != NAL_SLICE && nal_type != NAL_IDR {
            trace!(nal_type, "skipping NAL unit");
            continue;
        }
        let mut rbsp = unescape_rbsp(&unit[1..]);
        if rbsp.pop() != Some(RBSP_STOP_BYTE) {
            return Err(Error::InvalidData(format!(
                "slice NAL unit of {} bytes lacks trailing bits",
                unit.len()
            )));
        }
        frame.get_or_insert_with(Vec::new).extend_from_slice(&rbsp);
    }
    Ok(frame)
}

// ============================================================================
// x264enc
// ============================================================================

/// `x264enc`: H.264 encoder stage.
///
/// | key | meaning | default |
/// |---|---|---|
/// | `bitrate` | target bitrate in kbit/s | 2048 |
/// | `speed-preset` | name or index from [`SPEED_PRESETS`] | `medium` |
/// | `tune` | name from [`TUNES`] | none |
/// | `key-int-max` | frames between IDR pictures | 60 |
///
/// Rate control settings are validated and reported but do not change the
/// output.
pub struct X264Enc {
    bitrate: u32,
    speed_preset: &'static str,
    tune: Option<&'static str>,
    key_int_max: u64,
    frames: u64,
    bytes_in: u64,
}

impl X264Enc {
    /// Create an encoder with default settings.
    pub fn new() -> Self {
        Self {
            bitrate: 2048,
            speed_preset: "medium",
            tune: None,
            key_int_max: 60,
            frames: 0,
            bytes_in: 0,
        }
    }

    /// Create an encoder from stage configuration.
    pub fn from_properties(props: &Properties) -> Result<Self> {
        let mut reader = PropertyReader::new("x264enc", props);
        let mut enc = Self::new();
        if let Some(kbps) = reader.u64_in("bitrate", 1, 2_048_000)? {
            enc.bitrate = kbps as u32;
        }
        if let Some(preset) = reader.choice("speed-preset", SPEED_PRESETS)? {
            enc.speed_preset = preset;
        }
        enc.tune = reader.choice("tune", TUNES)?;
        if let Some(n) = reader.u64_in("key-int-max", 1, 65_535)? {
            enc.key_int_max = n;
        }
        reader.finish()?;
        Ok(enc)
    }

    /// Target bitrate in kbit/s.
    pub fn bitrate(&self) -> u32 {
        self.bitrate
    }

    /// Speed preset.
    pub fn speed_preset(&self) -> &'static str {
        self.speed_preset
    }

    /// Tuning, if any.
    pub fn tune(&self) -> Option<&'static str> {
        self.tune
    }
}

impl Default for X264Enc {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for X264Enc {
    fn transform(&mut self, buffer: Buffer, _ctx: &mut StageContext) -> Result<Output> {
        let keyframe = self.frames % self.key_int_max == 0;
        self.frames += 1;
        self.bytes_in += buffer.len() as u64;

        let mut out = Buffer::new(access_unit_from_frame(buffer.data(), keyframe))
            .with_sequence(buffer.sequence());
        if let Some(pts) = buffer.pts() {
            out = out.with_pts(pts);
        }
        Ok(Output::Single(out))
    }

    fn kind(&self) -> StageKind {
        StageKind::Encoder
    }

    fn port_templates(&self) -> Vec<PortTemplate> {
        vec![
            PortTemplate::input("sink").with_caps(Caps::new("video/x-raw")),
            PortTemplate::output("src").with_caps(
                Caps::new("video/x-h264")
                    .with_param("stream-format", "byte-stream")
                    .with_param("alignment", "au"),
            ),
        ]
    }

    fn change_state(&mut self, change: StateChange) -> Result<()> {
        match change {
            StateChange::PausedToPlaying => info!(
                bitrate = self.bitrate,
                speed_preset = self.speed_preset,
                tune = self.tune.unwrap_or("none"),
                "x264enc started"
            ),
            StateChange::PausedToReady => info!(
                frames = self.frames,
                bytes_in = self.bytes_in,
                "x264enc stopped"
            ),
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_roundtrip_with_zero_runs() {
        let rbsp = [0, 0, 0, 0, 1, 0, 0, 2, 0, 0, 3, 7, 0, 0];
        let mut escaped = Vec::new();
        escape_rbsp(&rbsp, &mut escaped);

        assert!(!escaped.windows(3).any(|w| w == [0, 0, 1] || w == [0, 0, 0]));
        assert_eq!(unescape_rbsp(&escaped), rbsp);
    }

    #[test]
    fn test_split_three_and_four_byte_start_codes() {
        let stream = [0, 0, 0, 1, 0x67, 1, 2, 0, 0, 1, 0x68, 3, 0, 0, 0, 1, 0x65, 4];
        let units = split_nal_units(&stream);
        assert_eq!(units, vec![&[0x67, 1, 2][..], &[0x68, 3][..], &[0x65, 4][..]]);
    }

    #[test]
    fn test_black_frame_survives_wrapping() {
        let frame = vec![0u8; 300];
        let au = access_unit_from_frame(&frame, true);

        assert_eq!(&au[..4], &START_CODE);
        assert_eq!(au[4] & NAL_TYPE_MASK, NAL_IDR);
        assert_eq!(split_nal_units(&au).len(), 1);
        assert_eq!(frame_from_access_unit(&au).unwrap(), Some(frame));
    }

    #[test]
    fn test_parameter_sets_are_skipped() {
        let mut stream = vec![0, 0, 0, 1, 0x67, 0x42, 0, 0x1E];
        stream.extend_from_slice(&access_unit_from_frame(&[5, 6, 7], false));
        assert_eq!(frame_from_access_unit(&stream).unwrap(), Some(vec![5, 6, 7]));
        assert_eq!(frame_from_access_unit(&[0, 0, 0, 1, 0x67, 1]).unwrap(), None);
    }

    #[test]
    fn test_missing_trailing_bits() {
        assert!(frame_from_access_unit(&[0, 0, 0, 1, 0x65, 1, 2]).is_err());
    }

    #[test]
    fn test_keyframe_interval() {
        let props = Properties::new().with("key-int-max", 2);
        let mut enc = X264Enc::from_properties(&props).unwrap();
        let mut ctx = StageContext::detached("enc");

        let types: Vec<u8> = (0..4)
            .map(|_| {
                let out = enc.transform(Buffer::new(vec![1, 2, 3]), &mut ctx).unwrap();
                out.into_vec()[0].data()[4] & NAL_TYPE_MASK
            })
            .collect();
        assert_eq!(types, vec![NAL_IDR, NAL_SLICE, NAL_IDR, NAL_SLICE]);
    }

    #[test]
    fn test_stock_sender_settings() {
        let props = Properties::new()
            .with("tune", "zerolatency")
            .with("bitrate", 500)
            .with("speed-preset", "superfast");
        let enc = X264Enc::from_properties(&props).unwrap();

        assert_eq!(enc.bitrate(), 500);
        assert_eq!(enc.speed_preset(), "superfast");
        assert_eq!(enc.tune(), Some("zerolatency"));
        assert!(X264Enc::from_properties(&Properties::new().with("tune", "fast")).is_err());
    }
}
