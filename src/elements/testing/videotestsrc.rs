//! `videotestsrc`: generates RGB test pattern frames.

use crate::buffer::Buffer;
use crate::element::{PortTemplate, Source, StageContext};
use crate::error::Result;
use crate::format::Caps;
use crate::pipeline::{PropertyReader, Properties};
use std::time::{Duration, Instant};
use tracing::debug;

/// Pattern names, in the order their indices select them.
pub const PATTERNS: &[&str] = &[
    "smpte",
    "snow",
    "black",
    "white",
    "red",
    "green",
    "blue",
    "checkers-1",
    "checkers-2",
    "checkers-4",
    "checkers-8",
];

const DEFAULT_WIDTH: u32 = 320;
const DEFAULT_HEIGHT: u32 = 240;
const DEFAULT_FRAMERATE: (u32, u32) = (30, 1);
const BYTES_PER_PIXEL: usize = 3;

/// Video test pattern types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoPattern {
    /// SMPTE color bars.
    #[default]
    SmpteColorBars,
    /// Random noise, different every frame.
    Snow,
    /// Solid fill.
    Solid(u8, u8, u8),
    /// Black and white squares of the given size in pixels.
    Checkers(u32),
}

impl VideoPattern {
    /// Look a pattern up by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "smpte" => Self::SmpteColorBars,
            "snow" => Self::Snow,
            "black" => Self::Solid(0, 0, 0),
            "white" => Self::Solid(255, 255, 255),
            "red" => Self::Solid(255, 0, 0),
            "green" => Self::Solid(0, 255, 0),
            "blue" => Self::Solid(0, 0, 255),
            other => Self::Checkers(other.strip_prefix("checkers-")?.parse().ok()?),
        })
    }
}

/// A source of raw video frames.
///
/// | key | meaning | default |
/// |---|---|---|
/// | `pattern` | name or index from [`PATTERNS`] | `smpte` |
/// | `num-buffers` | frames to produce before end of stream | unlimited |
/// | `is-live` | pace frames at the frame rate | true |
/// | `framerate` | `n/d` | negotiated, else 30/1 |
/// | `width`, `height` | frame size | negotiated, else 320x240 |
///
/// Settings left unset are taken from the caps negotiated on the output
/// link, so a downstream `video/x-raw,framerate=20/1` filter sets the rate.
pub struct VideoTestSrc {
    pattern: VideoPattern,
    num_buffers: Option<u64>,
    live: bool,
    framerate: Option<(u32, u32)>,
    width: Option<u32>,
    height: Option<u32>,
    produced: u64,
    started: Option<Instant>,
    rng_state: u64,
}

impl VideoTestSrc {
    /// Create a live SMPTE source with negotiated settings.
    pub fn new() -> Self {
        Self {
            pattern: VideoPattern::default(),
            num_buffers: None,
            live: true,
            framerate: None,
            width: None,
            height: None,
            produced: 0,
            started: None,
            rng_state: 0x2545_F491_4F6C_DD1D,
        }
    }

    /// Create a source from stage configuration.
    pub fn from_properties(props: &Properties) -> Result<Self> {
        let mut reader = PropertyReader::new("videotestsrc", props);
        let mut src = Self::new();
        if let Some(name) = reader.choice("pattern", PATTERNS)? {
            src.pattern = VideoPattern::from_name(name).unwrap_or_default();
        }
        src.num_buffers = reader.u64("num-buffers")?;
        if let Some(live) = reader.bool("is-live")? {
            src.live = live;
        }
        src.framerate = reader.fraction("framerate")?;
        src.width = reader.u64_in("width", 1, 7680)?.map(|w| w as u32);
        src.height = reader.u64_in("height", 1, 4320)?.map(|h| h as u32);
        reader.finish()?;
        Ok(src)
    }

    /// Set the pattern.
    pub fn with_pattern(mut self, pattern: VideoPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Set the frame size.
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// Set the frame rate.
    pub fn with_framerate(mut self, num: u32, den: u32) -> Self {
        self.framerate = Some((num, den.max(1)));
        self
    }

    /// Stop after `n` frames.
    pub fn with_num_buffers(mut self, n: u64) -> Self {
        self.num_buffers = Some(n);
        self
    }

    /// Enable or disable pacing.
    pub fn with_live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    /// Fill unset settings from the negotiated output caps.
    fn settle(&mut self, caps: Option<&Caps>) {
        let int = |key: &str| {
            caps.and_then(|c| c.param(key))
                .and_then(|v| v.as_i64())
                .and_then(|v| u32::try_from(v).ok())
                .filter(|v| *v > 0)
        };
        let framerate = caps
            .and_then(|c| c.param("framerate"))
            .and_then(|v| v.as_fraction())
            .and_then(|(n, d)| Some((u32::try_from(n).ok()?, u32::try_from(d).ok()?)))
            .filter(|(n, d)| *n > 0 && *d > 0);

        self.width = self.width.or_else(|| int("width")).or(Some(DEFAULT_WIDTH));
        self.height = self.height.or_else(|| int("height")).or(Some(DEFAULT_HEIGHT));
        self.framerate = self.framerate.or(framerate).or(Some(DEFAULT_FRAMERATE));
        debug!(
            width = ?self.width,
            height = ?self.height,
            framerate = ?self.framerate,
            live = self.live,
            "videotestsrc settings"
        );
    }

    fn frame_pts(&self, index: u64) -> Duration {
        let (num, den) = self.framerate.unwrap_or(DEFAULT_FRAMERATE);
        Duration::from_nanos(index * u64::from(den) * 1_000_000_000 / u64::from(num.max(1)))
    }

    fn wait_for_frame(&mut self, pts: Duration) {
        if !self.live {
            return;
        }
        let start = *self.started.get_or_insert_with(Instant::now);
        let target = start + pts;
        let now = Instant::now();
        if target > now {
            std::thread::sleep(target - now);
        }
    }

    fn next_random(&mut self) -> u64 {
        let mut x = self.rng_state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng_state = x;
        x
    }

    fn render(&mut self) -> Vec<u8> {
        let width = self.width.unwrap_or(DEFAULT_WIDTH) as usize;
        let height = self.height.unwrap_or(DEFAULT_HEIGHT) as usize;
        let mut frame = vec![0u8; width * height * BYTES_PER_PIXEL];

        match self.pattern {
            VideoPattern::Solid(r, g, b) => {
                for pixel in frame.chunks_exact_mut(BYTES_PER_PIXEL) {
                    pixel.copy_from_slice(&[r, g, b]);
                }
            }
            VideoPattern::SmpteColorBars => {
                const BARS: [[u8; 3]; 7] = [
                    [191, 191, 191],
                    [191, 191, 0],
                    [0, 191, 191],
                    [0, 191, 0],
                    [191, 0, 191],
                    [191, 0, 0],
                    [0, 0, 191],
                ];
                for (i, pixel) in frame.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
                    let x = i % width;
                    pixel.copy_from_slice(&BARS[(x * 7 / width).min(6)]);
                }
            }
            VideoPattern::Checkers(size) => {
                let size = size.max(1) as usize;
                for (i, pixel) in frame.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
                    let (x, y) = (i % width, i / width);
                    let value = if (x / size + y / size) % 2 == 0 { 255 } else { 0 };
                    pixel.fill(value);
                }
            }
            VideoPattern::Snow => {
                for chunk in frame.chunks_mut(8) {
                    let bytes = self.next_random().to_le_bytes();
                    chunk.copy_from_slice(&bytes[..chunk.len()]);
                }
            }
        }
        frame
    }
}

impl Default for VideoTestSrc {
    fn default() -> Self {
        Self::new()
    }
}

impl Source for VideoTestSrc {
    fn produce(&mut self, ctx: &mut StageContext) -> Result<Option<Buffer>> {
        if self.num_buffers.is_some_and(|n| self.produced >= n) {
            debug!(stage = %ctx.name(), frames = self.produced, "videotestsrc done");
            return Ok(None);
        }
        if self.produced == 0 {
            self.settle(ctx.output_caps("src"));
        }

        let index = self.produced;
        let pts = self.frame_pts(index);
        self.wait_for_frame(pts);
        let frame = self.render();
        self.produced += 1;
        Ok(Some(Buffer::new(frame).with_sequence(index).with_pts(pts)))
    }

    fn port_templates(&self) -> Vec<PortTemplate> {
        vec![PortTemplate::output("src").with_caps(Caps::new("video/x-raw"))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn produce_all(src: &mut VideoTestSrc, ctx: &mut StageContext) -> Vec<Buffer> {
        std::iter::from_fn(|| src.produce(ctx).unwrap()).collect()
    }

    #[test]
    fn test_num_buffers_and_timestamps() {
        let mut src = VideoTestSrc::new()
            .with_live(false)
            .with_resolution(8, 4)
            .with_framerate(20, 1)
            .with_num_buffers(3);
        let mut ctx = StageContext::detached("src");
        let frames = produce_all(&mut src, &mut ctx);

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].len(), 8 * 4 * 3);
        assert_eq!(frames[2].pts(), Some(Duration::from_millis(100)));
        assert_eq!(frames[2].sequence(), 2);
    }

    #[test]
    fn test_settings_from_negotiated_caps() {
        let mut src = VideoTestSrc::new().with_live(false).with_num_buffers(2);
        let caps = Caps::parse("video/x-raw,framerate=20/1,width=16,height=2").unwrap();
        src.settle(Some(&caps));

        assert_eq!(src.framerate, Some((20, 1)));
        assert_eq!(src.width, Some(16));
        assert_eq!(src.frame_pts(1), Duration::from_millis(50));
    }

    #[test]
    fn test_defaults_without_caps() {
        let mut src = VideoTestSrc::new();
        src.settle(None);
        assert_eq!(src.framerate, Some(DEFAULT_FRAMERATE));
        assert_eq!((src.width, src.height), (Some(320), Some(240)));
    }

    #[test]
    fn test_patterns() {
        let mut red = VideoTestSrc::new()
            .with_pattern(VideoPattern::Solid(255, 0, 0))
            .with_resolution(2, 2);
        assert_eq!(&red.render()[..6], &[255, 0, 0, 255, 0, 0]);

        let mut checkers = VideoTestSrc::new()
            .with_pattern(VideoPattern::Checkers(1))
            .with_resolution(2, 1);
        assert_eq!(checkers.render(), vec![255, 255, 255, 0, 0, 0]);

        let mut snow = VideoTestSrc::new()
            .with_pattern(VideoPattern::Snow)
            .with_resolution(4, 4);
        assert_ne!(snow.render(), snow.render());
    }

    #[test]
    fn test_pattern_property() {
        let by_index = VideoTestSrc::from_properties(&Properties::new().with("pattern", 1)).unwrap();
        assert_eq!(by_index.pattern, VideoPattern::Snow);

        let by_name =
            VideoTestSrc::from_properties(&Properties::new().with("pattern", "checkers-8")).unwrap();
        assert_eq!(by_name.pattern, VideoPattern::Checkers(8));

        assert!(VideoTestSrc::from_properties(&Properties::new().with("pattern", 99)).is_err());
    }
}
