//! Test and utility stages.
//!
//! - [`VideoTestSrc`] (`videotestsrc`): generates video test patterns
//! - [`FakeSink`] (`fakesink`): discards buffers

mod null;
mod videotestsrc;

pub use null::FakeSink;
pub use videotestsrc::{PATTERNS, VideoPattern, VideoTestSrc};
