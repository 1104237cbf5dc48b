//! Codec stages.
//!
//! - [`X264Enc`] (`x264enc`): wraps raw frames as an H.264 byte stream
//! - [`DecodeBin`] (`decodebin`): identifies the stream on first data and
//!   announces a decoded output
//!
//! Neither compresses pixels. Hosts with real codecs register their own
//! constructors under these names.

mod decoder;
pub mod h264;

pub use decoder::{DecodeBin, FIRST_OUTPUT};
pub use h264::X264Enc;
