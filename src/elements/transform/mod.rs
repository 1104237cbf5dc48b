//! Format restriction and adaptation stages.

mod filter;
mod video;

pub use filter::CapsFilterStage;
pub use video::{VideoConvert, VideoScale};
