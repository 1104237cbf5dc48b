//! Application-facing output stages.

mod autovideosink;

pub use autovideosink::VideoRenderer;
