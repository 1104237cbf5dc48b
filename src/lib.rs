//! # rtpcast
//!
//! A streaming media pipeline engine with runtime caps negotiation, and a
//! pair of stock pipelines that send and receive H.264 video over RTP/UDP.
//!
//! ## Features
//!
//! - **Stage graph**: stages with typed ports, linked into a DAG
//! - **Caps negotiation**: links are checked and narrowed when made
//! - **Deferred links**: outputs that only exist at runtime are linked when
//!   the stage announces them
//! - **Controller**: READY → PAUSED → PLAYING, a message bus, and a
//!   single terminal outcome
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rtpcast::prelude::*;
//!
//! let engine = EngineContext::new();
//! let graph = engine.parse_launch("videotestsrc num-buffers=30 ! fakesink")?;
//! let mut controller = Controller::new(graph);
//! let outcome = controller.run()?;
//! assert_eq!(outcome, Termination::EndOfStream);
//! # Ok::<(), rtpcast::Error>(())
//! ```
//!
//! The stock pipelines live in [`presets`]:
//!
//! ```rust,no_run
//! use rtpcast::presets::{SenderConfig, build_sender};
//! use rtpcast::prelude::*;
//!
//! let engine = EngineContext::new();
//! let graph = build_sender(&engine, &SenderConfig::default())?;
//! Controller::new(graph).run()?;
//! # Ok::<(), rtpcast::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod element;
pub mod elements;
pub mod engine;
pub mod error;
pub mod format;
pub mod link;
pub mod negotiation;
pub mod observability;
pub mod pipeline;
pub mod presets;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::buffer::Buffer;
    pub use crate::element::{ElementDyn, Output, Sink, Source, StageContext, StageKind, Transform};
    pub use crate::engine::EngineContext;
    pub use crate::error::{Error, Result};
    pub use crate::format::{Caps, CapsFilter};
    pub use crate::negotiation::Resolution;
    pub use crate::pipeline::{Controller, PipelineGraph, PipelineState, Properties, Termination};
}

pub use buffer::Buffer;
pub use engine::EngineContext;
pub use error::{Error, Result};
pub use format::{Caps, CapsFilter};
