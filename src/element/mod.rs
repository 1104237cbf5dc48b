//! Stage behaviours, ports and the runtime context.
//!
//! - [`Source`]: produces buffers (test pattern, network receiver)
//! - [`Transform`]: turns input buffers into output buffers
//! - [`Sink`]: consumes buffers (network sender, renderer)
//!
//! # Design
//!
//! Processing is synchronous: `produce`/`transform`/`consume` run on the
//! stage's own worker thread and block on links. The adapters turn a
//! behaviour into an [`ElementDyn`] whose `run` loop the controller drives.
//!
//! # Example
//!
//! ```rust
//! use rtpcast::element::{Output, StageContext, Transform};
//! use rtpcast::{Buffer, Result};
//!
//! struct Passthrough;
//!
//! impl Transform for Passthrough {
//!     fn transform(&mut self, buffer: Buffer, _ctx: &mut StageContext) -> Result<Output> {
//!         Ok(buffer.into())
//!     }
//! }
//! ```

mod context;
mod pad;
mod traits;

pub use context::StageContext;
pub use pad::{Port, PortDirection, PortId, PortPresence, PortTemplate};
pub use traits::{
    ElementDyn, Output, Sink, SinkAdapter, Source, SourceAdapter, StageKind, StateChange,
    Transform, TransformAdapter,
};
