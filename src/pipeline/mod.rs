//! Pipeline construction and execution.
//!
//! - [`PipelineGraph`]: stages, ports, links and deferred link intents
//! - [`StageFactory`]: creates stages from a type name and a config map
//! - [`Controller`]: drives a graph to PLAYING and waits for the outcome
//! - [`EventBus`]: messages posted by stages and the controller
//!
//! # Example
//!
//! ```rust,no_run
//! use rtpcast::EngineContext;
//! use rtpcast::pipeline::Controller;
//!
//! let engine = EngineContext::new();
//! let graph = engine.parse_launch("videotestsrc num-buffers=10 ! fakesink")?;
//! let outcome = Controller::new(graph).run()?;
//! println!("{outcome}");
//! # Ok::<(), rtpcast::Error>(())
//! ```

mod controller;
pub(crate) mod events;
pub mod factory;
pub(crate) mod graph;
mod launch;
pub mod parser;
mod state;

pub use controller::{Controller, Termination};
pub use events::{BusSender, EventBus, Message, MessageFilter};
pub use factory::{PropertyReader, StageConstructor, StageFactory};
pub use graph::{GraphPolicy, Link, LinkId, PipelineGraph, StageId, StageInfo};
pub use launch::build_from_launch;
pub use parser::{ParsedElement, ParsedPipeline, ParsedSegment, Properties, PropertyValue, parse_pipeline};
pub use state::{PipelineState, StageState};
