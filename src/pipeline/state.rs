//! Lifecycle states of stages and pipelines.

use std::fmt;

/// Lifecycle state of a single stage.
///
/// States are ordered: a stage moves one step at a time between
/// neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageState {
    /// Not initialized, or fully released.
    Null,
    /// Configured; no external resources held.
    Ready,
    /// External resources acquired; not flowing.
    Paused,
    /// Data flowing.
    Playing,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageState::Null => "NULL",
            StageState::Ready => "READY",
            StageState::Paused => "PAUSED",
            StageState::Playing => "PLAYING",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of a pipeline as seen by its controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// Graph under construction.
    New,
    /// Graph handed to a controller.
    Ready,
    /// Stages prepared; workers not yet started.
    Paused,
    /// Workers running.
    Playing,
    /// Finished normally.
    Eos,
    /// Finished with a fatal error.
    Error,
    /// Torn down.
    Stopped,
}

impl PipelineState {
    /// Whether the pipeline has reached a terminal outcome.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            PipelineState::Eos | PipelineState::Error | PipelineState::Stopped
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::New => "NEW",
            PipelineState::Ready => "READY",
            PipelineState::Paused => "PAUSED",
            PipelineState::Playing => "PLAYING",
            PipelineState::Eos => "EOS",
            PipelineState::Error => "ERROR",
            PipelineState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}
