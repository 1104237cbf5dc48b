//! Stage behaviour traits.
//!
//! Processing is synchronous: each stage runs on its own worker thread and
//! blocks on its input link. Implement [`Source`], [`Transform`] or
//! [`Sink`] and wrap it in the matching adapter to get an [`ElementDyn`]
//! the graph can drive.

use crate::buffer::Buffer;
use crate::element::context::StageContext;
use crate::element::pad::PortTemplate;
use crate::error::Result;
use crate::link::Flow;
use crate::pipeline::StageState;
use tracing::trace;

// ============================================================================
// Output Type
// ============================================================================

/// Result of transforming one buffer.
#[derive(Debug, Default)]
pub enum Output {
    /// Nothing to push (buffer was absorbed or dropped).
    #[default]
    None,
    /// One output buffer.
    Single(Buffer),
    /// Several output buffers, pushed in order.
    Multiple(Vec<Buffer>),
}

impl Output {
    /// Create an empty output.
    pub fn none() -> Self {
        Self::None
    }

    /// Number of buffers.
    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Single(_) => 1,
            Self::Multiple(v) => v.len(),
        }
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert to a Vec of buffers.
    pub fn into_vec(self) -> Vec<Buffer> {
        match self {
            Self::None => Vec::new(),
            Self::Single(b) => vec![b],
            Self::Multiple(v) => v,
        }
    }
}

impl From<Buffer> for Output {
    fn from(b: Buffer) -> Self {
        Self::Single(b)
    }
}

impl From<Option<Buffer>> for Output {
    fn from(opt: Option<Buffer>) -> Self {
        opt.map_or(Self::None, Self::Single)
    }
}

impl From<Vec<Buffer>> for Output {
    fn from(mut v: Vec<Buffer>) -> Self {
        match v.len() {
            0 => Self::None,
            1 => v.pop().map_or(Self::None, Self::Single),
            _ => Self::Multiple(v),
        }
    }
}

impl IntoIterator for Output {
    type Item = Buffer;
    type IntoIter = std::vec::IntoIter<Buffer>;

    fn into_iter(self) -> Self::IntoIter {
        self.into_vec().into_iter()
    }
}

// ============================================================================
// Stage classification and lifecycle
// ============================================================================

/// Role tag of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Produces data (test source, network receiver).
    Source,
    /// Restricts or inspects data without changing its format.
    Filter,
    /// Decodes compressed data; may announce outputs at runtime.
    Decoder,
    /// Compresses raw data.
    Encoder,
    /// Splits frames into network packets.
    Payloader,
    /// Reassembles frames from network packets.
    Depayloader,
    /// Reorders packets by sequence number.
    JitterBuffer,
    /// Normalizes format parameters.
    Converter,
    /// Consumes data (network sender, renderer).
    Sink,
}

impl StageKind {
    /// Lowercase name used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Source => "source",
            StageKind::Filter => "filter",
            StageKind::Decoder => "decoder",
            StageKind::Encoder => "encoder",
            StageKind::Payloader => "payloader",
            StageKind::Depayloader => "depayloader",
            StageKind::JitterBuffer => "jitterbuffer",
            StageKind::Converter => "converter",
            StageKind::Sink => "sink",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single-step lifecycle transition of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateChange {
    /// Allocate resources that need no external access.
    NullToReady,
    /// Acquire external resources (sockets) and prepare to flow.
    ReadyToPaused,
    /// Start flowing.
    PausedToPlaying,
    /// Stop flowing.
    PlayingToPaused,
    /// Release external resources.
    PausedToReady,
    /// Release everything.
    ReadyToNull,
}

impl StateChange {
    /// State before the transition.
    pub fn from(&self) -> StageState {
        match self {
            StateChange::NullToReady => StageState::Null,
            StateChange::ReadyToPaused | StateChange::ReadyToNull => StageState::Ready,
            StateChange::PausedToPlaying | StateChange::PausedToReady => StageState::Paused,
            StateChange::PlayingToPaused => StageState::Playing,
        }
    }

    /// State after the transition.
    pub fn to(&self) -> StageState {
        match self {
            StateChange::ReadyToNull => StageState::Null,
            StateChange::NullToReady | StateChange::PausedToReady => StageState::Ready,
            StateChange::ReadyToPaused | StateChange::PlayingToPaused => StageState::Paused,
            StateChange::PausedToPlaying => StageState::Playing,
        }
    }

    /// Transitions that walk a stage from `from` down to `to`.
    pub fn downward(from: StageState, to: StageState) -> Vec<StateChange> {
        let mut steps = Vec::new();
        let mut current = from;
        while current > to {
            let step = match current {
                StageState::Playing => StateChange::PlayingToPaused,
                StageState::Paused => StateChange::PausedToReady,
                StageState::Ready => StateChange::ReadyToNull,
                StageState::Null => break,
            };
            current = step.to();
            steps.push(step);
        }
        steps
    }
}

// ============================================================================
// Behaviour traits
// ============================================================================

/// A stage that produces data.
pub trait Source: Send {
    /// Produce the next buffer. `Ok(None)` ends the stream.
    fn produce(&mut self, ctx: &mut StageContext) -> Result<Option<Buffer>>;

    /// Role tag.
    fn kind(&self) -> StageKind {
        StageKind::Source
    }

    /// Declared ports.
    fn port_templates(&self) -> Vec<PortTemplate> {
        vec![PortTemplate::output("src")]
    }

    /// React to a lifecycle transition.
    fn change_state(&mut self, _change: StateChange) -> Result<()> {
        Ok(())
    }
}

/// A stage that turns input buffers into output buffers.
pub trait Transform: Send {
    /// Process one input buffer.
    fn transform(&mut self, buffer: Buffer, ctx: &mut StageContext) -> Result<Output>;

    /// Emit anything still held when the input reaches end of stream.
    fn flush(&mut self, _ctx: &mut StageContext) -> Result<Output> {
        Ok(Output::None)
    }

    /// Role tag.
    fn kind(&self) -> StageKind {
        StageKind::Filter
    }

    /// Declared ports.
    fn port_templates(&self) -> Vec<PortTemplate> {
        vec![PortTemplate::input("sink"), PortTemplate::output("src")]
    }

    /// React to a lifecycle transition.
    fn change_state(&mut self, _change: StateChange) -> Result<()> {
        Ok(())
    }
}

/// A stage that consumes data.
pub trait Sink: Send {
    /// Consume one buffer.
    fn consume(&mut self, buffer: Buffer, ctx: &mut StageContext) -> Result<()>;

    /// Called once when the input reaches end of stream.
    fn finish(&mut self, _ctx: &mut StageContext) -> Result<()> {
        Ok(())
    }

    /// Role tag.
    fn kind(&self) -> StageKind {
        StageKind::Sink
    }

    /// Declared ports.
    fn port_templates(&self) -> Vec<PortTemplate> {
        vec![PortTemplate::input("sink")]
    }

    /// React to a lifecycle transition.
    fn change_state(&mut self, _change: StateChange) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Dynamic Element (Type-Erased)
// ============================================================================

/// Type-erased stage behaviour driven by the graph.
///
/// Most stages implement [`Source`], [`Transform`] or [`Sink`] and are
/// wrapped by an adapter.
pub trait ElementDyn: Send {
    /// Role tag.
    fn kind(&self) -> StageKind;

    /// Declared ports.
    fn port_templates(&self) -> Vec<PortTemplate>;

    /// React to a lifecycle transition. An error refuses it.
    fn change_state(&mut self, change: StateChange) -> Result<()>;

    /// Run the stage's data loop until end of stream or shutdown.
    fn run(&mut self, ctx: &mut StageContext) -> Result<()>;
}

// ============================================================================
// Adapters
// ============================================================================

/// Wrapper to adapt a [`Source`] to [`ElementDyn`].
pub struct SourceAdapter<S: Source> {
    inner: S,
}

impl<S: Source> SourceAdapter<S> {
    /// Create a new source adapter.
    pub fn new(source: S) -> Self {
        Self { inner: source }
    }
}

impl<S: Source + 'static> ElementDyn for SourceAdapter<S> {
    fn kind(&self) -> StageKind {
        self.inner.kind()
    }

    fn port_templates(&self) -> Vec<PortTemplate> {
        self.inner.port_templates()
    }

    fn change_state(&mut self, change: StateChange) -> Result<()> {
        self.inner.change_state(change)
    }

    fn run(&mut self, ctx: &mut StageContext) -> Result<()> {
        while !ctx.is_shutting_down() {
            match self.inner.produce(ctx)? {
                Some(buffer) => ctx.push(buffer)?,
                None => {
                    trace!(stage = %ctx.name(), "source finished");
                    return ctx.push_eos();
                }
            }
        }
        Ok(())
    }
}

/// Wrapper to adapt a [`Transform`] to [`ElementDyn`].
pub struct TransformAdapter<T: Transform> {
    inner: T,
}

impl<T: Transform> TransformAdapter<T> {
    /// Create a new transform adapter.
    pub fn new(transform: T) -> Self {
        Self { inner: transform }
    }
}

impl<T: Transform + 'static> ElementDyn for TransformAdapter<T> {
    fn kind(&self) -> StageKind {
        self.inner.kind()
    }

    fn port_templates(&self) -> Vec<PortTemplate> {
        self.inner.port_templates()
    }

    fn change_state(&mut self, change: StateChange) -> Result<()> {
        self.inner.change_state(change)
    }

    fn run(&mut self, ctx: &mut StageContext) -> Result<()> {
        while let Some(item) = ctx.recv() {
            match item {
                Flow::Buffer(buffer) => {
                    for out in self.inner.transform(buffer, ctx)? {
                        ctx.push(out)?;
                    }
                }
                Flow::Eos => {
                    for out in self.inner.flush(ctx)? {
                        ctx.push(out)?;
                    }
                    return ctx.push_eos();
                }
            }
        }
        Ok(())
    }
}

/// Wrapper to adapt a [`Sink`] to [`ElementDyn`].
pub struct SinkAdapter<S: Sink> {
    inner: S,
}

impl<S: Sink> SinkAdapter<S> {
    /// Create a new sink adapter.
    pub fn new(sink: S) -> Self {
        Self { inner: sink }
    }
}

impl<S: Sink + 'static> ElementDyn for SinkAdapter<S> {
    fn kind(&self) -> StageKind {
        self.inner.kind()
    }

    fn port_templates(&self) -> Vec<PortTemplate> {
        self.inner.port_templates()
    }

    fn change_state(&mut self, change: StateChange) -> Result<()> {
        self.inner.change_state(change)
    }

    fn run(&mut self, ctx: &mut StageContext) -> Result<()> {
        while let Some(item) = ctx.recv() {
            match item {
                Flow::Buffer(buffer) => self.inner.consume(buffer, ctx)?,
                Flow::Eos => {
                    self.inner.finish(ctx)?;
                    ctx.sink_eos();
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}
