//! Stage runtime context.
//!
//! The context is handed to a stage's worker while the pipeline plays. It
//! owns the stage's end of its links and gives access to the pipeline's
//! services: the message bus, the link resolver, end-of-stream accounting
//! and the shutdown flag.

use crate::buffer::Buffer;
use crate::element::pad::PortId;
use crate::error::{Error, Result};
use crate::format::Caps;
use crate::link::{Flow, LinkReceiver, LinkSender, LocalLink};
use crate::negotiation::{LinkResolver, Resolution};
use crate::observability::StageMetrics;
use crate::pipeline::StageId;
use crate::pipeline::events::{BusSender, EosTracker};
use crate::pipeline::graph::OutputWiring;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

/// Capacity of links attached by hand to a detached context.
const DETACHED_LINK_CAPACITY: usize = 64;

struct OutputSlot {
    port: Option<PortId>,
    name: String,
    caps: Option<Caps>,
    sender: Option<LinkSender>,
}

/// Runtime context for a stage.
pub struct StageContext {
    stage: Option<StageId>,
    name: String,
    input: Option<LinkReceiver>,
    input_caps: Option<Caps>,
    outputs: Vec<OutputSlot>,
    resolver: Option<LinkResolver>,
    bus: Option<BusSender>,
    eos: Option<Arc<EosTracker>>,
    shutdown: Arc<AtomicBool>,
    metrics: StageMetrics,
}

impl StageContext {
    pub(crate) fn new(
        stage: StageId,
        name: &str,
        pipeline: &str,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            stage: Some(stage),
            name: name.to_string(),
            input: None,
            input_caps: None,
            outputs: Vec::new(),
            resolver: None,
            bus: None,
            eos: None,
            shutdown,
            metrics: StageMetrics::new(pipeline, name),
        }
    }

    /// A context not attached to any graph.
    ///
    /// Used to drive a stage by hand; links are attached with
    /// [`attach_input`](Self::attach_input) and
    /// [`attach_output`](Self::attach_output).
    pub fn detached(name: &str) -> Self {
        Self {
            stage: None,
            name: name.to_string(),
            input: None,
            input_caps: None,
            outputs: Vec::new(),
            resolver: None,
            bus: None,
            eos: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            metrics: StageMetrics::new("detached", name),
        }
    }

    pub(crate) fn with_input(mut self, input: Option<(LinkReceiver, Option<Caps>)>) -> Self {
        if let Some((receiver, caps)) = input {
            self.input = Some(receiver);
            self.input_caps = caps;
        }
        self
    }

    pub(crate) fn with_outputs(mut self, outputs: Vec<OutputWiring>) -> Self {
        self.outputs = outputs
            .into_iter()
            .map(|wiring| OutputSlot {
                port: Some(wiring.port),
                name: wiring.name,
                caps: wiring.caps,
                sender: wiring.sender,
            })
            .collect();
        self
    }

    pub(crate) fn with_resolver(mut self, resolver: LinkResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub(crate) fn with_bus(mut self, bus: BusSender) -> Self {
        self.bus = Some(bus);
        self
    }

    pub(crate) fn with_eos(mut self, eos: Arc<EosTracker>) -> Self {
        self.eos = Some(eos);
        self
    }

    /// Attach a fresh link to the output named `name`, returning its
    /// receiving end.
    pub fn attach_output(&mut self, name: &str) -> LinkReceiver {
        let (sender, receiver) = LocalLink::bounded(DETACHED_LINK_CAPACITY);
        self.upsert_output(name, None, None, Some(sender));
        receiver
    }

    /// Attach the receiving end of the stage's input link.
    pub fn attach_input(&mut self, receiver: LinkReceiver) {
        self.input = Some(receiver);
    }

    /// Set the caps the input link carries.
    pub fn set_input_caps(&mut self, caps: Caps) {
        self.input_caps = Some(caps);
    }

    fn upsert_output(
        &mut self,
        name: &str,
        port: Option<PortId>,
        caps: Option<Caps>,
        sender: Option<LinkSender>,
    ) {
        match self.outputs.iter_mut().find(|slot| slot.name == name) {
            Some(slot) => {
                if port.is_some() {
                    slot.port = port;
                }
                if caps.is_some() {
                    slot.caps = caps;
                }
                if sender.is_some() {
                    slot.sender = sender;
                }
            }
            None => self.outputs.push(OutputSlot {
                port,
                name: name.to_string(),
                caps,
                sender,
            }),
        }
    }

    /// Stage name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the pipeline the stage runs in.
    pub fn pipeline(&self) -> &str {
        self.metrics.pipeline()
    }

    /// Id of the stage in its graph, if attached.
    pub fn stage_id(&self) -> Option<StageId> {
        self.stage
    }

    /// Caps negotiated on the input link.
    pub fn input_caps(&self) -> Option<&Caps> {
        self.input_caps.as_ref()
    }

    /// Caps of the named output.
    pub fn output_caps(&self, name: &str) -> Option<&Caps> {
        self.outputs
            .iter()
            .find(|slot| slot.name == name)
            .and_then(|slot| slot.caps.as_ref())
    }

    /// Whether the named output is linked.
    pub fn is_output_linked(&self, name: &str) -> bool {
        self.outputs
            .iter()
            .any(|slot| slot.name == name && slot.sender.is_some())
    }

    /// Per-stage metrics.
    pub fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }

    /// Whether the pipeline is tearing down.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Receive the next item from the input link.
    ///
    /// Returns `None` if the stage has no input or the link was closed.
    pub fn recv(&self) -> Option<Flow> {
        self.input.as_ref()?.recv()
    }

    /// Push a buffer on the first output.
    ///
    /// A buffer pushed to an unlinked output is dropped.
    pub fn push(&mut self, buffer: Buffer) -> Result<()> {
        self.push_slot(0, buffer)
    }

    /// Push a buffer on the named output.
    pub fn push_to(&mut self, name: &str, buffer: Buffer) -> Result<()> {
        match self.outputs.iter().position(|slot| slot.name == name) {
            Some(index) => self.push_slot(index, buffer),
            None => Err(Error::PortNotFound(format!("{}:{name}", self.name))),
        }
    }

    fn push_slot(&mut self, index: usize, buffer: Buffer) -> Result<()> {
        match self.outputs.get(index).and_then(|slot| slot.sender.as_ref()) {
            Some(sender) => {
                let bytes = buffer.len();
                sender.send(buffer)?;
                self.metrics.record_push(bytes);
            }
            None => {
                trace!(stage = %self.name, "dropping buffer on unlinked output");
                self.metrics.record_drop("unlinked");
            }
        }
        Ok(())
    }

    /// Signal end of stream on every linked output.
    pub fn push_eos(&mut self) -> Result<()> {
        for sender in self.outputs.iter().filter_map(|slot| slot.sender.as_ref()) {
            sender.send(Flow::Eos)?;
        }
        Ok(())
    }

    /// Announce a new output port, or re-announce one with new caps.
    ///
    /// The port is resolved against the stage's deferred link intent; when
    /// a link is made, pushes to the port flow over it from then on.
    pub fn announce_output(&mut self, name: &str, caps: Caps) -> Resolution {
        let (Some(resolver), Some(stage)) = (self.resolver.clone(), self.stage) else {
            self.upsert_output(name, None, Some(caps), None);
            return Resolution::NoIntent;
        };

        let resolution = resolver.on_output_port_announced(stage, name, caps.clone());
        // The graph's port holds the caps that were accepted.
        let (port, caps, sender) = resolver
            .output_sender(stage, name)
            .map_or((None, None, None), |(port, caps, sender)| (Some(port), caps, sender));
        self.upsert_output(name, port, caps, sender);
        resolution
    }

    /// Post an error message naming this stage.
    pub fn post_error(&self, error: &Error) {
        if let Some(bus) = &self.bus {
            bus.post_error(self.name.clone(), error.to_string(), Some(format!("{error:?}")));
        }
    }

    /// Post a warning message naming this stage.
    pub fn post_warning(&self, description: impl Into<String>) {
        if let Some(bus) = &self.bus {
            bus.post_warning(self.name.clone(), description, None);
        }
    }

    /// Report that this sink has seen the end of its stream.
    pub fn sink_eos(&self) {
        if let Some(eos) = &self.eos {
            eos.sink_done(&self.name);
        }
    }
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("name", &self.name)
            .field("stage", &self.stage)
            .field("has_input", &self.input.is_some())
            .field(
                "outputs",
                &self.outputs.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_to_unlinked_output_drops() {
        let mut ctx = StageContext::detached("src");
        assert!(ctx.push(Buffer::new(vec![1, 2, 3])).is_ok());
        assert!(ctx.push_eos().is_ok());
    }

    #[test]
    fn test_push_and_recv() {
        let mut ctx = StageContext::detached("filter");
        let (tx, input) = LocalLink::bounded(4);
        ctx.attach_input(input);
        let out = ctx.attach_output("src");

        tx.send(Buffer::new(vec![9]).with_sequence(5)).unwrap();
        let Some(Flow::Buffer(buffer)) = ctx.recv() else {
            panic!("expected a buffer");
        };
        ctx.push(buffer).unwrap();
        ctx.push_eos().unwrap();

        assert!(matches!(out.try_recv(), Some(Flow::Buffer(b)) if b.sequence() == 5));
        assert!(out.try_recv().unwrap().is_eos());
    }

    #[test]
    fn test_push_to_named_output() {
        let mut ctx = StageContext::detached("demux");
        let _a = ctx.attach_output("a");
        let b = ctx.attach_output("b");

        ctx.push_to("b", Buffer::new(vec![1])).unwrap();
        assert!(b.try_recv().is_some());
        assert!(ctx.push_to("c", Buffer::new(vec![1])).is_err());
    }

    #[test]
    fn test_detached_announce_records_caps() {
        let mut ctx = StageContext::detached("decoder");
        let resolution = ctx.announce_output("src_0", Caps::new("video/x-raw"));

        assert_eq!(resolution, Resolution::NoIntent);
        assert_eq!(ctx.output_caps("src_0").unwrap().media_kind(), "video/x-raw");
        assert!(!ctx.is_output_linked("src_0"));
    }
}
