//! Pipeline lifecycle controller.
//!
//! The controller takes a constructed [`PipelineGraph`], drives every stage
//! through READY → PAUSED → PLAYING, spawns one worker thread per stage,
//! then blocks on the bus until the first terminal message (error or end of
//! stream). Teardown stops the workers and walks every stage back to NULL.

use super::events::{EosTracker, EventBus, Message, MessageFilter};
use super::graph::{PipelineGraph, StageId, lock_topology};
use super::{PipelineState, StageState};
use crate::element::{ElementDyn, StageContext, StageKind, StateChange};
use crate::error::{Error, Result};
use crate::observability::{instrument_pipeline, instrument_stage};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How a pipeline finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Every sink saw the end of its stream.
    EndOfStream,
    /// A stage reported a fatal error.
    Error {
        /// Stage that posted the error.
        source: String,
        /// Human-readable description.
        description: String,
        /// Optional debugging detail.
        debug: Option<String>,
    },
}

impl Termination {
    /// Whether the pipeline ended with an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Termination::Error { .. })
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::EndOfStream => write!(f, "End-Of-Stream reached."),
            Termination::Error {
                source,
                description,
                debug,
            } => {
                writeln!(f, "Error received from element {source}: {description}")?;
                write!(
                    f,
                    "Debugging information: {}",
                    debug.as_deref().unwrap_or("none")
                )
            }
        }
    }
}

struct Worker {
    stage: StageId,
    name: String,
    handle: JoinHandle<Box<dyn ElementDyn>>,
}

struct Wired {
    stage: StageId,
    name: String,
    kind: StageKind,
    element: Box<dyn ElementDyn>,
    ctx: StageContext,
}

/// Drives a pipeline graph through its lifecycle.
pub struct Controller {
    graph: PipelineGraph,
    bus: EventBus,
    state: PipelineState,
    shutdown: Arc<AtomicBool>,
    workers: Vec<Worker>,
    outcome: Option<Termination>,
    torn_down: bool,
}

impl Controller {
    /// Take a constructed graph. The pipeline is READY afterwards.
    pub fn new(graph: PipelineGraph) -> Self {
        let bus = EventBus::new(graph.name());
        let mut controller = Self {
            graph,
            bus,
            state: PipelineState::New,
            shutdown: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            outcome: None,
            torn_down: false,
        };
        controller.transition(PipelineState::Ready);
        controller
    }

    /// Current pipeline state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// The graph being driven.
    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    /// The pipeline's message bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The terminal outcome, once decided.
    pub fn outcome(&self) -> Option<&Termination> {
        self.outcome.as_ref()
    }

    fn transition(&mut self, to: PipelineState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        info!(pipeline = %self.graph.name(), %from, %to, "pipeline state changed");
        self.bus.post(Message::StateChanged { from, to });
    }

    /// Start the pipeline.
    ///
    /// Stages are prepared sinks first. If any stage refuses a transition
    /// the pipeline is torn down, ends up STOPPED and the refusal is
    /// returned.
    pub fn set_playing(&mut self) -> Result<()> {
        match self.state {
            PipelineState::Playing => return Ok(()),
            PipelineState::Ready => {}
            other => {
                return Err(Error::StateTransition {
                    stage: self.graph.name().to_string(),
                    from: StageState::Null,
                    to: StageState::Playing,
                    reason: format!("pipeline is {other}"),
                });
            }
        }

        let _span = instrument_pipeline(self.graph.name());
        let order = {
            let mut topo = lock_topology(self.graph.topology());
            if topo.policy().freeze_on_play {
                topo.freeze();
            }
            topo.sinks_first()
        };

        if let Err(err) = self.start(&order) {
            error!(pipeline = %self.graph.name(), error = %err, "unable to set the pipeline to the playing state");
            self.teardown();
            return Err(err);
        }
        Ok(())
    }

    fn start(&mut self, order: &[StageId]) -> Result<()> {
        self.step_all(order, StateChange::ReadyToPaused)?;
        self.transition(PipelineState::Paused);
        self.step_all(order, StateChange::PausedToPlaying)?;

        for wired in self.wire(order) {
            self.spawn(wired)?;
        }
        self.transition(PipelineState::Playing);
        Ok(())
    }

    fn step_all(&self, order: &[StageId], change: StateChange) -> Result<()> {
        let mut topo = lock_topology(self.graph.topology());
        for &stage in order {
            let node = topo.node_mut(stage)?;
            let Some(element) = node.element.as_mut() else {
                continue;
            };
            element
                .change_state(change)
                .map_err(|e| Error::StateTransition {
                    stage: node.name.clone(),
                    from: change.from(),
                    to: change.to(),
                    reason: e.to_string(),
                })?;
            node.state = change.to();
            debug!(stage = %node.name, state = %node.state, "stage changed state");
        }
        Ok(())
    }

    /// Hand every stage its links and services.
    fn wire(&self, order: &[StageId]) -> Vec<Wired> {
        let pipeline = self.graph.name();
        let resolver = self.graph.resolver().with_bus(self.bus.sender());
        let mut topo = lock_topology(self.graph.topology());
        let eos = Arc::new(EosTracker::new(topo.sink_count(), self.bus.sender()));

        let mut wired = Vec::with_capacity(order.len());
        for &stage in order {
            let input = topo.take_input(stage);
            let outputs = topo.output_wiring(stage);
            let Ok(node) = topo.node_mut(stage) else {
                continue;
            };
            let Some(element) = node.element.take() else {
                continue;
            };
            let ctx = StageContext::new(stage, &node.name, pipeline, self.shutdown.clone())
                .with_input(input)
                .with_outputs(outputs)
                .with_resolver(resolver.clone())
                .with_bus(self.bus.sender())
                .with_eos(eos.clone());
            wired.push(Wired {
                stage,
                name: node.name.clone(),
                kind: node.kind,
                element,
                ctx,
            });
        }
        wired
    }

    fn spawn(&mut self, wired: Wired) -> Result<()> {
        let Wired {
            stage,
            name,
            kind,
            mut element,
            mut ctx,
        } = wired;
        let pipeline = self.graph.name().to_string();
        let bus = self.bus.sender();
        let stage_name = name.clone();

        let handle = std::thread::Builder::new()
            .name(format!("stage-{name}"))
            .spawn(move || {
                let _span = instrument_stage(&pipeline, &stage_name, kind.as_str());
                match element.run(&mut ctx) {
                    Ok(()) => debug!("stage finished"),
                    Err(e) if e.is_flushing() || ctx.is_shutting_down() => {
                        debug!(error = %e, "stage stopped by shutdown")
                    }
                    Err(e) => {
                        error!(error = %e, "stage failed");
                        bus.post_error(stage_name, e.to_string(), Some(format!("{e:?}")));
                    }
                }
                element
            })?;

        self.workers.push(Worker {
            stage,
            name,
            handle,
        });
        Ok(())
    }

    /// Block until the first terminal message.
    ///
    /// The outcome is decided once; later calls return it again without
    /// looking at the bus.
    pub fn wait_terminal(&mut self) -> Termination {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        if let Some(outcome) = self.not_playing() {
            return outcome;
        }
        let message = self.bus.pop_filtered(MessageFilter::TERMINAL);
        self.conclude(message)
    }

    /// Like [`wait_terminal`](Self::wait_terminal), giving up after
    /// `timeout`. A timeout decides nothing.
    pub fn timed_wait_terminal(&mut self, timeout: Duration) -> Option<Termination> {
        if let Some(outcome) = &self.outcome {
            return Some(outcome.clone());
        }
        if let Some(outcome) = self.not_playing() {
            return Some(outcome);
        }
        let message = self
            .bus
            .timed_pop_filtered(MessageFilter::TERMINAL, timeout)?;
        Some(self.conclude(Some(message)))
    }

    /// Async form of [`wait_terminal`](Self::wait_terminal).
    pub async fn wait_terminal_async(&mut self) -> Termination {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        if let Some(outcome) = self.not_playing() {
            return outcome;
        }
        let message = self.bus.pop_filtered_async(MessageFilter::TERMINAL).await;
        self.conclude(message)
    }

    fn not_playing(&self) -> Option<Termination> {
        (self.state != PipelineState::Playing).then(|| Termination::Error {
            source: self.graph.name().to_string(),
            description: format!("pipeline is not playing (state {})", self.state),
            debug: None,
        })
    }

    fn conclude(&mut self, message: Option<Message>) -> Termination {
        let outcome = match message {
            Some(Message::Error {
                source,
                description,
                debug,
            }) => {
                let detail = debug.as_deref().unwrap_or("none");
                error!(
                    pipeline = %self.graph.name(),
                    source = %source,
                    detail = %detail,
                    "error received: {description}"
                );
                self.transition(PipelineState::Error);
                Termination::Error {
                    source,
                    description,
                    debug,
                }
            }
            Some(Message::EndOfStream) => {
                info!(pipeline = %self.graph.name(), "end of stream reached");
                self.transition(PipelineState::Eos);
                Termination::EndOfStream
            }
            Some(other) => unreachable!("terminal filter let through {other}"),
            None => {
                self.transition(PipelineState::Error);
                Termination::Error {
                    source: self.graph.name().to_string(),
                    description: "message bus closed".to_string(),
                    debug: None,
                }
            }
        };
        self.outcome = Some(outcome.clone());
        outcome
    }

    /// Stop all workers and release every stage. Idempotent.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        let _span = instrument_pipeline(self.graph.name());

        self.shutdown.store(true, Ordering::Release);
        lock_topology(self.graph.topology()).close_mailboxes();

        let mut returned = Vec::with_capacity(self.workers.len());
        for worker in self.workers.drain(..) {
            match worker.handle.join() {
                Ok(element) => returned.push((worker.stage, element)),
                Err(_) => warn!(stage = %worker.name, "stage worker panicked"),
            }
        }

        let mut topo = lock_topology(self.graph.topology());
        for (stage, element) in returned {
            if let Ok(node) = topo.node_mut(stage) {
                node.element = Some(element);
            }
        }
        for stage in topo.sinks_first() {
            let Ok(node) = topo.node_mut(stage) else {
                continue;
            };
            if let Some(element) = node.element.as_mut() {
                for step in StateChange::downward(node.state, StageState::Null) {
                    if let Err(e) = element.change_state(step) {
                        warn!(stage = %node.name, ?step, error = %e, "stage refused state change during teardown");
                    }
                }
            }
            node.state = StageState::Null;
            node.element = None;
        }
        drop(topo);

        self.transition(PipelineState::Stopped);
        self.bus.close();
        debug!(pipeline = %self.graph.name(), "pipeline torn down");
    }

    /// Start, wait for the terminal outcome, tear down.
    pub fn run(&mut self) -> Result<Termination> {
        self.set_playing()?;
        let outcome = self.wait_terminal();
        self.teardown();
        Ok(outcome)
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("pipeline", &self.graph.name())
            .field("state", &self.state)
            .field("workers", &self.workers.len())
            .field("outcome", &self.outcome)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Sink, SinkAdapter};
    use crate::pipeline::parser::Properties;
    use crate::pipeline::{GraphPolicy, StageFactory};
    use crate::Buffer;

    fn graph(name: &str) -> PipelineGraph {
        PipelineGraph::new(
            name,
            Arc::new(StageFactory::with_builtins()),
            GraphPolicy::default(),
        )
    }

    struct Refuser;
    impl Sink for Refuser {
        fn consume(&mut self, _buffer: Buffer, _ctx: &mut StageContext) -> Result<()> {
            Ok(())
        }

        fn change_state(&mut self, change: StateChange) -> Result<()> {
            match change {
                StateChange::ReadyToPaused => Err(Error::invalid_property("device", "busy")),
                _ => Ok(()),
            }
        }
    }

    #[test]
    fn test_termination_display() {
        let err = Termination::Error {
            source: "udpsrc0".into(),
            description: "socket closed".into(),
            debug: None,
        };
        assert_eq!(
            err.to_string(),
            "Error received from element udpsrc0: socket closed\nDebugging information: none"
        );
        assert_eq!(Termination::EndOfStream.to_string(), "End-Of-Stream reached.");
    }

    #[test]
    fn test_new_controller_is_ready() {
        let controller = Controller::new(graph("ready"));
        assert_eq!(controller.state(), PipelineState::Ready);
        assert!(matches!(
            controller.bus().try_pop(),
            Some(Message::StateChanged {
                from: PipelineState::New,
                to: PipelineState::Ready
            })
        ));
    }

    #[test]
    fn test_eos_run() {
        let graph = graph("eos");
        let src = graph
            .add_stage("videotestsrc", &Properties::new().with("num-buffers", 3).with("is-live", false))
            .unwrap();
        let sink = graph.add_stage("fakesink", &Properties::new()).unwrap();
        graph.link_stages(src, sink).unwrap();

        let mut controller = Controller::new(graph);
        let outcome = controller.run().unwrap();

        assert_eq!(outcome, Termination::EndOfStream);
        assert_eq!(controller.state(), PipelineState::Stopped);
        assert_eq!(controller.outcome(), Some(&Termination::EndOfStream));
        assert!(controller.graph().is_frozen());
    }

    #[test]
    fn test_refused_transition_lands_in_stopped() {
        let graph = graph("refuse");
        let src = graph
            .add_stage("videotestsrc", &Properties::new().with("num-buffers", 1))
            .unwrap();
        let sink = graph
            .add_element("picky", Box::new(SinkAdapter::new(Refuser)))
            .unwrap();
        graph.link_stages(src, sink).unwrap();

        let mut controller = Controller::new(graph);
        let err = controller.set_playing().unwrap_err();

        assert!(matches!(err, Error::StateTransition { ref stage, .. } if stage == "picky"));
        assert_eq!(controller.state(), PipelineState::Stopped);
        let stages = controller.graph().stages();
        assert!(stages.iter().all(|s| s.state == StageState::Null));
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let mut controller = Controller::new(graph("idle"));
        controller.teardown();
        controller.teardown();
        assert_eq!(controller.state(), PipelineState::Stopped);
    }

    #[test]
    fn test_outcome_is_decided_once() {
        let graph = graph("once");
        let src = graph
            .add_stage("videotestsrc", &Properties::new().with("num-buffers", 2).with("is-live", false))
            .unwrap();
        let sink = graph.add_stage("fakesink", &Properties::new()).unwrap();
        graph.link_stages(src, sink).unwrap();

        let mut controller = Controller::new(graph);
        controller.set_playing().unwrap();
        let first = controller.wait_terminal();
        controller
            .bus()
            .sender()
            .post_error("late", "after the fact", None);

        assert_eq!(first, Termination::EndOfStream);
        assert_eq!(controller.wait_terminal(), Termination::EndOfStream);
    }
}
