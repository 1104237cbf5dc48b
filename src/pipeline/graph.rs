//! Pipeline graph structure using daggy.
//!
//! The graph owns every stage, port and link, plus the deferred link
//! intents registered for stages whose outputs only appear at runtime.
//! All of it lives in one [`Topology`] behind a single mutex: construction,
//! runtime port announcements and teardown all take the same lock, so
//! topology changes are serialized.

use crate::element::{ElementDyn, Port, PortDirection, PortId, PortTemplate, StageKind, StateChange};
use crate::error::{Error, Result};
use crate::format::{Caps, CapsFilter};
use crate::link::{LinkReceiver, LinkSender, LocalLink};
use crate::negotiation::{DeferredLinkIntent, LinkResolver, NegotiationError, Resolution};
use crate::observability::record_link_created;
use crate::pipeline::StageState;
use crate::pipeline::factory::StageFactory;
use crate::pipeline::parser::Properties;
use daggy::petgraph::algo::{has_path_connecting, toposort};
use daggy::{Dag, EdgeIndex, NodeIndex};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Unique identifier for a stage in a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(pub(crate) NodeIndex);

impl StageId {
    /// Get the underlying index.
    pub fn index(&self) -> usize {
        self.0.index()
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage#{}", self.0.index())
    }
}

/// Unique identifier for a link in a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub(crate) EdgeIndex);

impl LinkId {
    /// Get the underlying index.
    pub fn index(&self) -> usize {
        self.0.index()
    }
}

/// Structural policy of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphPolicy {
    /// Refuse new stages, static links and deferred intents once PLAYING
    /// is requested. Runtime dynamic links are always allowed.
    pub freeze_on_play: bool,
    /// Capacity of each input port's channel.
    pub channel_capacity: usize,
}

impl Default for GraphPolicy {
    fn default() -> Self {
        Self {
            freeze_on_play: true,
            channel_capacity: 16,
        }
    }
}

/// Snapshot of a stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageInfo {
    /// Stage id.
    pub id: StageId,
    /// Unique name within the graph.
    pub name: String,
    /// Stage type the factory created it from.
    pub factory: String,
    /// Role tag.
    pub kind: StageKind,
    /// Lifecycle state.
    pub state: StageState,
    /// Ports in creation order.
    pub ports: Vec<PortId>,
}

/// Snapshot of a link.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    /// Link id.
    pub id: LinkId,
    /// Upstream output port.
    pub output: PortId,
    /// Downstream input port.
    pub input: PortId,
    /// Negotiated caps, if either side declared any.
    pub caps: Option<Caps>,
    /// Whether the link was created at runtime by the resolver.
    pub dynamic: bool,
}

pub(crate) struct StageNode {
    pub(crate) name: String,
    factory: String,
    pub(crate) kind: StageKind,
    templates: Vec<PortTemplate>,
    pub(crate) ports: SmallVec<[PortId; 4]>,
    pub(crate) state: StageState,
    pub(crate) element: Option<Box<dyn ElementDyn>>,
}

pub(crate) struct LinkEdge {
    output: PortId,
    input: PortId,
    caps: Option<Caps>,
    dynamic: bool,
    sender: LinkSender,
}

struct Mailbox {
    sender: LinkSender,
    receiver: Option<LinkReceiver>,
}

struct PortEntry {
    port: Port,
    mailbox: Option<Mailbox>,
}

/// Wiring of one output port handed to a stage worker.
pub(crate) struct OutputWiring {
    pub(crate) port: PortId,
    pub(crate) name: String,
    pub(crate) caps: Option<Caps>,
    pub(crate) sender: Option<LinkSender>,
}

/// Why a link attempt was refused.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LinkRefusal {
    UnknownPort(PortId),
    WrongDirection {
        port: String,
        expected: &'static str,
    },
    AlreadyLinked {
        port: String,
    },
    Incompatible {
        upstream: String,
        downstream: String,
        upstream_caps: Caps,
        downstream_caps: Caps,
    },
    WouldCycle {
        upstream: String,
        downstream: String,
    },
}

impl LinkRefusal {
    fn into_error(self, upstream: String, downstream: String) -> Error {
        Error::Link {
            upstream,
            downstream,
            reason: self.to_string(),
        }
    }
}

impl fmt::Display for LinkRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkRefusal::UnknownPort(id) => write!(f, "no such port {id}"),
            LinkRefusal::WrongDirection { port, expected } => {
                write!(f, "{port} is not an {expected} port")
            }
            LinkRefusal::AlreadyLinked { port } => write!(f, "{port} is already linked"),
            LinkRefusal::Incompatible {
                upstream_caps,
                downstream_caps,
                ..
            } => write!(f, "incompatible caps: {upstream_caps} vs {downstream_caps}"),
            LinkRefusal::WouldCycle { .. } => write!(f, "linking would create a cycle"),
        }
    }
}

impl From<LinkRefusal> for NegotiationError {
    fn from(refusal: LinkRefusal) -> Self {
        match refusal {
            LinkRefusal::UnknownPort(id) => NegotiationError::InvalidPort {
                port: id.to_string(),
                reason: "no such port".to_string(),
            },
            LinkRefusal::WrongDirection { port, expected } => NegotiationError::InvalidPort {
                port,
                reason: format!("not an {expected} port"),
            },
            LinkRefusal::AlreadyLinked { port } => NegotiationError::AlreadyLinked { port },
            LinkRefusal::Incompatible {
                upstream,
                downstream,
                upstream_caps,
                downstream_caps,
            } => NegotiationError::no_common_format(
                upstream,
                downstream,
                &upstream_caps.to_string(),
                &downstream_caps.to_string(),
            ),
            LinkRefusal::WouldCycle {
                upstream,
                downstream,
            } => NegotiationError::CycleDetected {
                upstream,
                downstream,
            },
        }
    }
}

/// The mutable state of a graph, guarded by one mutex.
pub(crate) struct Topology {
    name: String,
    policy: GraphPolicy,
    dag: Dag<StageNode, LinkEdge>,
    ports: Vec<PortEntry>,
    stages_by_name: HashMap<String, StageId>,
    intents: HashMap<StageId, DeferredLinkIntent>,
    name_counters: HashMap<String, usize>,
    frozen: bool,
}

impl Topology {
    fn new(name: &str, policy: GraphPolicy) -> Self {
        Self {
            name: name.to_string(),
            policy,
            dag: Dag::new(),
            ports: Vec::new(),
            stages_by_name: HashMap::new(),
            intents: HashMap::new(),
            name_counters: HashMap::new(),
            frozen: false,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn node(&self, id: StageId) -> Result<&StageNode> {
        self.dag
            .node_weight(id.0)
            .ok_or_else(|| Error::StageNotFound(id.to_string()))
    }

    pub(crate) fn node_mut(&mut self, id: StageId) -> Result<&mut StageNode> {
        self.dag
            .node_weight_mut(id.0)
            .ok_or_else(|| Error::StageNotFound(id.to_string()))
    }

    pub(crate) fn port(&self, id: PortId) -> Option<&Port> {
        self.ports.get(id.0).map(|entry| &entry.port)
    }

    /// `stage:port` for logs and errors.
    pub(crate) fn describe_port(&self, id: PortId) -> String {
        match self.port(id) {
            Some(port) => {
                let stage = self
                    .dag
                    .node_weight(port.owner().0)
                    .map_or("?", |node| node.name.as_str());
                format!("{stage}:{}", port.name())
            }
            None => id.to_string(),
        }
    }

    pub(crate) fn find_port(&self, stage: StageId, name: &str) -> Option<PortId> {
        let node = self.dag.node_weight(stage.0)?;
        node.ports
            .iter()
            .copied()
            .find(|p| self.ports[p.0].port.name() == name)
    }

    fn unique_name(&mut self, factory: &str) -> String {
        loop {
            let counter = self.name_counters.entry(factory.to_string()).or_insert(0);
            let name = format!("{factory}{counter}");
            *counter += 1;
            if !self.stages_by_name.contains_key(&name) {
                return name;
            }
        }
    }

    fn check_name_free(&self, factory: &str, name: &str) -> Result<()> {
        if self.stages_by_name.contains_key(name) {
            return Err(Error::Creation {
                factory: factory.to_string(),
                reason: format!("stage name '{name}' is already in use"),
            });
        }
        Ok(())
    }

    fn insert_stage(
        &mut self,
        name: Option<&str>,
        factory: &str,
        element: Box<dyn ElementDyn>,
    ) -> Result<StageId> {
        if self.frozen {
            return Err(Error::Frozen(format!("cannot add stage of type '{factory}'")));
        }
        let name = match name {
            Some(name) => {
                self.check_name_free(factory, name)?;
                name.to_string()
            }
            None => self.unique_name(factory),
        };

        let kind = element.kind();
        let templates = element.port_templates();
        let id = StageId(self.dag.add_node(StageNode {
            name: name.clone(),
            factory: factory.to_string(),
            kind,
            templates: templates.clone(),
            ports: SmallVec::new(),
            state: StageState::Ready,
            element: Some(element),
        }));

        for template in templates.iter().filter(|t| t.is_always()) {
            self.create_port(id, &template.name, template.direction, template.caps.clone());
        }
        self.stages_by_name.insert(name.clone(), id);

        debug!(pipeline = %self.name, stage = %name, factory, kind = %kind, "stage added");
        Ok(id)
    }

    fn create_port(
        &mut self,
        stage: StageId,
        name: &str,
        direction: PortDirection,
        caps: Option<Caps>,
    ) -> PortId {
        let id = PortId(self.ports.len());
        let mailbox = (direction == PortDirection::Input).then(|| {
            let (sender, receiver) = LocalLink::bounded(self.policy.channel_capacity);
            Mailbox {
                sender,
                receiver: Some(receiver),
            }
        });
        self.ports.push(PortEntry {
            port: Port::new(id, stage, name, direction, caps),
            mailbox,
        });
        if let Some(node) = self.dag.node_weight_mut(stage.0) {
            node.ports.push(id);
        }
        id
    }

    /// Link an output port to an input port.
    ///
    /// Shared by static linking and runtime resolution; the caller decides
    /// how a refusal is reported.
    pub(crate) fn link(
        &mut self,
        output: PortId,
        input: PortId,
        dynamic: bool,
    ) -> std::result::Result<LinkId, LinkRefusal> {
        let out = self
            .port(output)
            .cloned()
            .ok_or(LinkRefusal::UnknownPort(output))?;
        let inp = self
            .port(input)
            .cloned()
            .ok_or(LinkRefusal::UnknownPort(input))?;
        let upstream = self.describe_port(output);
        let downstream = self.describe_port(input);

        if !out.is_output() {
            return Err(LinkRefusal::WrongDirection {
                port: upstream,
                expected: "output",
            });
        }
        if !inp.is_input() {
            return Err(LinkRefusal::WrongDirection {
                port: downstream,
                expected: "input",
            });
        }
        if out.is_linked() {
            return Err(LinkRefusal::AlreadyLinked { port: upstream });
        }
        if inp.is_linked() {
            return Err(LinkRefusal::AlreadyLinked { port: downstream });
        }

        let caps = match (out.caps(), inp.caps()) {
            (Some(a), Some(b)) => match a.intersect(b) {
                Some(caps) => Some(caps),
                None => {
                    return Err(LinkRefusal::Incompatible {
                        upstream,
                        downstream,
                        upstream_caps: a.clone(),
                        downstream_caps: b.clone(),
                    });
                }
            },
            (Some(c), None) | (None, Some(c)) => Some(c.clone()),
            (None, None) => None,
        };

        let sender = self.ports[input.0]
            .mailbox
            .as_ref()
            .map(|mailbox| mailbox.sender.clone())
            .ok_or_else(|| LinkRefusal::WrongDirection {
                port: downstream.clone(),
                expected: "input",
            })?;

        let edge = LinkEdge {
            output,
            input,
            caps,
            dynamic,
            sender,
        };
        let index = match self.dag.add_edge(out.owner().0, inp.owner().0, edge) {
            Ok(index) => index,
            Err(_) => {
                return Err(LinkRefusal::WouldCycle {
                    upstream,
                    downstream,
                });
            }
        };

        let link = LinkId(index);
        self.ports[output.0].port.set_link(link);
        self.ports[input.0].port.set_link(link);
        record_link_created(&self.name, dynamic);

        info!(
            pipeline = %self.name,
            upstream = %upstream,
            downstream = %downstream,
            dynamic,
            "linked"
        );
        Ok(link)
    }

    /// Find or create the named output port of `stage` with fresh caps.
    pub(crate) fn ensure_output_port(
        &mut self,
        stage: StageId,
        name: &str,
        caps: Caps,
    ) -> std::result::Result<PortId, NegotiationError> {
        if self.dag.node_weight(stage.0).is_none() {
            return Err(NegotiationError::StageNotFound {
                name: stage.to_string(),
            });
        }
        match self.find_port(stage, name) {
            Some(existing) => {
                let port = &self.ports[existing.0].port;
                if !port.is_output() {
                    return Err(NegotiationError::InvalidPort {
                        port: self.describe_port(existing),
                        reason: "not an output port".to_string(),
                    });
                }
                // A linked port keeps caps its link can carry.
                let link_caps = port
                    .link()
                    .and_then(|link| self.link_snapshot(link))
                    .and_then(|link| link.caps);
                if let Some(link_caps) = link_caps.filter(|c| !caps.is_compatible(c)) {
                    return Err(NegotiationError::InvalidPort {
                        port: self.describe_port(existing),
                        reason: format!("announced {caps} but its link carries {link_caps}"),
                    });
                }
                self.ports[existing.0].port.set_caps(caps);
                Ok(existing)
            }
            None => Ok(self.create_port(stage, name, PortDirection::Output, Some(caps))),
        }
    }

    pub(crate) fn intent_mut(&mut self, stage: StageId) -> Option<&mut DeferredLinkIntent> {
        self.intents.get_mut(&stage)
    }

    pub(crate) fn link_snapshot(&self, id: LinkId) -> Option<Link> {
        self.dag.edge_weight(id.0).map(|edge| Link {
            id,
            output: edge.output,
            input: edge.input,
            caps: edge.caps.clone(),
            dynamic: edge.dynamic,
        })
    }

    fn stage_snapshot(&self, id: StageId) -> Option<StageInfo> {
        self.dag.node_weight(id.0).map(|node| StageInfo {
            id,
            name: node.name.clone(),
            factory: node.factory.clone(),
            kind: node.kind,
            state: node.state,
            ports: node.ports.to_vec(),
        })
    }

    /// Sender feeding the link attached to an output port, if linked.
    pub(crate) fn output_sender(&self, port: PortId) -> Option<LinkSender> {
        let link = self.port(port)?.link()?;
        self.dag.edge_weight(link.0).map(|edge| edge.sender.clone())
    }

    // ------------------------------------------------------------------
    // Controller support
    // ------------------------------------------------------------------

    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
    }

    pub(crate) fn policy(&self) -> GraphPolicy {
        self.policy
    }

    /// Stage ids ordered downstream first.
    pub(crate) fn sinks_first(&self) -> Vec<StageId> {
        match toposort(self.dag.graph(), None) {
            Ok(order) => order.into_iter().rev().map(StageId).collect(),
            Err(_) => self.dag.graph().node_indices().rev().map(StageId).collect(),
        }
    }

    pub(crate) fn sink_count(&self) -> usize {
        self.dag
            .graph()
            .node_weights()
            .filter(|node| node.kind == StageKind::Sink)
            .count()
    }

    /// Take the receiving end of the stage's first input port, along with
    /// the caps negotiated on its link (or declared on the port).
    pub(crate) fn take_input(&mut self, stage: StageId) -> Option<(LinkReceiver, Option<Caps>)> {
        let port = self
            .node(stage)
            .ok()?
            .ports
            .iter()
            .copied()
            .find(|p| self.ports[p.0].port.is_input())?;

        let caps = match self.ports[port.0].port.link() {
            Some(link) => self
                .dag
                .edge_weight(link.0)
                .and_then(|edge| edge.caps.clone()),
            None => self.ports[port.0].port.caps().cloned(),
        };
        let receiver = self.ports[port.0].mailbox.as_mut()?.receiver.take()?;
        Some((receiver, caps))
    }

    pub(crate) fn output_wiring(&self, stage: StageId) -> Vec<OutputWiring> {
        let Ok(node) = self.node(stage) else {
            return Vec::new();
        };
        node.ports
            .iter()
            .copied()
            .filter_map(|id| {
                let port = &self.ports[id.0].port;
                port.is_output().then(|| OutputWiring {
                    port: id,
                    name: port.name().to_string(),
                    caps: port.caps().cloned(),
                    sender: self.output_sender(id),
                })
            })
            .collect()
    }

    /// Close every input channel, waking workers blocked on them.
    pub(crate) fn close_mailboxes(&self) {
        for mailbox in self.ports.iter().filter_map(|entry| entry.mailbox.as_ref()) {
            mailbox.sender.close();
        }
    }
}

/// Lock a topology, recovering from poisoning.
///
/// A worker that panicked while holding the lock leaves the topology in a
/// consistent state: every mutation is completed before any fallible step
/// can unwind.
pub(crate) fn lock_topology(topology: &Mutex<Topology>) -> MutexGuard<'_, Topology> {
    topology.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A pipeline graph under construction.
///
/// Cloning yields another handle to the same graph.
#[derive(Clone)]
pub struct PipelineGraph {
    name: String,
    topology: Arc<Mutex<Topology>>,
    factory: Arc<StageFactory>,
}

impl PipelineGraph {
    /// Create an empty graph whose stages come from `factory`.
    pub fn new(name: impl Into<String>, factory: Arc<StageFactory>, policy: GraphPolicy) -> Self {
        let name = name.into();
        Self {
            topology: Arc::new(Mutex::new(Topology::new(&name, policy))),
            name,
            factory,
        }
    }

    /// Graph name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Structural policy.
    pub fn policy(&self) -> GraphPolicy {
        self.lock().policy()
    }

    fn lock(&self) -> MutexGuard<'_, Topology> {
        lock_topology(&self.topology)
    }

    pub(crate) fn topology(&self) -> &Arc<Mutex<Topology>> {
        &self.topology
    }

    /// Add a stage with an auto-generated name (`<type><n>`).
    ///
    /// On failure the graph is unchanged.
    pub fn add_stage(&self, factory: &str, props: &Properties) -> Result<StageId> {
        self.add(factory, None, props)
    }

    /// Add a stage with an explicit, unique name.
    pub fn add_named_stage(&self, factory: &str, name: &str, props: &Properties) -> Result<StageId> {
        self.add(factory, Some(name), props)
    }

    fn add(&self, factory: &str, name: Option<&str>, props: &Properties) -> Result<StageId> {
        {
            let topo = self.lock();
            if topo.frozen {
                return Err(Error::Frozen(format!("cannot add stage of type '{factory}'")));
            }
            if let Some(name) = name {
                topo.check_name_free(factory, name)?;
            }
        }

        let element = self.factory.create(factory, props)?;
        self.insert(factory, name, element)
    }

    /// Add a behaviour that did not come from the factory.
    pub fn add_element(&self, name: &str, element: Box<dyn ElementDyn>) -> Result<StageId> {
        self.insert("custom", Some(name), element)
    }

    fn insert(
        &self,
        factory: &str,
        name: Option<&str>,
        mut element: Box<dyn ElementDyn>,
    ) -> Result<StageId> {
        element
            .change_state(StateChange::NullToReady)
            .map_err(|e| Error::Creation {
                factory: factory.to_string(),
                reason: e.to_string(),
            })?;
        self.lock().insert_stage(name, factory, element)
    }

    fn check_open(&self, what: &str) -> Result<()> {
        if self.lock().frozen {
            return Err(Error::Frozen(what.to_string()));
        }
        Ok(())
    }

    /// Link an output port to an input port.
    pub fn link_static(&self, output: PortId, input: PortId) -> Result<LinkId> {
        let mut topo = self.lock();
        if topo.frozen {
            return Err(Error::Frozen("cannot add static links".to_string()));
        }
        let upstream = topo.describe_port(output);
        let downstream = topo.describe_port(input);
        topo.link(output, input, false)
            .map_err(|refusal| refusal.into_error(upstream, downstream))
    }

    /// Link two stages through named ports.
    pub fn link_ports(
        &self,
        upstream: StageId,
        output: &str,
        downstream: StageId,
        input: &str,
    ) -> Result<LinkId> {
        let (out, inp) = {
            let topo = self.lock();
            let out = topo.find_port(upstream, output).ok_or_else(|| {
                Error::PortNotFound(format!("{}:{output}", self.stage_label(&topo, upstream)))
            })?;
            let inp = topo.find_port(downstream, input).ok_or_else(|| {
                Error::PortNotFound(format!("{}:{input}", self.stage_label(&topo, downstream)))
            })?;
            (out, inp)
        };
        self.link_static(out, inp)
    }

    fn stage_label(&self, topo: &Topology, id: StageId) -> String {
        topo.node(id)
            .map(|node| node.name.clone())
            .unwrap_or_else(|_| id.to_string())
    }

    /// Link the first free output port of `upstream` to the first free
    /// input port of `downstream`.
    pub fn link_stages(&self, upstream: StageId, downstream: StageId) -> Result<LinkId> {
        let (out, inp) = {
            let topo = self.lock();
            let free = |stage: StageId, direction: PortDirection| -> Result<Option<PortId>> {
                Ok(topo.node(stage)?.ports.iter().copied().find(|p| {
                    topo.port(*p)
                        .is_some_and(|port| port.direction() == direction && !port.is_linked())
                }))
            };
            let out = free(upstream, PortDirection::Output)?;
            let inp = free(downstream, PortDirection::Input)?;
            match (out, inp) {
                (Some(out), Some(inp)) => (out, inp),
                (out, _) => {
                    let reason = if out.is_none() {
                        "no free output port"
                    } else {
                        "no free input port"
                    };
                    return Err(Error::Link {
                        upstream: self.stage_label(&topo, upstream),
                        downstream: self.stage_label(&topo, downstream),
                        reason: reason.to_string(),
                    });
                }
            }
        };
        self.link_static(out, inp)
    }

    /// Link a chain of stages pairwise.
    pub fn link_many(&self, stages: &[StageId]) -> Result<Vec<LinkId>> {
        stages
            .windows(2)
            .map(|pair| self.link_stages(pair[0], pair[1]))
            .collect()
    }

    /// Record that whatever compatible output `source` announces later
    /// should be linked to `target`.
    ///
    /// A stage has at most one intent; `target` must be an input port.
    pub fn register_deferred_link(
        &self,
        source: StageId,
        target: PortId,
        predicate: CapsFilter,
    ) -> Result<()> {
        self.check_open("cannot register deferred links")?;
        let mut topo = self.lock();
        let source_name = topo.node(source)?.name.clone();
        let target_port = topo
            .port(target)
            .ok_or_else(|| Error::PortNotFound(target.to_string()))?;
        let target_name = topo.describe_port(target);

        if !target_port.is_input() {
            return Err(Error::Link {
                upstream: source_name,
                downstream: target_name,
                reason: "deferred link target must be an input port".to_string(),
            });
        }
        if topo.intents.contains_key(&source) {
            return Err(Error::Link {
                upstream: source_name,
                downstream: target_name,
                reason: "stage already has a deferred link".to_string(),
            });
        }

        debug!(
            pipeline = %self.name,
            source = %source_name,
            target = %target_name,
            predicate = ?predicate,
            "deferred link registered"
        );
        topo.intents
            .insert(source, DeferredLinkIntent::new(source, target, predicate));
        Ok(())
    }

    /// A resolver for this graph that logs but posts nothing.
    pub fn resolver(&self) -> LinkResolver {
        LinkResolver::new(self.topology.clone())
    }

    /// Announce a new (or re-announced) output port on `stage` and resolve
    /// it against the stage's deferred link intent.
    pub fn announce_output_port(&self, stage: StageId, name: &str, caps: Caps) -> Resolution {
        self.resolver().on_output_port_announced(stage, name, caps)
    }

    /// Freeze the graph against structural changes.
    pub fn freeze(&self) {
        self.lock().freeze();
    }

    /// Whether the graph is frozen.
    pub fn is_frozen(&self) -> bool {
        self.lock().frozen
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Snapshot of a stage.
    pub fn stage(&self, id: StageId) -> Option<StageInfo> {
        self.lock().stage_snapshot(id)
    }

    /// Find a stage by name.
    pub fn stage_by_name(&self, name: &str) -> Option<StageId> {
        self.lock().stages_by_name.get(name).copied()
    }

    /// Snapshots of all stages in insertion order.
    pub fn stages(&self) -> Vec<StageInfo> {
        let topo = self.lock();
        topo.dag
            .graph()
            .node_indices()
            .filter_map(|idx| topo.stage_snapshot(StageId(idx)))
            .collect()
    }

    /// Snapshot of a port.
    pub fn port(&self, id: PortId) -> Option<Port> {
        self.lock().port(id).cloned()
    }

    /// Find a port of `stage` by name.
    pub fn port_id(&self, stage: StageId, name: &str) -> Option<PortId> {
        self.lock().find_port(stage, name)
    }

    /// Snapshots of a stage's ports.
    pub fn ports(&self, stage: StageId) -> Vec<Port> {
        let topo = self.lock();
        topo.node(stage)
            .map(|node| {
                node.ports
                    .iter()
                    .filter_map(|p| topo.port(*p).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Port templates declared by a stage.
    pub fn templates(&self, stage: StageId) -> Vec<PortTemplate> {
        self.lock()
            .node(stage)
            .map(|node| node.templates.clone())
            .unwrap_or_default()
    }

    /// Snapshot of a link.
    pub fn link(&self, id: LinkId) -> Option<Link> {
        self.lock().link_snapshot(id)
    }

    /// Snapshots of all links.
    pub fn links(&self) -> Vec<Link> {
        let topo = self.lock();
        topo.dag
            .graph()
            .edge_indices()
            .filter_map(|idx| topo.link_snapshot(LinkId(idx)))
            .collect()
    }

    /// Snapshot of the deferred link intent of `stage`.
    pub fn intent(&self, stage: StageId) -> Option<DeferredLinkIntent> {
        self.lock().intents.get(&stage).cloned()
    }

    /// Whether data can flow from `from` to `to` over existing links.
    pub fn is_reachable(&self, from: StageId, to: StageId) -> bool {
        let topo = self.lock();
        has_path_connecting(topo.dag.graph(), from.0, to.0, None)
    }

    /// Number of stages.
    pub fn stage_count(&self) -> usize {
        self.lock().dag.node_count()
    }

    /// Number of links.
    pub fn link_count(&self) -> usize {
        self.lock().dag.edge_count()
    }

    /// Number of ports.
    pub fn port_count(&self) -> usize {
        self.lock().ports.len()
    }
}

impl fmt::Debug for PipelineGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topo = self.lock();
        f.debug_struct("PipelineGraph")
            .field("name", &self.name)
            .field("stages", &topo.dag.node_count())
            .field("links", &topo.dag.edge_count())
            .field("frozen", &topo.frozen)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;
    use crate::element::{
        Sink, SinkAdapter, Source, SourceAdapter, StageContext, Transform, TransformAdapter,
        Output,
    };

    struct TestSource;
    impl Source for TestSource {
        fn produce(&mut self, _ctx: &mut StageContext) -> Result<Option<Buffer>> {
            Ok(None)
        }
    }

    struct TestFilter;
    impl Transform for TestFilter {
        fn transform(&mut self, buffer: Buffer, _ctx: &mut StageContext) -> Result<Output> {
            Ok(buffer.into())
        }
    }

    struct TestSink;
    impl Sink for TestSink {
        fn consume(&mut self, _buffer: Buffer, _ctx: &mut StageContext) -> Result<()> {
            Ok(())
        }
    }

    fn graph() -> PipelineGraph {
        PipelineGraph::new(
            "test",
            Arc::new(StageFactory::with_builtins()),
            GraphPolicy::default(),
        )
    }

    fn chain(graph: &PipelineGraph) -> (StageId, StageId, StageId) {
        let src = graph
            .add_element("src", Box::new(SourceAdapter::new(TestSource)))
            .unwrap();
        let filter = graph
            .add_element("filter", Box::new(TransformAdapter::new(TestFilter)))
            .unwrap();
        let sink = graph
            .add_element("sink", Box::new(SinkAdapter::new(TestSink)))
            .unwrap();
        (src, filter, sink)
    }

    #[test]
    fn test_add_stages_creates_always_ports() {
        let graph = graph();
        let (src, filter, sink) = chain(&graph);

        assert_eq!(graph.stage_count(), 3);
        assert_eq!(graph.port_count(), 4);
        assert_eq!(graph.stage_by_name("filter"), Some(filter));
        assert!(graph.port_id(src, "src").is_some());
        assert!(graph.port_id(sink, "sink").is_some());
        assert_eq!(graph.stage(sink).unwrap().state, StageState::Ready);
    }

    #[test]
    fn test_auto_naming() {
        let graph = graph();
        let a = graph.add_stage("fakesink", &Properties::new()).unwrap();
        let b = graph.add_stage("fakesink", &Properties::new()).unwrap();

        assert_eq!(graph.stage(a).unwrap().name, "fakesink0");
        assert_eq!(graph.stage(b).unwrap().name, "fakesink1");
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let graph = graph();
        graph
            .add_named_stage("fakesink", "out", &Properties::new())
            .unwrap();
        let err = graph
            .add_named_stage("fakesink", "out", &Properties::new())
            .unwrap_err();

        assert!(matches!(err, Error::Creation { .. }));
        assert_eq!(graph.stage_count(), 1);
    }

    #[test]
    fn test_link_many_and_reachability() {
        let graph = graph();
        let (src, filter, sink) = chain(&graph);

        let links = graph.link_many(&[src, filter, sink]).unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(graph.link_count(), 2);
        assert!(graph.is_reachable(src, sink));
        assert!(!graph.is_reachable(sink, src));

        let link = graph.link(links[0]).unwrap();
        assert!(!link.dynamic);
        assert!(graph.port(link.output).unwrap().is_linked());
    }

    #[test]
    fn test_port_links_at_most_once() {
        let graph = graph();
        let (src, filter, sink) = chain(&graph);
        graph.link_stages(src, filter).unwrap();

        let out = graph.port_id(src, "src").unwrap();
        let inp = graph.port_id(sink, "sink").unwrap();
        let err = graph.link_static(out, inp).unwrap_err();
        assert!(matches!(err, Error::Link { .. }));
        assert!(err.to_string().contains("already linked"));
    }

    #[test]
    fn test_wrong_direction_rejected() {
        let graph = graph();
        let (src, _filter, sink) = chain(&graph);
        let out = graph.port_id(src, "src").unwrap();
        let inp = graph.port_id(sink, "sink").unwrap();

        assert!(graph.link_static(inp, out).is_err());
        assert_eq!(graph.link_count(), 0);
    }

    #[test]
    fn test_cycle_detection() {
        let graph = graph();
        let a = graph
            .add_element("a", Box::new(TransformAdapter::new(TestFilter)))
            .unwrap();
        let b = graph
            .add_element("b", Box::new(TransformAdapter::new(TestFilter)))
            .unwrap();

        graph.link_stages(a, b).unwrap();
        let err = graph.link_stages(b, a).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_incompatible_caps_rejected() {
        let graph = graph();
        let src = graph
            .add_stage("videotestsrc", &Properties::new())
            .unwrap();
        let depay = graph
            .add_stage("rtph264depay", &Properties::new())
            .unwrap();

        let err = graph.link_stages(src, depay).unwrap_err();
        assert!(err.to_string().contains("incompatible caps"));
    }

    #[test]
    fn test_deferred_link_rules() {
        let graph = graph();
        let decoder = graph.add_stage("decodebin", &Properties::new()).unwrap();
        let (src, _filter, sink) = chain(&graph);
        let sink_in = graph.port_id(sink, "sink").unwrap();
        let src_out = graph.port_id(src, "src").unwrap();

        assert!(graph
            .register_deferred_link(decoder, src_out, CapsFilter::Any)
            .is_err());
        graph
            .register_deferred_link(decoder, sink_in, CapsFilter::kind_prefix("video/x-raw"))
            .unwrap();
        assert!(graph
            .register_deferred_link(decoder, sink_in, CapsFilter::Any)
            .is_err());

        let intent = graph.intent(decoder).unwrap();
        assert_eq!(intent.target, sink_in);
        assert!(intent.fulfilled.is_none());
    }

    #[test]
    fn test_frozen_graph_refuses_changes() {
        let graph = graph();
        let (src, filter, _sink) = chain(&graph);
        graph.freeze();

        assert!(matches!(
            graph.add_stage("fakesink", &Properties::new()),
            Err(Error::Frozen(_))
        ));
        assert!(matches!(graph.link_stages(src, filter), Err(Error::Frozen(_))));
    }

    #[test]
    fn test_sinks_first_order() {
        let graph = graph();
        let (src, filter, sink) = chain(&graph);
        graph.link_many(&[src, filter, sink]).unwrap();

        let order = lock_topology(graph.topology()).sinks_first();
        assert_eq!(order, vec![sink, filter, src]);
    }
}
