//! Runtime resolution of deferred links.
//!
//! A stage whose outputs only exist once data has been inspected (a
//! decoder) announces each new output port at runtime. The resolver looks
//! up the stage's [`DeferredLinkIntent`] and, if the port's caps match,
//! links it to the intent's target. The whole decision runs under the
//! topology lock, so concurrent announcements for the same target produce
//! at most one link.

use super::NegotiationError;
use crate::format::{Caps, CapsFilter};
use crate::link::LinkSender;
use crate::observability::record_resolution;
use crate::pipeline::graph::{Topology, lock_topology};
use crate::pipeline::{BusSender, LinkId, StageId};
use crate::element::PortId;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// A pending "link whatever compatible output appears later" request.
#[derive(Debug, Clone)]
pub struct DeferredLinkIntent {
    /// Stage expected to announce outputs at runtime.
    pub source: StageId,
    /// Input port the announced output should feed.
    pub target: PortId,
    /// Which announced caps qualify.
    pub predicate: CapsFilter,
    /// The link created for this intent, once fulfilled.
    pub fulfilled: Option<LinkId>,
    /// Refused attempts, oldest first.
    pub failures: Vec<NegotiationError>,
}

impl DeferredLinkIntent {
    pub(crate) fn new(source: StageId, target: PortId, predicate: CapsFilter) -> Self {
        Self {
            source,
            target,
            predicate,
            fulfilled: None,
            failures: Vec::new(),
        }
    }

    /// Whether a link has been created for this intent.
    pub fn is_fulfilled(&self) -> bool {
        self.fulfilled.is_some()
    }
}

/// Outcome of announcing an output port.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The port was linked to the intent's target.
    Linked {
        /// The new link.
        link: LinkId,
        /// Caps negotiated on it.
        caps: Option<Caps>,
    },
    /// The target already has a link; the port stays unlinked.
    AlreadyLinked,
    /// The port's caps do not satisfy the intent's predicate.
    Mismatch {
        /// Caps the port announced.
        caps: Caps,
    },
    /// The stage has no deferred link intent.
    NoIntent,
    /// Linking was attempted and refused.
    Failed(NegotiationError),
}

impl Resolution {
    /// Whether a link was created.
    pub fn is_linked(&self) -> bool {
        matches!(self, Resolution::Linked { .. })
    }

    fn outcome(&self) -> &'static str {
        match self {
            Resolution::Linked { .. } => "linked",
            Resolution::AlreadyLinked => "already-linked",
            Resolution::Mismatch { .. } => "mismatch",
            Resolution::NoIntent => "no-intent",
            Resolution::Failed(_) => "failed",
        }
    }
}

/// Resolves announced output ports against deferred link intents.
///
/// Cheap to clone; every clone shares the graph's topology.
#[derive(Clone)]
pub struct LinkResolver {
    topology: Arc<Mutex<Topology>>,
    bus: Option<BusSender>,
}

impl LinkResolver {
    pub(crate) fn new(topology: Arc<Mutex<Topology>>) -> Self {
        Self {
            topology,
            bus: None,
        }
    }

    /// Post a warning on `bus` whenever a link attempt is refused.
    pub(crate) fn with_bus(mut self, bus: BusSender) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Handle a new (or re-announced) output port on `stage`.
    ///
    /// Never fails: every outcome, including a refused link, is reported
    /// through the returned [`Resolution`].
    pub fn on_output_port_announced(&self, stage: StageId, name: &str, caps: Caps) -> Resolution {
        let mut topo = lock_topology(&self.topology);
        let pipeline = topo.name().to_string();
        let resolution = Self::resolve(&mut topo, stage, name, caps);
        drop(topo);

        record_resolution(&pipeline, resolution.outcome());
        if let (Resolution::Failed(err), Some(bus)) = (&resolution, &self.bus) {
            bus.post_warning(
                stage.to_string(),
                format!("dynamic link for output '{name}' refused"),
                Some(err.to_string()),
            );
        }
        resolution
    }

    fn resolve(topo: &mut Topology, stage: StageId, name: &str, caps: Caps) -> Resolution {
        let port = match topo.ensure_output_port(stage, name, caps.clone()) {
            Ok(port) => port,
            Err(err) => return Resolution::Failed(err),
        };
        let stage_name = topo
            .node(stage)
            .map(|node| node.name.clone())
            .unwrap_or_else(|_| stage.to_string());
        info!(
            pipeline = %topo.name(),
            stage = %stage_name,
            port = %name,
            caps = %caps,
            "received new output port"
        );

        let Some(intent) = topo.intent_mut(stage) else {
            debug!(stage = %stage_name, "no deferred link registered");
            return Resolution::NoIntent;
        };
        let target = intent.target;
        let predicate = intent.predicate.clone();

        let target_linked = intent.fulfilled.is_some()
            || topo.port(target).is_some_and(|port| port.is_linked());
        if target_linked {
            info!(stage = %stage_name, port = %name, "target already linked, ignoring");
            return Resolution::AlreadyLinked;
        }

        if !predicate.accepts(&caps) {
            info!(
                stage = %stage_name,
                port = %name,
                caps = %caps,
                "caps do not match the deferred link, ignoring"
            );
            return Resolution::Mismatch { caps };
        }

        match topo.link(port, target, true) {
            Ok(link) => {
                let link_caps = topo.link_snapshot(link).and_then(|l| l.caps);
                if let Some(intent) = topo.intent_mut(stage) {
                    intent.fulfilled = Some(link);
                }
                info!(stage = %stage_name, port = %name, caps = %caps, "link succeeded");
                Resolution::Linked {
                    link,
                    caps: link_caps,
                }
            }
            Err(refusal) => {
                let err = NegotiationError::from(refusal);
                warn!(
                    stage = %stage_name,
                    port = %name,
                    caps = %caps,
                    error = %err,
                    "link failed"
                );
                if let Some(intent) = topo.intent_mut(stage) {
                    intent.failures.push(err.clone());
                }
                Resolution::Failed(err)
            }
        }
    }

    /// Port id of `stage`'s output `name` and the sender feeding its link,
    /// if it is linked.
    pub(crate) fn output_sender(
        &self,
        stage: StageId,
        name: &str,
    ) -> Option<(PortId, Option<Caps>, Option<LinkSender>)> {
        let topo = lock_topology(&self.topology);
        let port = topo.find_port(stage, name)?;
        let caps = topo.port(port).and_then(|p| p.caps().cloned());
        Some((port, caps, topo.output_sender(port)))
    }
}

impl std::fmt::Debug for LinkResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkResolver")
            .field("posts_warnings", &self.bus.is_some())
            .finish()
    }
}
