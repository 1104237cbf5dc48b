//! Ports: the typed connection points of stages.
//!
//! Stage behaviours declare [`PortTemplate`]s. Templates with
//! [`PortPresence::Always`] become ports when the stage is added to a graph;
//! [`PortPresence::Sometimes`] templates describe ports a stage may announce
//! at runtime once it has discovered what it produces.

use crate::format::Caps;
use crate::pipeline::{LinkId, StageId};

/// Identifier of a port within a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub(crate) usize);

impl PortId {
    /// Raw index.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for PortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "port#{}", self.0)
    }
}

/// Direction of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    /// Receives data from upstream.
    Input,
    /// Sends data downstream.
    Output,
}

/// Whether a port always exists or appears at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortPresence {
    /// Created with the stage.
    Always,
    /// Announced by the stage while running.
    Sometimes,
}

/// Template for creating ports.
#[derive(Debug, Clone, PartialEq)]
pub struct PortTemplate {
    /// Port name, or name prefix for sometimes-ports (e.g. `src_`).
    pub name: String,
    /// Direction.
    pub direction: PortDirection,
    /// Presence.
    pub presence: PortPresence,
    /// Declared capabilities, if the stage constrains them.
    pub caps: Option<Caps>,
}

impl PortTemplate {
    /// Create a new port template.
    pub fn new(name: impl Into<String>, direction: PortDirection, presence: PortPresence) -> Self {
        Self {
            name: name.into(),
            direction,
            presence,
            caps: None,
        }
    }

    /// Always-present input port.
    pub fn input(name: impl Into<String>) -> Self {
        Self::new(name, PortDirection::Input, PortPresence::Always)
    }

    /// Always-present output port.
    pub fn output(name: impl Into<String>) -> Self {
        Self::new(name, PortDirection::Output, PortPresence::Always)
    }

    /// Output port the stage announces at runtime.
    pub fn sometimes_output(name: impl Into<String>) -> Self {
        Self::new(name, PortDirection::Output, PortPresence::Sometimes)
    }

    /// Constrain the template to the given caps.
    pub fn with_caps(mut self, caps: Caps) -> Self {
        self.caps = Some(caps);
        self
    }

    /// Whether ports from this template exist from creation.
    pub fn is_always(&self) -> bool {
        self.presence == PortPresence::Always
    }
}

/// A port instance owned by a stage in a graph.
///
/// Values handed out by the graph are snapshots: mutating one has no
/// effect on the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Port {
    id: PortId,
    owner: StageId,
    name: String,
    direction: PortDirection,
    caps: Option<Caps>,
    link: Option<LinkId>,
}

impl Port {
    pub(crate) fn new(
        id: PortId,
        owner: StageId,
        name: impl Into<String>,
        direction: PortDirection,
        caps: Option<Caps>,
    ) -> Self {
        Self {
            id,
            owner,
            name: name.into(),
            direction,
            caps,
            link: None,
        }
    }

    /// Port id.
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Stage owning this port.
    pub fn owner(&self) -> StageId {
        self.owner
    }

    /// Port name, unique within its stage.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direction.
    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    /// Declared or announced caps.
    pub fn caps(&self) -> Option<&Caps> {
        self.caps.as_ref()
    }

    /// The link attached to this port, if any.
    pub fn link(&self) -> Option<LinkId> {
        self.link
    }

    /// Whether a link is attached.
    pub fn is_linked(&self) -> bool {
        self.link.is_some()
    }

    /// Whether this is an input port.
    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }

    /// Whether this is an output port.
    pub fn is_output(&self) -> bool {
        self.direction == PortDirection::Output
    }

    pub(crate) fn set_caps(&mut self, caps: Caps) {
        self.caps = Some(caps);
    }

    /// A port's link only ever goes from absent to set.
    pub(crate) fn set_link(&mut self, link: LinkId) {
        debug_assert!(self.link.is_none(), "port {} linked twice", self.name);
        self.link = Some(link);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daggy::NodeIndex;

    #[test]
    fn test_port_template() {
        let template = PortTemplate::input("sink");
        assert_eq!(template.direction, PortDirection::Input);
        assert!(template.is_always());
        assert!(template.caps.is_none());

        let template = PortTemplate::sometimes_output("src_").with_caps(Caps::new("video/x-raw"));
        assert_eq!(template.direction, PortDirection::Output);
        assert_eq!(template.presence, PortPresence::Sometimes);
        assert_eq!(template.caps.unwrap().media_kind(), "video/x-raw");
    }

    #[test]
    fn test_port_accessors() {
        let owner = StageId(NodeIndex::new(3));
        let mut port = Port::new(PortId(0), owner, "src", PortDirection::Output, None);

        assert!(port.is_output());
        assert!(!port.is_linked());
        assert_eq!(port.owner(), owner);

        port.set_caps(Caps::new("application/x-rtp"));
        assert_eq!(port.caps().unwrap().media_kind(), "application/x-rtp");
    }
}
