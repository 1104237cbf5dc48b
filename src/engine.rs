//! Engine context: the process-wide services a pipeline needs.

use crate::error::Result;
use crate::observability::init_metrics;
use crate::pipeline::{GraphPolicy, PipelineGraph, StageFactory, build_from_launch};
use std::sync::Arc;
use tracing::debug;

/// Entry point for building pipelines.
///
/// Holds the stage factory and the graph policy new graphs get. Creating
/// one also describes the crate's metrics.
#[derive(Debug, Clone)]
pub struct EngineContext {
    factory: Arc<StageFactory>,
    policy: GraphPolicy,
}

impl EngineContext {
    /// An engine with the built-in stages.
    pub fn new() -> Self {
        Self::with_factory(StageFactory::with_builtins())
    }

    /// An engine with a custom stage factory.
    pub fn with_factory(factory: StageFactory) -> Self {
        init_metrics();
        debug!(stage_types = factory.list().len(), "engine initialized");
        Self {
            factory: Arc::new(factory),
            policy: GraphPolicy::default(),
        }
    }

    /// Use `policy` for graphs created from now on.
    pub fn with_policy(mut self, policy: GraphPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The stage factory.
    pub fn factory(&self) -> &StageFactory {
        &self.factory
    }

    /// Graph policy for new graphs.
    pub fn policy(&self) -> GraphPolicy {
        self.policy
    }

    /// An empty graph.
    pub fn new_graph(&self, name: &str) -> PipelineGraph {
        PipelineGraph::new(name, self.factory.clone(), self.policy)
    }

    /// Build a graph named `pipeline` from a launch description.
    pub fn parse_launch(&self, description: &str) -> Result<PipelineGraph> {
        self.parse_launch_named("pipeline", description)
    }

    /// Build a named graph from a launch description.
    pub fn parse_launch_named(&self, name: &str, description: &str) -> Result<PipelineGraph> {
        build_from_launch(self.factory.clone(), self.policy, name, description)
    }
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Properties;

    #[test]
    fn test_new_graph_uses_policy() {
        let engine = EngineContext::new().with_policy(GraphPolicy {
            freeze_on_play: false,
            channel_capacity: 4,
        });
        let graph = engine.new_graph("custom");

        assert_eq!(graph.name(), "custom");
        assert!(!graph.policy().freeze_on_play);
        assert!(graph.add_stage("fakesink", &Properties::new()).is_ok());
    }

    #[test]
    fn test_parse_launch() {
        let engine = EngineContext::new();
        let graph = engine.parse_launch("videotestsrc ! fakesink").unwrap();
        assert_eq!(graph.name(), "pipeline");
        assert_eq!(graph.link_count(), 1);
    }
}
