//! Building graphs from launch descriptions.

use super::factory::StageFactory;
use super::graph::{GraphPolicy, PipelineGraph, StageId};
use super::parser::{ParsedSegment, Properties, parse_pipeline};
use crate::element::{PortDirection, PortPresence};
use crate::error::{Error, Result};
use crate::format::{Caps, CapsFilter};
use std::sync::Arc;
use tracing::debug;

/// Build a graph from a gst-launch style description.
///
/// - `name=` names a stage; other keys are its configuration.
/// - A bare caps segment becomes a `capsfilter` stage.
/// - When the upstream stage has no free output but declares a
///   sometimes-present output, a deferred link to the downstream input is
///   registered instead, accepting the kind the input declares (or
///   anything when it declares none).
pub fn build_from_launch(
    factory: Arc<StageFactory>,
    policy: GraphPolicy,
    name: &str,
    description: &str,
) -> Result<PipelineGraph> {
    let graph = PipelineGraph::new(name, factory, policy);
    populate(&graph, description)?;

    debug!(
        pipeline = %name,
        stages = graph.stage_count(),
        links = graph.link_count(),
        "built graph from launch description"
    );
    Ok(graph)
}

/// Create every stage of `description` in `graph`, then link them in
/// order. Nothing is linked unless all stages were created.
fn populate(graph: &PipelineGraph, description: &str) -> Result<()> {
    let parsed = parse_pipeline(description)?;

    let mut stages = Vec::with_capacity(parsed.segments.len());
    for segment in parsed.segments {
        let stage = match segment {
            ParsedSegment::Stage(element) => {
                let mut props: Properties = element.properties.into_iter().collect();
                match props.remove("name") {
                    Some(stage_name) => {
                        graph.add_named_stage(&element.name, &stage_name.as_string(), &props)?
                    }
                    None => graph.add_stage(&element.name, &props)?,
                }
            }
            ParsedSegment::Caps(caps) => {
                Caps::parse(&caps)?;
                graph.add_stage("capsfilter", &Properties::new().with("caps", caps))?
            }
        };
        stages.push(stage);
    }

    for pair in stages.windows(2) {
        connect(graph, pair[0], pair[1])?;
    }
    Ok(())
}

fn connect(graph: &PipelineGraph, upstream: StageId, downstream: StageId) -> Result<()> {
    let has_free_output = graph
        .ports(upstream)
        .iter()
        .any(|port| port.is_output() && !port.is_linked());
    let has_sometimes_output = graph.templates(upstream).iter().any(|t| {
        matches!(t.direction, PortDirection::Output) && matches!(t.presence, PortPresence::Sometimes)
    });

    if has_free_output || !has_sometimes_output {
        return graph.link_stages(upstream, downstream).map(|_| ());
    }

    let target = graph
        .ports(downstream)
        .into_iter()
        .find(|port| port.is_input() && !port.is_linked())
        .ok_or_else(|| Error::Link {
            upstream: stage_name(graph, upstream),
            downstream: stage_name(graph, downstream),
            reason: "no free input port for deferred link".to_string(),
        })?;
    let predicate = target
        .caps()
        .map_or(CapsFilter::Any, |caps| CapsFilter::kind_prefix(caps.media_kind()));

    graph.register_deferred_link(upstream, target.id(), predicate)
}

fn stage_name(graph: &PipelineGraph, id: StageId) -> String {
    graph
        .stage(id)
        .map_or_else(|| id.to_string(), |info| info.name)
}
