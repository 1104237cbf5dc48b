//! Span helpers for pipelines and stages.

use tracing::{Level, Span, span};

/// Create a span for a pipeline.
#[inline]
pub fn span_pipeline(name: &str) -> Span {
    span!(Level::INFO, "pipeline", name = %name)
}

/// Create a span for a stage worker.
#[inline]
pub fn span_stage(pipeline: &str, stage: &str, kind: &str) -> Span {
    span!(
        Level::DEBUG,
        "stage",
        pipeline = %pipeline,
        stage = %stage,
        kind = %kind
    )
}

/// Enter a pipeline span, returning the guard.
pub fn instrument_pipeline(name: &str) -> tracing::span::EnteredSpan {
    span_pipeline(name).entered()
}

/// Enter a stage span, returning the guard.
pub fn instrument_stage(pipeline: &str, stage: &str, kind: &str) -> tracing::span::EnteredSpan {
    span_stage(pipeline, stage, kind).entered()
}
