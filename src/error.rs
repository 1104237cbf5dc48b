//! Error types for rtpcast.

use crate::negotiation::NegotiationError;
use crate::pipeline::StageState;
use thiserror::Error;

/// Result type alias using rtpcast's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for graph construction and stage execution.
#[derive(Error, Debug)]
pub enum Error {
    /// A stage could not be instantiated (unknown type, bad configuration,
    /// missing resource).
    #[error("failed to create stage '{factory}': {reason}")]
    Creation {
        /// Stage type name passed to the factory.
        factory: String,
        /// Why creation failed.
        reason: String,
    },

    /// A static link was refused.
    #[error("cannot link '{upstream}' to '{downstream}': {reason}")]
    Link {
        /// Upstream stage (and port) description.
        upstream: String,
        /// Downstream stage (and port) description.
        downstream: String,
        /// Why the link was refused.
        reason: String,
    },

    /// A stage refused a lifecycle transition.
    #[error("stage '{stage}' refused state change {from} -> {to}: {reason}")]
    StateTransition {
        /// Stage that refused.
        stage: String,
        /// State the stage was in.
        from: StageState,
        /// State that was requested.
        to: StageState,
        /// Why the stage refused.
        reason: String,
    },

    /// A stage configuration value is missing, unknown, or mistyped.
    #[error("invalid property '{key}': {reason}")]
    InvalidProperty {
        /// Property key.
        key: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A capability string could not be parsed.
    #[error("invalid caps '{input}': {reason}")]
    Caps {
        /// The offending caps string.
        input: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// A launch description could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// No stage with the given id or name.
    #[error("stage not found: {0}")]
    StageNotFound(String),

    /// No port with the given id or name.
    #[error("port not found: {0}")]
    PortNotFound(String),

    /// The graph no longer accepts structural changes.
    #[error("pipeline graph is frozen: {0}")]
    Frozen(String),

    /// A stage received data it cannot handle.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The pipeline is shutting down; the stage should stop quietly.
    #[error("pipeline is shutting down")]
    Flushing,

    /// A dynamic link attempt was refused.
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for an [`Error::InvalidProperty`].
    pub fn invalid_property(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidProperty {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error only signals an orderly shutdown.
    pub fn is_flushing(&self) -> bool {
        matches!(self, Error::Flushing)
    }
}
