//! Negotiation error types.

use thiserror::Error;

/// Why a runtime link attempt was refused.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NegotiationError {
    /// No common format between connected stages.
    #[error("No common format between {upstream} and {downstream}:\n  {explanation}")]
    NoCommonFormat {
        /// Upstream port description.
        upstream: String,
        /// Downstream port description.
        downstream: String,
        /// Detailed explanation.
        explanation: String,
    },

    /// Linking would close a cycle in the graph.
    #[error("Linking {upstream} to {downstream} would create a cycle")]
    CycleDetected {
        /// Upstream port description.
        upstream: String,
        /// Downstream port description.
        downstream: String,
    },

    /// One end is already linked.
    #[error("Port {port} is already linked")]
    AlreadyLinked {
        /// The linked port.
        port: String,
    },

    /// Stage not found in the graph.
    #[error("Stage not found: {name}")]
    StageNotFound {
        /// Stage name or id.
        name: String,
    },

    /// A port cannot take part in the link.
    #[error("Port {port} cannot be linked: {reason}")]
    InvalidPort {
        /// Port description.
        port: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl NegotiationError {
    /// Create a "no common format" error with suggestions.
    pub fn no_common_format(
        upstream: impl Into<String>,
        downstream: impl Into<String>,
        upstream_caps: &str,
        downstream_caps: &str,
    ) -> Self {
        Self::NoCommonFormat {
            upstream: upstream.into(),
            downstream: downstream.into(),
            explanation: format!(
                "Upstream produces: {}\nDownstream accepts: {}\nSuggestion: Insert a format converter",
                upstream_caps, downstream_caps
            ),
        }
    }
}
