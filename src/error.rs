//! Error types for swarmboot

use crate::swarm::Phase;
use thiserror::Error;

/// Result type for bootstrap operations
pub type Result<T> = std::result::Result<T, BootstrapError>;

/// Bootstrap error types
#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("{service} transport error: {message}")]
    Transport { service: String, message: String },

    #[error("No cluster descriptor waiting in the queue")]
    EmptyQueue,

    #[error("Invalid cluster descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("{phase} failed on node {node}: command finished with status {status}")]
    NonSuccessStatus {
        phase: Phase,
        node: String,
        status: String,
        output: String,
    },

    #[error("Join failed on node {failed_node} ({} failed, {} joined)", .failed.len(), .joined.len())]
    PartialJoinFailure {
        failed_node: String,
        failed: Vec<String>,
        joined: Vec<String>,
    },

    #[error("{phase} timed out waiting for nodes: {}", .nodes.join(", "))]
    Timeout { phase: Phase, nodes: Vec<String> },

    #[error("Ledger precondition failed for cluster {cluster_id}: status is {actual}")]
    PreconditionFailed { cluster_id: String, actual: String },

    #[error("{phase} failed: {source}")]
    PhaseFailed {
        phase: Phase,
        #[source]
        source: Box<BootstrapError>,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl BootstrapError {
    /// Build a transport error for the named service
    pub fn transport(service: &str, message: impl ToString) -> Self {
        Self::Transport {
            service: service.to_string(),
            message: message.to_string(),
        }
    }

    /// Attach the phase in which a lower-level error happened
    pub fn in_phase(self, phase: Phase) -> Self {
        match self {
            Self::PhaseFailed { .. }
            | Self::NonSuccessStatus { .. }
            | Self::PartialJoinFailure { .. }
            | Self::Timeout { .. } => self,
            other => Self::PhaseFailed {
                phase,
                source: Box::new(other),
            },
        }
    }

    /// Phase of the bootstrap this error belongs to, if any
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::NonSuccessStatus { phase, .. }
            | Self::Timeout { phase, .. }
            | Self::PhaseFailed { phase, .. } => Some(*phase),
            Self::PartialJoinFailure { .. } => Some(Phase::Join),
            _ => None,
        }
    }

    /// Whether leaving the descriptor for redelivery can plausibly succeed later
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidDescriptor(_)
            | Self::InvalidConfig(_)
            | Self::PreconditionFailed { .. } => false,
            Self::PhaseFailed { source, .. } => source.is_retryable(),
            _ => true,
        }
    }
}
