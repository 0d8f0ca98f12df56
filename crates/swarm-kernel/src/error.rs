//! Error types for the swarm kernel.
//!
//! Every variant here is recoverable by the immediate caller: none of them
//! leave learning state, agents or environments partially mutated.

use std::path::PathBuf;

/// Precondition violations reported by a learning algorithm.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LearningError {
    #[error("observation has {got} components, at least {expected} required")]
    ObservationDimension { expected: usize, got: usize },

    #[error("observation component {index} is not finite ({value})")]
    NonFiniteObservation { index: usize, value: f64 },

    #[error("action {action} out of range (action count {action_count})")]
    ActionOutOfRange { action: usize, action_count: usize },

    #[error("non-finite reward {0}")]
    NonFiniteReward(f64),
}

/// Errors raised by an environment.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EnvironmentError {
    #[error("invalid environment dimensions {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("step called without agents")]
    NoAgents,

    #[error("{agents} agents stepped with {actions} actions")]
    ActionCountMismatch { agents: usize, actions: usize },

    #[error("unknown action {action} for agent {agent_id}")]
    UnknownAction { agent_id: u64, action: usize },
}

/// Errors raised while decoding coordination messages.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0:?}")]
    Malformed(String),

    #[error("unknown reply: {0:?}")]
    UnknownReply(String),

    #[error("message exceeds {limit} bytes")]
    TooLong { limit: usize },
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("config validation error: {0}")]
    Validation(String),

    #[error("unknown learning algorithm {0:?}")]
    UnknownAlgorithm(String),
}
