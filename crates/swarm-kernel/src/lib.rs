//! Swarm Kernel: the per-agent learning core and the shared vocabulary of a
//! master/worker reinforcement-learning swarm.
//!
//! This crate holds everything that is independent of networking: pluggable
//! learning algorithms, agents, the environment contract, the coordination
//! wire format and configuration.

pub mod agent;
pub mod config;
pub mod environment;
pub mod error;
pub mod learning;
pub mod protocol;

pub use agent::{Agent, AgentId, AgentState, AgentStatus};
pub use config::{LearningConfig, MasterConfig, SimulationConfig, SwarmConfig, WorkerConfig};
pub use environment::{Environment, GridWorld, Observation, StepResult, GRID_ACTIONS};
pub use error::{ConfigError, EnvironmentError, LearningError, ProtocolError};
pub use learning::{AlgorithmKind, LearningAlgorithm, QLearning};
pub use protocol::{MasterReply, StatusReport, WorkerMessage, MAX_LINE_BYTES};
