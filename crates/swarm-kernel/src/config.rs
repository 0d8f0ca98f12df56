//! Configuration types for swarm training.
//!
//! A single [`SwarmConfig`] covers the learning core, the master, the worker
//! and the in-process simulation. Loaded from JSON at runtime; every field has
//! a default so partial files are valid.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::environment::GRID_ACTIONS;
use crate::error::ConfigError;
use crate::learning::AlgorithmKind;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub learning: LearningConfig,
    pub master: MasterConfig,
    pub worker: WorkerConfig,
    pub simulation: SimulationConfig,
}

/// Hyperparameters for the learning core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Which learning algorithm each agent is built with
    pub algorithm: AlgorithmKind,

    /// Bins per observation axis
    pub state_bins: usize,

    /// Number of discrete actions
    pub action_count: usize,

    /// Raw coordinate range mapped onto `state_bins` (values beyond are clamped)
    pub observation_extent: f64,

    /// Probability of taking a uniformly random action
    pub exploration_rate: f64,

    /// Step size of the temporal-difference update
    pub learning_rate: f64,

    /// Discount applied to the bootstrapped next-state value
    pub discount_factor: f64,

    /// Table entries start uniform in [0, init_scale)
    pub init_scale: f64,

    /// Random seed for reproducibility (None for OS entropy)
    pub seed: Option<u64>,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            algorithm: AlgorithmKind::QLearning,
            state_bins: 10,
            action_count: 4,
            observation_extent: 10.0,
            exploration_rate: 0.1,
            learning_rate: 0.1,
            discount_factor: 0.95,
            init_scale: 0.01,
            seed: None,
        }
    }
}

/// Master (coordinator) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Listen address
    pub bind_addr: SocketAddr,

    /// Maximum simultaneously connected workers
    pub capacity: usize,

    /// Listen backlog
    pub backlog: u32,

    /// Interval between coordination passes (milliseconds)
    pub coordination_interval_ms: u64,

    /// A handler that receives nothing for this long is closed (milliseconds)
    pub idle_timeout_ms: u64,

    /// Grace period for handlers after shutdown before they are aborted (milliseconds)
    pub drain_timeout_ms: u64,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            capacity: 100,
            backlog: 10,
            coordination_interval_ms: 1000,
            idle_timeout_ms: 30_000,
            drain_timeout_ms: 5_000,
        }
    }
}

impl MasterConfig {
    pub fn coordination_interval(&self) -> Duration {
        Duration::from_millis(self.coordination_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Master address to report to
    pub master_addr: SocketAddr,

    /// Interval between status reports (milliseconds)
    pub report_interval_ms: u64,

    /// Pacing between training steps (milliseconds, 0 = unpaced)
    pub step_interval_ms: u64,

    /// Step ceiling per episode
    pub max_steps_per_episode: u64,

    /// Local environment width
    pub grid_width: usize,

    /// Local environment height
    pub grid_height: usize,

    /// Timeout for the initial connection (milliseconds)
    pub connect_timeout_ms: u64,

    /// Timeout for a single send or acknowledgment (milliseconds)
    pub io_timeout_ms: u64,

    /// Log training progress every N episodes
    pub log_every_episodes: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            master_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            report_interval_ms: 100,
            step_interval_ms: 1,
            max_steps_per_episode: 1000,
            grid_width: 10,
            grid_height: 10,
            connect_timeout_ms: 2_000,
            io_timeout_ms: 5_000,
            log_every_episodes: 100,
        }
    }
}

impl WorkerConfig {
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    pub fn step_interval(&self) -> Duration {
        Duration::from_millis(self.step_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

/// In-process multi-agent simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of agents sharing the environment
    pub agents: usize,

    /// Episodes to run
    pub episodes: usize,

    /// Step ceiling per episode
    pub max_steps_per_episode: u64,

    /// Environment width
    pub grid_width: usize,

    /// Environment height
    pub grid_height: usize,

    /// Log progress every N episodes
    pub log_every_episodes: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            agents: 5,
            episodes: 1000,
            max_steps_per_episode: 1000,
            grid_width: 20,
            grid_height: 20,
            log_every_episodes: 100,
        }
    }
}

impl SwarmConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: SwarmConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            warn!(path = %path.display(), "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let l = &self.learning;
        if l.state_bins == 0 {
            return Err(invalid("learning.state_bins must be > 0"));
        }
        if l.action_count != GRID_ACTIONS {
            return Err(invalid("learning.action_count must match the grid's 4 moves"));
        }
        if !(l.observation_extent.is_finite() && l.observation_extent > 0.0) {
            return Err(invalid("learning.observation_extent must be > 0"));
        }
        if !(0.0..=1.0).contains(&l.exploration_rate) {
            return Err(invalid("learning.exploration_rate must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&l.learning_rate) {
            return Err(invalid("learning.learning_rate must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&l.discount_factor) {
            return Err(invalid("learning.discount_factor must be in [0, 1]"));
        }
        if !(l.init_scale.is_finite() && l.init_scale >= 0.0) {
            return Err(invalid("learning.init_scale must be >= 0"));
        }

        if self.master.capacity == 0 {
            return Err(invalid("master.capacity must be > 0"));
        }
        if self.master.backlog == 0 {
            return Err(invalid("master.backlog must be > 0"));
        }
        if self.master.coordination_interval_ms == 0 {
            return Err(invalid("master.coordination_interval_ms must be > 0"));
        }
        if self.master.idle_timeout_ms == 0 {
            return Err(invalid("master.idle_timeout_ms must be > 0"));
        }

        let w = &self.worker;
        if w.report_interval_ms == 0 {
            return Err(invalid("worker.report_interval_ms must be > 0"));
        }
        if w.max_steps_per_episode == 0 {
            return Err(invalid("worker.max_steps_per_episode must be > 0"));
        }
        if w.grid_width == 0 || w.grid_height == 0 {
            return Err(invalid("worker grid dimensions must be > 0"));
        }
        if w.io_timeout_ms == 0 || w.connect_timeout_ms == 0 {
            return Err(invalid("worker timeouts must be > 0"));
        }

        let s = &self.simulation;
        if s.agents == 0 {
            return Err(invalid("simulation.agents must be > 0"));
        }
        if s.max_steps_per_episode == 0 {
            return Err(invalid("simulation.max_steps_per_episode must be > 0"));
        }
        if s.grid_width == 0 || s.grid_height == 0 {
            return Err(invalid("simulation grid dimensions must be > 0"));
        }

        Ok(())
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Validation(msg.to_string())
}
