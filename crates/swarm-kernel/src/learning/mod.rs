//! Pluggable learning algorithms.
//!
//! The [`LearningAlgorithm`] trait is the only thing agents, workers and the
//! master know about; concrete variants are chosen at agent construction via
//! an [`AlgorithmKind`] tag. Adding a variant means adding a module here and a
//! match arm in [`AlgorithmKind::build`].

mod q_learning;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::LearningConfig;
use crate::error::{ConfigError, LearningError};

pub use q_learning::QLearning;

/// A decision/update unit owned by exactly one agent.
///
/// Implementations are not internally synchronized. `Send` lets an agent move
/// into the task that trains it.
pub trait LearningAlgorithm: Send {
    /// Short algorithm name for logs.
    fn name(&self) -> &str;

    /// Size of the discrete action space.
    fn action_count(&self) -> usize;

    /// Exploration rate the algorithm was configured with.
    fn exploration_rate(&self) -> f64;

    /// Pick an action for `observation`.
    ///
    /// With probability `explore_rate` the action is uniformly random,
    /// otherwise it is the greedy action.
    fn select_action(
        &mut self,
        observation: &[f64],
        explore_rate: f64,
    ) -> Result<usize, LearningError>;

    /// Greedy action for `observation`, without exploration.
    fn greedy_action(&self, observation: &[f64]) -> Result<usize, LearningError>;

    /// Highest action value for `observation`.
    fn max_value(&self, observation: &[f64]) -> Result<f64, LearningError>;

    /// Learn from one transition.
    ///
    /// Inputs are validated before anything is written; on error the learned
    /// state is untouched.
    fn update(
        &mut self,
        observation: &[f64],
        action: usize,
        reward: f64,
        next_observation: &[f64],
        terminal: bool,
    ) -> Result<(), LearningError>;
}

/// Type tag selecting a learning algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    /// Tabular Q-learning over a discretized 2-D state space
    #[default]
    QLearning,
}

impl AlgorithmKind {
    /// Get all known algorithms.
    pub fn all() -> Vec<Self> {
        vec![Self::QLearning]
    }

    /// Get the name of this algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            Self::QLearning => "q_learning",
        }
    }

    /// Construct a fresh instance of this algorithm.
    pub fn build(&self, config: &LearningConfig) -> Box<dyn LearningAlgorithm> {
        match self {
            Self::QLearning => Box::new(QLearning::new(config)),
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AlgorithmKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "q_learning" | "q-learning" | "qlearning" | "ql" => Ok(Self::QLearning),
            _ => Err(ConfigError::UnknownAlgorithm(s.to_string())),
        }
    }
}
