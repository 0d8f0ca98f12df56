//! Agents: an identity, a position, progress counters and an owned learner.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::LearningConfig;
use crate::error::LearningError;
use crate::learning::{AlgorithmKind, LearningAlgorithm};

/// Unique agent identifier within its owning process.
pub type AgentId = u64;

/// Kinematic state of an agent inside its environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub x: f64,
    pub y: f64,
}

/// Point-in-time copy of the fields an agent reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub id: AgentId,
    /// Steps taken in the current episode
    pub steps: u64,
    /// Reward accumulated in the current episode
    pub reward: f64,
    /// Steps taken since creation
    pub total_steps: u64,
    /// Completed episodes since creation
    pub episodes: u64,
}

/// An independent learner.
///
/// The learning algorithm is owned exclusively and survives [`Agent::reset`];
/// it is released when the agent is dropped. Agents are not internally
/// synchronized: a caller sharing one across tasks must guard it.
pub struct Agent {
    id: AgentId,
    /// Position, written by the environment
    pub state: AgentState,
    steps: u64,
    reward_sum: f64,
    total_steps: u64,
    episodes: u64,
    algorithm: Box<dyn LearningAlgorithm>,
}

impl Agent {
    /// Create an agent whose learner is selected by `kind`.
    pub fn new(id: AgentId, kind: AlgorithmKind, config: &LearningConfig) -> Self {
        Self::with_algorithm(id, kind.build(config))
    }

    /// Create an agent around an already constructed learner.
    pub fn with_algorithm(id: AgentId, algorithm: Box<dyn LearningAlgorithm>) -> Self {
        Self {
            id,
            state: AgentState::default(),
            steps: 0,
            reward_sum: 0.0,
            total_steps: 0,
            episodes: 0,
            algorithm,
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn reward_sum(&self) -> f64 {
        self.reward_sum
    }

    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    pub fn episodes(&self) -> u64 {
        self.episodes
    }

    pub fn algorithm(&self) -> &dyn LearningAlgorithm {
        self.algorithm.as_ref()
    }

    /// Clear position and episode counters. The learner is kept.
    pub fn reset(&mut self) {
        self.state = AgentState::default();
        self.steps = 0;
        self.reward_sum = 0.0;
    }

    /// Choose an action using the learner's configured exploration rate.
    pub fn select_action(&mut self, observation: &[f64]) -> Result<usize, LearningError> {
        let explore_rate = self.algorithm.exploration_rate();
        self.algorithm.select_action(observation, explore_rate)
    }

    /// Feed one transition to the learner and advance the counters.
    ///
    /// Counters only move if the learner accepted the transition.
    pub fn apply_update(
        &mut self,
        observation: &[f64],
        action: usize,
        reward: f64,
        next_observation: &[f64],
        done: bool,
    ) -> Result<(), LearningError> {
        self.algorithm
            .update(observation, action, reward, next_observation, done)?;
        self.steps += 1;
        self.total_steps += 1;
        self.reward_sum += reward;
        Ok(())
    }

    /// Mark the current episode as complete.
    pub fn finish_episode(&mut self) {
        self.episodes += 1;
    }

    /// Snapshot of the reportable fields.
    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            id: self.id,
            steps: self.steps,
            reward: self.reward_sum,
            total_steps: self.total_steps,
            episodes: self.episodes,
        }
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("steps", &self.steps)
            .field("reward_sum", &self.reward_sum)
            .field("total_steps", &self.total_steps)
            .field("episodes", &self.episodes)
            .field("algorithm", &self.algorithm.name())
            .finish()
    }
}
