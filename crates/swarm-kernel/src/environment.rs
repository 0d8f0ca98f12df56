//! Environment contract consumed by agents, plus a small grid world.
//!
//! Environments own the dynamics: they read and write agent positions but
//! never touch an agent's learner.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::agent::Agent;
use crate::error::EnvironmentError;

/// Fixed-dimension numeric observation.
pub type Observation = Vec<f64>;

/// Outcome of stepping the environment once.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    /// Shared reward for the stepped agents
    pub reward: f64,
    /// Post-step observation of the first stepped agent
    pub observation: Observation,
    /// Episode has terminated
    pub done: bool,
}

/// A simulator agents can observe and act in.
pub trait Environment: Send {
    /// Re-initialize episode state.
    fn reset(&mut self);

    /// Observation for `agent` in the current state.
    fn observe(&self, agent: &Agent) -> Observation;

    /// Apply one action per agent, all at once.
    ///
    /// Fails without moving anyone if the actions do not line up with the
    /// agents or an action is unknown.
    fn step(&mut self, agents: &mut [Agent], actions: &[usize])
        -> Result<StepResult, EnvironmentError>;
}

/// Reward for standing on the goal cell.
pub const GOAL_REWARD: f64 = 1.0;

/// Reward for every other step.
pub const STEP_PENALTY: f64 = -0.01;

/// Moves in action-index order: up, down, left, right.
const MOVES: [(i64, i64); 4] = [(0, 1), (0, -1), (-1, 0), (1, 0)];

/// Number of actions a [`GridWorld`] accepts.
pub const GRID_ACTIONS: usize = MOVES.len();

/// A `width x height` grid with one goal cell.
///
/// Agents start at the origin (after [`Agent::reset`]) and move one cell per
/// step, clamped at the walls. The goal moves to a random cell on every
/// [`Environment::reset`].
#[derive(Debug, Clone)]
pub struct GridWorld {
    width: usize,
    height: usize,
    goal: (usize, usize),
    rng: ChaCha8Rng,
}

impl GridWorld {
    /// Create a grid world seeded from OS entropy.
    pub fn new(width: usize, height: usize) -> Result<Self, EnvironmentError> {
        Self::build(width, height, ChaCha8Rng::from_rng(&mut rand::rng()))
    }

    /// Create a reproducible grid world.
    pub fn with_seed(width: usize, height: usize, seed: u64) -> Result<Self, EnvironmentError> {
        Self::build(width, height, ChaCha8Rng::seed_from_u64(seed))
    }

    fn build(width: usize, height: usize, rng: ChaCha8Rng) -> Result<Self, EnvironmentError> {
        if width == 0 || height == 0 {
            return Err(EnvironmentError::InvalidDimensions { width, height });
        }
        let mut world = Self {
            width,
            height,
            goal: (0, 0),
            rng,
        };
        world.place_goal();
        Ok(world)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn goal(&self) -> (usize, usize) {
        self.goal
    }

    pub fn action_count(&self) -> usize {
        GRID_ACTIONS
    }

    /// Coordinate range of positions, for sizing a discretizer.
    pub fn observation_extent(&self) -> f64 {
        self.width.max(self.height) as f64
    }

    fn place_goal(&mut self) {
        // The origin is the spawn cell, keep it free when there is a choice
        loop {
            let goal = (
                self.rng.random_range(0..self.width),
                self.rng.random_range(0..self.height),
            );
            if goal != (0, 0) || self.width * self.height == 1 {
                self.goal = goal;
                return;
            }
        }
    }

    fn cell_of(&self, agent: &Agent) -> (usize, usize) {
        let x = agent.state.x.clamp(0.0, (self.width - 1) as f64) as usize;
        let y = agent.state.y.clamp(0.0, (self.height - 1) as f64) as usize;
        (x, y)
    }

    fn moved(&self, (x, y): (usize, usize), action: usize) -> (usize, usize) {
        let (dx, dy) = MOVES[action];
        let nx = (x as i64 + dx).clamp(0, self.width as i64 - 1) as usize;
        let ny = (y as i64 + dy).clamp(0, self.height as i64 - 1) as usize;
        (nx, ny)
    }
}

impl Environment for GridWorld {
    fn reset(&mut self) {
        self.place_goal();
    }

    fn observe(&self, agent: &Agent) -> Observation {
        let (x, y) = self.cell_of(agent);
        let (gx, gy) = self.goal;
        vec![
            x as f64,
            y as f64,
            gx as f64 - x as f64,
            gy as f64 - y as f64,
        ]
    }

    fn step(
        &mut self,
        agents: &mut [Agent],
        actions: &[usize],
    ) -> Result<StepResult, EnvironmentError> {
        if agents.is_empty() {
            return Err(EnvironmentError::NoAgents);
        }
        if agents.len() != actions.len() {
            return Err(EnvironmentError::ActionCountMismatch {
                agents: agents.len(),
                actions: actions.len(),
            });
        }
        if let Some((agent, &action)) = agents
            .iter()
            .zip(actions)
            .find(|(_, action)| **action >= MOVES.len())
        {
            return Err(EnvironmentError::UnknownAction {
                agent_id: agent.id(),
                action,
            });
        }

        let mut total_reward = 0.0;
        let mut done = false;
        for (agent, &action) in agents.iter_mut().zip(actions) {
            let (x, y) = self.moved(self.cell_of(agent), action);
            agent.state.x = x as f64;
            agent.state.y = y as f64;

            if (x, y) == self.goal {
                total_reward += GOAL_REWARD;
                done = true;
            } else {
                total_reward += STEP_PENALTY;
            }
        }

        Ok(StepResult {
            reward: total_reward / agents.len() as f64,
            observation: self.observe(&agents[0]),
            done,
        })
    }
}
