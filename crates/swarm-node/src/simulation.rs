//! In-process multi-agent training.
//!
//! Several agents share one grid world. Every step each agent observes and
//! picks an action, the environment moves everybody at once, and each agent
//! learns from its own next observation with the shared reward.

use anyhow::{ensure, Context, Result};
use chrono::Utc;
use tracing::info;

use swarm_kernel::{Agent, AgentId, Environment, GridWorld, LearningConfig, SimulationConfig};

use crate::results::{EpisodeRecord, SimulationReport};
use crate::shutdown::ShutdownSignal;

pub struct SwarmSimulation {
    config: SimulationConfig,
    learning: LearningConfig,
    seed: Option<u64>,
}

impl SwarmSimulation {
    /// `seed` fixes the environment and every agent's learner.
    pub fn new(config: SimulationConfig, learning: LearningConfig, seed: Option<u64>) -> Self {
        Self {
            config,
            learning,
            seed,
        }
    }

    /// Run every configured episode, or until `shutdown` fires.
    ///
    /// Blocking; call it from `spawn_blocking` inside a runtime.
    pub fn run(&self, shutdown: &ShutdownSignal) -> Result<SimulationReport> {
        let started_at = Utc::now();
        let config = &self.config;

        let mut env = match self.seed {
            Some(seed) => GridWorld::with_seed(config.grid_width, config.grid_height, seed),
            None => GridWorld::new(config.grid_width, config.grid_height),
        }
        .context("Failed to create environment")?;
        ensure!(
            self.learning.action_count == env.action_count(),
            "Learner has {} actions but the environment takes {}",
            self.learning.action_count,
            env.action_count()
        );

        let mut learning = self.learning.clone();
        learning.observation_extent = env.observation_extent();
        let mut agents: Vec<Agent> = (0..config.agents as AgentId)
            .map(|id| {
                let agent_config = LearningConfig {
                    seed: self.seed.map(|s| s.wrapping_add(id + 1)),
                    ..learning.clone()
                };
                Agent::new(id, learning.algorithm, &agent_config)
            })
            .collect();

        info!(
            agents = config.agents,
            episodes = config.episodes,
            grid = %format!("{}x{}", config.grid_width, config.grid_height),
            algorithm = %learning.algorithm,
            "Starting swarm simulation"
        );

        let mut records = Vec::with_capacity(config.episodes);
        let mut completed = true;
        for episode in 1..=config.episodes {
            if shutdown.is_triggered() {
                completed = false;
                break;
            }
            let record = self.run_episode(episode, &mut env, &mut agents)?;

            if config.log_every_episodes > 0 && episode % config.log_every_episodes == 0 {
                info!(
                    episode,
                    steps = record.steps,
                    reward = %format!("{:.2}", record.reward),
                    goal = record.reached_goal,
                    positions = %positions(&agents),
                    "Episode complete"
                );
            }
            records.push(record);
        }

        let mut report = SimulationReport {
            config: self.config.clone(),
            learning,
            seed: self.seed,
            started_at,
            ended_at: Utc::now(),
            completed,
            episodes: records,
            agents: agents.iter().map(Agent::status).collect(),
            summary: Default::default(),
        };
        report.compute_summary();
        Ok(report)
    }

    fn run_episode(
        &self,
        episode: usize,
        env: &mut GridWorld,
        agents: &mut [Agent],
    ) -> Result<EpisodeRecord> {
        env.reset();
        for agent in agents.iter_mut() {
            agent.reset();
        }

        let mut steps = 0;
        let mut reward = 0.0;
        let mut done = false;
        while !done && steps < self.config.max_steps_per_episode {
            let observations: Vec<_> = agents.iter().map(|a| env.observe(a)).collect();
            let actions = agents
                .iter_mut()
                .zip(&observations)
                .map(|(agent, obs)| agent.select_action(obs))
                .collect::<Result<Vec<_>, _>>()?;

            let result = env.step(agents, &actions)?;
            for ((agent, obs), &action) in agents.iter_mut().zip(&observations).zip(&actions) {
                let next = env.observe(agent);
                agent.apply_update(obs, action, result.reward, &next, result.done)?;
            }

            reward += result.reward;
            done = result.done;
            steps += 1;
        }

        for agent in agents.iter_mut() {
            agent.finish_episode();
        }
        Ok(EpisodeRecord {
            episode,
            steps,
            reward,
            reached_goal: done,
        })
    }
}

fn positions(agents: &[Agent]) -> String {
    agents
        .iter()
        .map(|a| format!("({:.0},{:.0})", a.state.x, a.state.y))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(agents: usize, episodes: usize) -> SimulationConfig {
        SimulationConfig {
            agents,
            episodes,
            max_steps_per_episode: 200,
            grid_width: 5,
            grid_height: 5,
            log_every_episodes: 0,
        }
    }

    #[test]
    fn test_runs_every_episode() {
        let sim = SwarmSimulation::new(small_config(3, 20), LearningConfig::default(), Some(7));
        let report = sim.run(&ShutdownSignal::new()).unwrap();

        assert!(report.completed);
        assert_eq!(report.episodes.len(), 20);
        assert_eq!(report.agents.len(), 3);
        for (i, record) in report.episodes.iter().enumerate() {
            assert_eq!(record.episode, i + 1);
            assert!(record.steps >= 1 && record.steps <= 200);
        }
        // Every agent updates on every step
        let total: u64 = report.episodes.iter().map(|e| e.steps).sum();
        assert!(report.agents.iter().all(|a| a.total_steps == total && a.episodes == 20));
        assert_eq!(report.learning.observation_extent, 5.0);
    }

    #[test]
    fn test_seeded_runs_repeat() {
        let a = SwarmSimulation::new(small_config(2, 10), LearningConfig::default(), Some(3))
            .run(&ShutdownSignal::new())
            .unwrap();
        let b = SwarmSimulation::new(small_config(2, 10), LearningConfig::default(), Some(3))
            .run(&ShutdownSignal::new())
            .unwrap();
        let steps = |r: &SimulationReport| r.episodes.iter().map(|e| e.steps).collect::<Vec<_>>();
        assert_eq!(steps(&a), steps(&b));
    }

    #[test]
    fn test_mismatched_action_count_fails_before_training() {
        let learning = LearningConfig {
            action_count: 8,
            ..LearningConfig::default()
        };
        let err = SwarmSimulation::new(small_config(2, 10), learning, Some(1))
            .run(&ShutdownSignal::new())
            .unwrap_err();
        assert!(err.to_string().contains("8 actions"));
    }

    #[test]
    fn test_shutdown_stops_early() {
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        let report = SwarmSimulation::new(small_config(2, 10), LearningConfig::default(), None)
            .run(&shutdown)
            .unwrap();
        assert!(!report.completed);
        assert!(report.episodes.is_empty());
    }
}
