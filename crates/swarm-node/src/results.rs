//! Results of in-process swarm simulations.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use swarm_kernel::{AgentStatus, LearningConfig, SimulationConfig};

/// One finished (or interrupted) episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeRecord {
    /// 1-based episode number
    pub episode: usize,
    pub steps: u64,
    /// Sum of the shared per-step rewards
    pub reward: f64,
    pub reached_goal: bool,
}

/// Aggregates over all recorded episodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub episodes: usize,
    /// Fraction of episodes that ended on the goal
    pub goal_rate: f64,
    pub mean_steps: f64,
    pub mean_reward: f64,
    pub best_reward: f64,
    /// Mean reward over the last tenth of the run
    pub final_mean_reward: f64,
}

/// Full record of one simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    pub config: SimulationConfig,
    pub learning: LearningConfig,
    pub seed: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// False if the run was stopped before its last episode
    pub completed: bool,
    pub episodes: Vec<EpisodeRecord>,
    /// Agent counters at the end of the run
    pub agents: Vec<AgentStatus>,
    #[serde(default)]
    pub summary: SimulationSummary,
}

impl SimulationReport {
    pub fn compute_summary(&mut self) {
        let n = self.episodes.len();
        if n == 0 {
            self.summary = SimulationSummary::default();
            return;
        }

        let goals = self.episodes.iter().filter(|e| e.reached_goal).count();
        let total_steps: u64 = self.episodes.iter().map(|e| e.steps).sum();
        let total_reward: f64 = self.episodes.iter().map(|e| e.reward).sum();
        let best_reward = self
            .episodes
            .iter()
            .map(|e| e.reward)
            .fold(f64::NEG_INFINITY, f64::max);

        let tail = (n / 10).max(1);
        let final_mean_reward =
            self.episodes[n - tail..].iter().map(|e| e.reward).sum::<f64>() / tail as f64;

        self.summary = SimulationSummary {
            episodes: n,
            goal_rate: goals as f64 / n as f64,
            mean_steps: total_steps as f64 / n as f64,
            mean_reward: total_reward / n as f64,
            best_reward,
            final_mean_reward,
        };
    }

    /// Save as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let report = serde_json::from_str(&json)?;
        Ok(report)
    }
}

/// Insert a local timestamp before the extension.
/// e.g., "simulation.json" -> "simulation-20260108-010530.json"
pub fn timestamped_path(path: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d-%H%M%S");
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("simulation");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("json");
    let parent = path.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}-{timestamp}.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(rewards: &[(f64, bool)]) -> SimulationReport {
        SimulationReport {
            config: SimulationConfig::default(),
            learning: LearningConfig::default(),
            seed: Some(1),
            started_at: Utc::now(),
            ended_at: Utc::now(),
            completed: true,
            episodes: rewards
                .iter()
                .enumerate()
                .map(|(i, &(reward, reached_goal))| EpisodeRecord {
                    episode: i + 1,
                    steps: 10 * (i as u64 + 1),
                    reward,
                    reached_goal,
                })
                .collect(),
            agents: Vec::new(),
            summary: SimulationSummary::default(),
        }
    }

    #[test]
    fn test_summary() {
        let mut r = report(&[(-1.0, false), (0.5, true), (1.5, true), (0.0, false)]);
        r.compute_summary();
        assert_eq!(r.summary.episodes, 4);
        assert_eq!(r.summary.goal_rate, 0.5);
        assert_eq!(r.summary.mean_steps, 25.0);
        assert_eq!(r.summary.mean_reward, 0.25);
        assert_eq!(r.summary.best_reward, 1.5);
        // Tail of at least one episode
        assert_eq!(r.summary.final_mean_reward, 0.0);
    }

    #[test]
    fn test_empty_summary() {
        let mut r = report(&[]);
        r.compute_summary();
        assert_eq!(r.summary.episodes, 0);
        assert_eq!(r.summary.goal_rate, 0.0);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        let mut r = report(&[(0.25, true)]);
        r.compute_summary();
        r.save(&path).unwrap();

        let loaded = SimulationReport::load(&path).unwrap();
        assert_eq!(loaded.episodes.len(), 1);
        assert_eq!(loaded.episodes[0].reward, 0.25);
        assert_eq!(loaded.summary.goal_rate, 1.0);
        assert_eq!(loaded.seed, Some(1));
    }

    #[test]
    fn test_timestamped_path_keeps_parent_and_extension() {
        let path = timestamped_path(Path::new("out/simulation.json"));
        assert_eq!(path.parent(), Some(Path::new("out")));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("simulation-"));
        assert!(name.ends_with(".json"));
        assert_eq!(name.len(), "simulation-20260108-010530.json".len());
    }
}
