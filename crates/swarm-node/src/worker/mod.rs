//! Worker client: a local training loop plus a reporting link to the master.
//!
//! The two loops run as separate tasks and share only the agent's status
//! snapshot, guarded by one lock. Losing (or never getting) the link to the
//! master leaves training running in standalone mode.

mod reporter;
mod training;

pub use reporter::ReportOutcome;
pub use training::SharedStatus;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use swarm_kernel::{Agent, AgentId, AgentStatus, GridWorld, LearningConfig, WorkerConfig};

use crate::shutdown::ShutdownSignal;
use reporter::run_reporter;
use training::run_training;

/// Final state of a stopped worker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WorkerReport {
    pub status: AgentStatus,
    /// Never reached the master
    pub standalone: bool,
    pub reports_acknowledged: u64,
    pub reports_rejected: u64,
    pub connection_lost: bool,
}

/// A worker that has not been started yet.
#[derive(Debug, Clone)]
pub struct Worker {
    agent_id: AgentId,
    config: WorkerConfig,
    learning: LearningConfig,
}

impl Worker {
    pub fn new(agent_id: AgentId, config: WorkerConfig, learning: LearningConfig) -> Self {
        Self {
            agent_id,
            config,
            learning,
        }
    }

    /// Build the agent and environment, connect to the master if possible and
    /// start both loops.
    pub async fn start(self, shutdown: ShutdownSignal) -> Result<WorkerHandle> {
        let Self {
            agent_id,
            config,
            mut learning,
        } = self;

        let env = match learning.seed {
            Some(seed) => GridWorld::with_seed(config.grid_width, config.grid_height, seed),
            None => GridWorld::new(config.grid_width, config.grid_height),
        }
        .context("Failed to create environment")?;
        ensure!(
            learning.action_count == env.action_count(),
            "Learner has {} actions but the environment takes {}",
            learning.action_count,
            env.action_count()
        );
        learning.observation_extent = env.observation_extent();
        let agent = Agent::new(agent_id, learning.algorithm, &learning);

        let status: SharedStatus = Arc::new(Mutex::new(agent.status()));
        let stream = connect(&config).await;
        let connected = Arc::new(AtomicBool::new(stream.is_some()));

        let reporter = stream.map(|stream| {
            tokio::spawn(run_reporter(
                stream,
                status.clone(),
                connected.clone(),
                config.clone(),
                shutdown.clone(),
            ))
        });

        let training = {
            let status = status.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let result = run_training(agent, env, status, config, shutdown.clone()).await;
                if result.is_err() {
                    shutdown.trigger();
                }
                result
            })
        };

        info!(
            agent_id,
            algorithm = %learning.algorithm,
            connected = connected.load(Ordering::SeqCst),
            "Worker started"
        );

        Ok(WorkerHandle {
            agent_id,
            status,
            connected,
            shutdown,
            training,
            reporter,
        })
    }
}

async fn connect(config: &WorkerConfig) -> Option<TcpStream> {
    match timeout(config.connect_timeout(), TcpStream::connect(config.master_addr)).await {
        Ok(Ok(stream)) => {
            let _ = stream.set_nodelay(true);
            info!(master = %config.master_addr, "Connected to master");
            Some(stream)
        }
        Ok(Err(e)) => {
            warn!(master = %config.master_addr, error = %e, "Could not reach master, training standalone");
            None
        }
        Err(_) => {
            warn!(master = %config.master_addr, "Timed out connecting to master, training standalone");
            None
        }
    }
}

/// A running worker.
pub struct WorkerHandle {
    agent_id: AgentId,
    status: SharedStatus,
    connected: Arc<AtomicBool>,
    shutdown: ShutdownSignal,
    training: JoinHandle<Result<AgentStatus>>,
    reporter: Option<JoinHandle<ReportOutcome>>,
}

impl WorkerHandle {
    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    /// Latest status, read under the worker's status lock.
    pub async fn status(&self) -> AgentStatus {
        *self.status.lock().await
    }

    /// Whether the reporting link is currently up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Wait for both loops to stop.
    ///
    /// The reporting loop is joined first so its last exchange completes
    /// before the agent and environment are released.
    pub async fn join(self) -> Result<WorkerReport> {
        let outcome = match self.reporter {
            Some(reporter) => Some(reporter.await.context("Reporting task failed")?),
            None => None,
        };
        let status = self.training.await.context("Training task failed")??;

        let report = WorkerReport {
            status,
            standalone: outcome.is_none(),
            reports_acknowledged: outcome.map_or(0, |o| o.acknowledged),
            reports_rejected: outcome.map_or(0, |o| o.rejected),
            connection_lost: outcome.is_some_and(|o| o.connection_lost),
        };
        info!(
            agent_id = self.agent_id,
            episodes = report.status.episodes,
            total_steps = report.status.total_steps,
            reports = report.reports_acknowledged,
            "Worker stopped"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;

    async fn unreachable_addr() -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    fn config(master_addr: SocketAddr) -> WorkerConfig {
        WorkerConfig {
            master_addr,
            step_interval_ms: 0,
            max_steps_per_episode: 50,
            grid_width: 5,
            grid_height: 5,
            connect_timeout_ms: 200,
            log_every_episodes: 0,
            ..WorkerConfig::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_standalone_worker_trains_and_stops() {
        let learning = LearningConfig {
            seed: Some(4),
            ..LearningConfig::default()
        };
        let worker = Worker::new(9, config(unreachable_addr().await), learning)
            .start(ShutdownSignal::new())
            .await
            .unwrap();
        assert_eq!(worker.agent_id(), 9);
        assert!(!worker.is_connected());

        tokio::time::timeout(Duration::from_secs(5), async {
            while worker.status().await.total_steps < 50 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        worker.shutdown();
        let report = tokio::time::timeout(Duration::from_secs(5), worker.join())
            .await
            .unwrap()
            .unwrap();
        assert!(report.standalone);
        assert_eq!(report.status.id, 9);
        assert!(report.status.total_steps >= 50);
    }

    #[tokio::test]
    async fn test_start_rejects_actions_the_grid_lacks() {
        let learning = LearningConfig {
            action_count: 8,
            exploration_rate: 1.0,
            ..LearningConfig::default()
        };
        let shutdown = ShutdownSignal::new();
        let err = Worker::new(1, config(unreachable_addr().await), learning)
            .start(shutdown.clone())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("8 actions"));
        assert!(!shutdown.is_triggered());
    }
}
