//! Local training loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info};

use swarm_kernel::{Agent, AgentStatus, Environment, WorkerConfig};

use crate::shutdown::ShutdownSignal;

/// The agent fields the reporting loop reads, behind the worker's one lock.
pub type SharedStatus = Arc<Mutex<AgentStatus>>;

/// Train `agent` in `env` episode after episode until shutdown.
///
/// The agent and environment are owned by this loop and dropped with it.
/// Every accepted update is copied into `status` so reports never touch the
/// agent itself.
pub async fn run_training<E: Environment>(
    mut agent: Agent,
    mut env: E,
    status: SharedStatus,
    config: WorkerConfig,
    shutdown: ShutdownSignal,
) -> Result<AgentStatus> {
    let mut pacer = pacer(&config);

    'episodes: while !shutdown.is_triggered() {
        env.reset();
        agent.reset();
        publish(&status, agent.status()).await;
        let mut observation = env.observe(&agent);

        for _ in 0..config.max_steps_per_episode {
            match pacer.as_mut() {
                Some(ticker) => tokio::select! {
                    _ = shutdown.wait() => break 'episodes,
                    _ = ticker.tick() => {}
                },
                None => {
                    tokio::task::yield_now().await;
                    if shutdown.is_triggered() {
                        break 'episodes;
                    }
                }
            }

            let action = agent
                .select_action(&observation)
                .context("Action selection failed")?;
            let result = env
                .step(std::slice::from_mut(&mut agent), &[action])
                .context("Environment step failed")?;
            agent
                .apply_update(&observation, action, result.reward, &result.observation, result.done)
                .context("Value update failed")?;
            publish(&status, agent.status()).await;

            observation = result.observation;
            if result.done {
                break;
            }
        }

        agent.finish_episode();
        publish(&status, agent.status()).await;

        let episode = agent.episodes();
        if config.log_every_episodes > 0 && episode % config.log_every_episodes == 0 {
            info!(
                agent_id = agent.id(),
                episode,
                steps = agent.steps(),
                reward = %format!("{:.2}", agent.reward_sum()),
                "Episode complete"
            );
        }
    }

    debug!(
        agent_id = agent.id(),
        episodes = agent.episodes(),
        total_steps = agent.total_steps(),
        "Training loop stopped"
    );
    Ok(agent.status())
}

fn pacer(config: &WorkerConfig) -> Option<Interval> {
    let period = config.step_interval();
    if period.is_zero() {
        return None;
    }
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticker)
}

async fn publish(status: &SharedStatus, snapshot: AgentStatus) {
    *status.lock().await = snapshot;
}
