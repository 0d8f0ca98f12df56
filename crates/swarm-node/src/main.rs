//! Swarm node CLI.
//!
//! Commands:
//! - master: Accept workers and aggregate their progress
//! - worker: Train one agent and report to a master
//! - simulate: Train several agents in one process and save the results

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use swarm_kernel::{AgentId, SwarmConfig};
use swarm_node::results::timestamped_path;
use swarm_node::{install_signal_handlers, Master, ShutdownSignal, SwarmSimulation, Worker};

#[derive(Parser)]
#[command(name = "swarm-node")]
#[command(version)]
#[command(about = "Master/worker swarm of reinforcement-learning agents")]
struct Cli {
    /// Configuration file (JSON); defaults are used if it does not exist
    #[arg(long, env = "SWARM_CONFIG", default_value = "swarm.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the master
    Master {
        /// Listen address
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Maximum concurrent workers
        #[arg(long)]
        capacity: Option<usize>,
    },

    /// Run a worker
    Worker {
        /// Master address, `IP` or `IP:PORT` (default: loopback)
        master_addr: Option<String>,

        /// Agent identifier (default: process id)
        #[arg(long)]
        agent_id: Option<AgentId>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Run an in-process swarm simulation
    Simulate {
        /// Number of agents
        #[arg(long)]
        agents: Option<usize>,

        /// Number of episodes
        #[arg(long)]
        episodes: Option<usize>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Output file for results (a timestamp is appended)
        #[arg(long, default_value = "simulation.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();

    let mut config = SwarmConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    let shutdown = ShutdownSignal::new();
    install_signal_handlers(shutdown.clone());

    match cli.command {
        Commands::Master { bind, capacity } => {
            if let Some(bind) = bind {
                config.master.bind_addr = bind;
            }
            if let Some(capacity) = capacity {
                config.master.capacity = capacity;
            }
            config.validate()?;

            let master = Master::start(config.master, shutdown).await?;
            master.join().await?;
        }

        Commands::Worker {
            master_addr,
            agent_id,
            seed,
        } => {
            if let Some(addr) = master_addr {
                config.worker.master_addr = parse_master_addr(&addr, config.worker.master_addr.port())?;
            }
            if seed.is_some() {
                config.learning.seed = seed;
            }
            config.validate()?;

            let agent_id = agent_id.unwrap_or_else(|| AgentId::from(std::process::id()));
            let worker = Worker::new(agent_id, config.worker, config.learning)
                .start(shutdown)
                .await?;
            let report = worker.join().await?;

            println!("\n=== Worker Result ===");
            println!("Agent: {}", report.status.id);
            println!("Episodes: {}", report.status.episodes);
            println!("Total steps: {}", report.status.total_steps);
            if report.standalone {
                println!("Mode: standalone");
            } else {
                println!("Reports acknowledged: {}", report.reports_acknowledged);
                println!("Reports rejected: {}", report.reports_rejected);
                println!("Connection lost: {}", report.connection_lost);
            }
        }

        Commands::Simulate {
            agents,
            episodes,
            seed,
            output,
        } => {
            if let Some(agents) = agents {
                config.simulation.agents = agents;
            }
            if let Some(episodes) = episodes {
                config.simulation.episodes = episodes;
            }
            config.validate()?;

            let seed = seed.or(config.learning.seed);
            let simulation = SwarmSimulation::new(config.simulation, config.learning, seed);
            let report = tokio::task::spawn_blocking(move || simulation.run(&shutdown))
                .await
                .context("Simulation task failed")??;

            let path = timestamped_path(&output);
            report.save(&path)?;
            info!(path = %path.display(), "Results saved");

            let s = &report.summary;
            println!("\n=== Simulation Result ===");
            println!("Agents: {}", report.config.agents);
            println!(
                "Grid: {}x{}",
                report.config.grid_width, report.config.grid_height
            );
            println!("Episodes: {}{}", s.episodes, if report.completed { "" } else { " (interrupted)" });
            println!("Goal rate: {:.1}%", s.goal_rate * 100.0);
            println!("Mean steps: {:.1}", s.mean_steps);
            println!("Mean reward: {:.3}", s.mean_reward);
            println!("Best reward: {:.3}", s.best_reward);
            println!("Final mean reward: {:.3}", s.final_mean_reward);
            println!(
                "Duration: {:.1}s",
                (report.ended_at - report.started_at).num_milliseconds() as f64 / 1000.0
            );
        }
    }

    Ok(())
}

/// Accept `IP:PORT`, or a bare `IP` with the configured port.
fn parse_master_addr(addr: &str, default_port: u16) -> Result<SocketAddr> {
    if let Ok(addr) = addr.parse::<SocketAddr>() {
        return Ok(addr);
    }
    match addr.parse::<IpAddr>() {
        Ok(ip) => Ok(SocketAddr::new(ip, default_port)),
        Err(_) => bail!("Invalid master address: {addr}"),
    }
}
