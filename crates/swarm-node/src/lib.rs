//! Swarm Node: the networked side of the swarm.
//!
//! - [`master`]: accepts workers into a bounded slot table and aggregates
//!   their progress
//! - [`worker`]: trains one agent locally and reports to a master
//! - [`simulation`]: trains several agents in one shared environment
//!
//! All long-running parts stop cooperatively through a [`ShutdownSignal`].

pub mod framing;
pub mod master;
pub mod results;
pub mod shutdown;
pub mod simulation;
pub mod worker;

pub use master::{Master, MasterHandle, SwarmSummary};
pub use results::{EpisodeRecord, SimulationReport, SimulationSummary};
pub use shutdown::{install_signal_handlers, ShutdownSignal};
pub use simulation::SwarmSimulation;
pub use worker::{Worker, WorkerHandle, WorkerReport};
