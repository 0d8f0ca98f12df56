//! Master connection manager.
//!
//! One task accepts connections and reaps finished handlers, one task per
//! connection serves its worker, and one task runs the periodic coordination
//! pass. All of them share a [`SlotTable`] and a [`ShutdownSignal`].

mod coordinator;
mod handler;
mod slots;

pub use coordinator::{coordinate, SwarmSummary};
pub use handler::CloseReason;
pub use slots::{SlotIndex, SlotPhase, SlotStats, SlotTable, SlotView};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tokio::task::{self, JoinError, JoinHandle, JoinSet};
use tracing::{error, info, warn};
use uuid::Uuid;

use swarm_kernel::MasterConfig;

use crate::shutdown::ShutdownSignal;
use coordinator::run_coordinator;
use handler::{serve_worker, WorkerConnection};

/// Pause after a failed `accept` so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Bind a listener with address reuse and the configured backlog.
fn bind_listener(config: &MasterConfig) -> Result<TcpListener> {
    let socket = if config.bind_addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .context("Failed to create listening socket")?;
    socket
        .set_reuseaddr(true)
        .context("Failed to set SO_REUSEADDR")?;
    socket
        .bind(config.bind_addr)
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    socket
        .listen(config.backlog)
        .with_context(|| format!("Failed to listen on {}", config.bind_addr))
}

/// Running master, returned by [`Master::start`].
pub struct MasterHandle {
    local_addr: SocketAddr,
    table: Arc<SlotTable>,
    summary: watch::Receiver<SwarmSummary>,
    shutdown: ShutdownSignal,
    task: JoinHandle<()>,
}

impl MasterHandle {
    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn active_slots(&self) -> usize {
        self.table.active_count().await
    }

    pub fn slots(&self) -> &SlotTable {
        &self.table
    }

    /// Summary from the latest coordination pass.
    pub fn summary(&self) -> SwarmSummary {
        self.summary.borrow().clone()
    }

    /// Receiver that observes every published summary.
    pub fn subscribe(&self) -> watch::Receiver<SwarmSummary> {
        self.summary.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Wait for the accept loop, handlers and coordinator to finish.
    pub async fn join(self) -> Result<()> {
        self.task.await.context("Master task failed")
    }
}

/// Master process state.
pub struct Master {
    config: MasterConfig,
    table: Arc<SlotTable>,
    shutdown: ShutdownSignal,
    summary_tx: watch::Sender<SwarmSummary>,
    handlers: JoinSet<(SlotIndex, CloseReason)>,
    slot_of: HashMap<task::Id, SlotIndex>,
}

impl Master {
    /// Bind the listener and spawn the master's tasks.
    ///
    /// Bind and listen failures are returned; everything after that is
    /// handled inside the running master.
    pub async fn start(config: MasterConfig, shutdown: ShutdownSignal) -> Result<MasterHandle> {
        let listener = bind_listener(&config)?;
        let local_addr = listener.local_addr()?;
        let table = Arc::new(SlotTable::new(config.capacity));
        let (summary_tx, summary_rx) = watch::channel(SwarmSummary::default());

        info!(
            addr = %local_addr,
            capacity = config.capacity,
            backlog = config.backlog,
            "Master listening"
        );

        let master = Self {
            config,
            table: table.clone(),
            shutdown: shutdown.clone(),
            summary_tx,
            handlers: JoinSet::new(),
            slot_of: HashMap::new(),
        };
        let task = tokio::spawn(master.run(listener));

        Ok(MasterHandle {
            local_addr,
            table,
            summary: summary_rx,
            shutdown,
            task,
        })
    }

    async fn run(mut self, listener: TcpListener) {
        let coordinator = tokio::spawn(run_coordinator(
            self.table.clone(),
            self.config.coordination_interval(),
            self.shutdown.clone(),
            self.summary_tx.clone(),
        ));

        loop {
            tokio::select! {
                _ = self.shutdown.wait() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.admit(stream, peer).await,
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = self.handlers.join_next_with_id(), if !self.handlers.is_empty() => {
                    self.reap(joined).await;
                }
            }
        }

        // Closing the listener refuses new connections
        drop(listener);
        self.drain().await;
        if let Err(e) = coordinator.await {
            error!(error = %e, "Coordinator task failed");
        }
        info!("Master stopped");
    }

    async fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        let session = Uuid::new_v4();
        let Some(slot) = self.table.assign(session, peer).await else {
            warn!(%peer, capacity = self.config.capacity, "No free worker slot, rejecting connection");
            drop(stream);
            return;
        };

        let conn = WorkerConnection {
            slot,
            session,
            peer,
            stream,
        };
        let handle = self.handlers.spawn(serve_worker(
            self.table.clone(),
            conn,
            self.config.idle_timeout(),
            self.shutdown.clone(),
        ));
        self.slot_of.insert(handle.id(), slot);
        info!(slot, %peer, %session, "Worker connected");
    }

    async fn reap(&mut self, joined: Result<(task::Id, (SlotIndex, CloseReason)), JoinError>) {
        let (id, outcome) = match joined {
            Ok((id, _)) => (id, None),
            Err(e) => (e.id(), Some(e)),
        };
        let Some(slot) = self.slot_of.remove(&id) else {
            return;
        };
        if let Some(e) = outcome {
            if e.is_panic() {
                error!(slot, "Worker handler panicked");
            } else {
                warn!(slot, "Worker handler aborted");
            }
        }
        self.table.release(slot).await;
    }

    /// Stop accepting, give handlers the drain window, then abort the rest.
    async fn drain(&mut self) {
        let remaining = self.handlers.len();
        if remaining > 0 {
            info!(handlers = remaining, "Draining worker handlers");
        }

        let deadline = tokio::time::Instant::now() + self.config.drain_timeout();
        while !self.handlers.is_empty() {
            match tokio::time::timeout_at(deadline, self.handlers.join_next_with_id()).await {
                Ok(Some(joined)) => self.reap(joined).await,
                Ok(None) => break,
                Err(_) => {
                    warn!(handlers = self.handlers.len(), "Drain timeout, aborting handlers");
                    self.handlers.abort_all();
                    while let Some(joined) = self.handlers.join_next_with_id().await {
                        self.reap(joined).await;
                    }
                }
            }
        }
    }
}
