//! Per-connection worker handler.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use swarm_kernel::{MasterReply, WorkerMessage};

use super::slots::{SlotIndex, SlotTable};
use crate::framing::{read_frame, write_frame};
use crate::shutdown::ShutdownSignal;

/// Why a handler stopped serving its connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    /// No complete message within the idle window
    IdleTimeout,
    Transport(String),
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed"),
            Self::IdleTimeout => f.write_str("idle timeout"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// An accepted connection bound to its slot.
pub struct WorkerConnection {
    pub slot: SlotIndex,
    pub session: Uuid,
    pub peer: SocketAddr,
    pub stream: TcpStream,
}

/// Serve one worker until it disconnects, stalls or shutdown is signalled.
///
/// Leaves the slot in `Closing`; the accept loop frees it once this task
/// has been joined.
pub async fn serve_worker(
    table: Arc<SlotTable>,
    conn: WorkerConnection,
    idle_timeout: Duration,
    shutdown: ShutdownSignal,
) -> (SlotIndex, CloseReason) {
    let WorkerConnection {
        slot,
        session,
        peer,
        stream,
    } = conn;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let reason = loop {
        if shutdown.is_triggered() {
            break CloseReason::Shutdown;
        }

        let frame = tokio::select! {
            _ = shutdown.wait() => break CloseReason::Shutdown,
            frame = timeout(idle_timeout, read_frame(&mut reader)) => frame,
        };
        let line = match frame {
            Err(_) => break CloseReason::IdleTimeout,
            Ok(Err(e)) => break CloseReason::Transport(e.to_string()),
            Ok(Ok(None)) => break CloseReason::PeerClosed,
            Ok(Ok(Some(line))) => line,
        };

        let reply = match WorkerMessage::decode(&line) {
            Ok(WorkerMessage::Update(report)) => {
                table.update(slot, |stats| stats.record(report)).await;
                debug!(
                    slot,
                    worker_id = report.worker_id,
                    steps = report.steps,
                    reward = report.reward,
                    "Status report"
                );
                MasterReply::Ack
            }
            Err(e) => {
                table.update(slot, |stats| stats.rejected += 1).await;
                warn!(slot, %peer, error = %e, "Rejected worker message");
                MasterReply::Error(e.to_string())
            }
        };

        match timeout(idle_timeout, write_frame(&mut write_half, &reply.encode())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => break CloseReason::Transport(e.to_string()),
            Err(_) => break CloseReason::IdleTimeout,
        }
    };

    table.begin_close(slot).await;
    let _ = write_half.shutdown().await;
    drop(write_half);
    drop(reader);

    match &reason {
        CloseReason::IdleTimeout => {
            warn!(slot, %peer, %session, "Forcing close of unresponsive worker")
        }
        reason => info!(slot, %peer, %session, %reason, "Worker disconnected"),
    }
    (slot, reason)
}
