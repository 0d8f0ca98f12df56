//! Status reporting loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, warn};

use swarm_kernel::{MasterReply, StatusReport, WorkerConfig, WorkerMessage};

use super::training::SharedStatus;
use crate::framing::{read_frame, write_frame};
use crate::shutdown::ShutdownSignal;

/// What the reporting loop did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportOutcome {
    /// Reports the master acknowledged
    pub acknowledged: u64,
    /// Reports the master answered with `ERR`
    pub rejected: u64,
    /// The loop ended because the link broke, not because of shutdown
    pub connection_lost: bool,
}

/// Send a status snapshot every report interval until shutdown or a
/// transport failure.
///
/// On failure `connected` is cleared and the loop ends; training is not
/// affected. Shutdown is only observed between exchanges, so an exchange in
/// flight is always finished (or timed out) first.
pub async fn run_reporter(
    stream: TcpStream,
    status: SharedStatus,
    connected: Arc<AtomicBool>,
    config: WorkerConfig,
    shutdown: ShutdownSignal,
) -> ReportOutcome {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut ticker = interval(config.report_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut outcome = ReportOutcome::default();

    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = ticker.tick() => {}
        }
        if shutdown.is_triggered() {
            break;
        }

        // Copy under the lock, release it before any I/O
        let report = StatusReport::from(*status.lock().await);
        match exchange(&mut reader, &mut write_half, report, config.io_timeout()).await {
            Ok(MasterReply::Ack) => outcome.acknowledged += 1,
            Ok(MasterReply::Error(reason)) => {
                outcome.rejected += 1;
                warn!(%reason, "Master rejected status report");
            }
            Err(e) => {
                warn!(error = %e, "Lost connection to master, continuing in standalone mode");
                connected.store(false, Ordering::SeqCst);
                outcome.connection_lost = true;
                break;
            }
        }
    }

    let _ = write_half.shutdown().await;
    debug!(
        acknowledged = outcome.acknowledged,
        rejected = outcome.rejected,
        "Reporting loop stopped"
    );
    outcome
}

/// One request/reply round trip.
async fn exchange<R, W>(
    reader: &mut R,
    writer: &mut W,
    report: StatusReport,
    io_timeout: Duration,
) -> Result<MasterReply>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let line = WorkerMessage::Update(report).encode();
    timeout(io_timeout, write_frame(writer, &line))
        .await
        .context("Timed out sending status")??;

    let reply = timeout(io_timeout, read_frame(reader))
        .await
        .context("Timed out waiting for acknowledgment")??
        .ok_or_else(|| anyhow!("Master closed the connection"))?;
    Ok(MasterReply::decode(&reply)?)
}
