//! Periodic cross-worker aggregation.
//!
//! Worker value tables are never merged: the pass only combines the reported
//! step and reward summaries, using sums and counts so that the result does
//! not depend on the order reports arrived in.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::slots::{SlotPhase, SlotTable, SlotView};
use crate::shutdown::ShutdownSignal;

/// Swarm-wide progress as of the latest coordination pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SwarmSummary {
    /// Slots whose handler is serving a connection
    pub active_workers: usize,
    /// Active workers that have sent at least one report
    pub reporting_workers: usize,
    pub total_steps: u64,
    pub total_reward: f64,
    /// `total_reward / reporting_workers`, zero when nobody reported
    pub mean_reward: f64,
    pub reports_received: u64,
    pub rejected_messages: u64,
}

impl SwarmSummary {
    /// Fold the active slots into one summary.
    ///
    /// Step counts come straight off the wire, so every sum saturates
    /// instead of wrapping.
    pub fn aggregate<'a>(views: impl IntoIterator<Item = &'a SlotView>) -> Self {
        let mut summary = Self::default();
        for view in views {
            if view.phase != SlotPhase::Active {
                continue;
            }
            summary.active_workers += 1;
            summary.reports_received = summary.reports_received.saturating_add(view.stats.reports);
            summary.rejected_messages = summary.rejected_messages.saturating_add(view.stats.rejected);
            if let Some(report) = view.stats.last_report {
                summary.reporting_workers += 1;
                summary.total_steps = summary.total_steps.saturating_add(report.steps);
                summary.total_reward += report.reward;
            }
        }
        if summary.reporting_workers > 0 {
            summary.mean_reward = summary.total_reward / summary.reporting_workers as f64;
        }
        summary
    }
}

/// One pass over the slot table.
pub async fn coordinate(table: &SlotTable) -> SwarmSummary {
    SwarmSummary::aggregate(&table.snapshot().await)
}

/// Run a pass every `period` until shutdown, publishing each result.
pub async fn run_coordinator(
    table: Arc<SlotTable>,
    period: Duration,
    shutdown: ShutdownSignal,
    summary_tx: watch::Sender<SwarmSummary>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pass: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = ticker.tick() => {}
        }
        pass += 1;

        let summary = coordinate(&table).await;
        let changed = *summary_tx.borrow() != summary;
        if changed {
            info!(
                pass,
                active = summary.active_workers,
                reporting = summary.reporting_workers,
                total_steps = summary.total_steps,
                mean_reward = %format!("{:.3}", summary.mean_reward),
                reports = summary.reports_received,
                "Coordination pass"
            );
        } else {
            debug!(pass, "Coordination pass, no change");
        }
        summary_tx.send_replace(summary);
    }
    debug!(passes = pass, "Coordinator stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::slots::SlotStats;
    use swarm_kernel::StatusReport;

    fn view(index: usize, phase: SlotPhase, report: Option<(u64, f64)>, reports: u64) -> SlotView {
        SlotView {
            index,
            phase,
            stats: SlotStats {
                last_report: report.map(|(steps, reward)| StatusReport {
                    worker_id: index as u64,
                    steps,
                    reward,
                }),
                reports,
                ..SlotStats::default()
            },
        }
    }

    #[test]
    fn test_empty_table_summary() {
        assert_eq!(SwarmSummary::aggregate(&[]), SwarmSummary::default());
    }

    #[test]
    fn test_aggregate_sums_active_reports() {
        let views = [
            view(0, SlotPhase::Active, Some((10, 1.5)), 3),
            view(1, SlotPhase::Active, Some((20, 2.5)), 1),
            view(2, SlotPhase::Active, None, 0),
            view(3, SlotPhase::Closing, Some((99, 99.0)), 7),
        ];
        let summary = SwarmSummary::aggregate(&views);
        assert_eq!(summary.active_workers, 3);
        assert_eq!(summary.reporting_workers, 2);
        assert_eq!(summary.total_steps, 30);
        assert_eq!(summary.total_reward, 4.0);
        assert_eq!(summary.mean_reward, 2.0);
        assert_eq!(summary.reports_received, 4);
    }

    #[test]
    fn test_aggregate_is_order_independent() {
        let mut views = vec![
            view(0, SlotPhase::Active, Some((1, 0.25)), 1),
            view(1, SlotPhase::Active, Some((2, 0.5)), 2),
            view(2, SlotPhase::Active, Some((3, 1.0)), 3),
        ];
        let forward = SwarmSummary::aggregate(&views);
        views.reverse();
        assert_eq!(SwarmSummary::aggregate(&views), forward);
    }

    #[test]
    fn test_aggregate_saturates_huge_counters() {
        let mut views = [
            view(0, SlotPhase::Active, Some((u64::MAX, 1.0)), u64::MAX),
            view(1, SlotPhase::Active, Some((u64::MAX, 3.0)), 2),
        ];
        views[0].stats.rejected = u64::MAX;
        views[1].stats.rejected = 1;
        let summary = SwarmSummary::aggregate(&views);
        assert_eq!(summary.total_steps, u64::MAX);
        assert_eq!(summary.reports_received, u64::MAX);
        assert_eq!(summary.rejected_messages, u64::MAX);
        assert_eq!(summary.mean_reward, 2.0);
    }

    #[tokio::test]
    async fn test_coordinator_survives_max_step_reports() {
        let table = Arc::new(SlotTable::new(2));
        for worker_id in 0..2 {
            let index = table
                .assign(uuid::Uuid::new_v4(), "127.0.0.1:1".parse().unwrap())
                .await
                .unwrap();
            table
                .update(index, |stats| {
                    stats.record(StatusReport {
                        worker_id,
                        steps: u64::MAX,
                        reward: 0.0,
                    })
                })
                .await;
        }

        let shutdown = ShutdownSignal::new();
        let (tx, mut rx) = watch::channel(SwarmSummary::default());
        let task = tokio::spawn(run_coordinator(
            table,
            Duration::from_millis(10),
            shutdown.clone(),
            tx,
        ));

        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.reporting_workers == 2))
            .await
            .unwrap()
            .unwrap();
        // A later pass still runs
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rx.borrow().total_steps, u64::MAX);

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_coordinator_publishes_and_stops() {
        let table = Arc::new(SlotTable::new(2));
        let index = table
            .assign(uuid::Uuid::new_v4(), "127.0.0.1:1".parse().unwrap())
            .await
            .unwrap();
        table
            .update(index, |stats| {
                stats.record(StatusReport {
                    worker_id: 1,
                    steps: 5,
                    reward: 0.5,
                })
            })
            .await;

        let shutdown = ShutdownSignal::new();
        let (tx, mut rx) = watch::channel(SwarmSummary::default());
        let task = tokio::spawn(run_coordinator(
            table,
            Duration::from_millis(10),
            shutdown.clone(),
            tx,
        ));

        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.total_steps == 5))
            .await
            .unwrap()
            .unwrap();
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
