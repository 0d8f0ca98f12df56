//! Fixed-capacity worker slot table.
//!
//! Two lock levels: one structural lock over the phase of every slot (used
//! for search, assignment and release) and one lock per slot over the data
//! its handler updates. When both are needed the structural lock is taken
//! first. Neither is held across network I/O.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use swarm_kernel::{AgentId, StatusReport};

/// Stable small-integer address of a slot.
pub type SlotIndex = usize;

/// Lifecycle of one slot: `Empty -> Active -> Closing -> Empty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPhase {
    Empty,
    /// A handler task owns the connection
    Active,
    /// The handler is finishing; reuse waits until its task is reaped
    Closing,
}

/// Slot-local data, mutated by the owning handler.
#[derive(Debug, Clone, Default)]
pub struct SlotStats {
    pub session: Option<Uuid>,
    pub peer: Option<SocketAddr>,
    /// Identifier the worker put in its latest report
    pub worker_id: Option<AgentId>,
    pub last_report: Option<StatusReport>,
    pub reports: u64,
    /// Lines that were answered with `ERR`
    pub rejected: u64,
    pub connected_at: Option<DateTime<Utc>>,
}

impl SlotStats {
    fn occupied(session: Uuid, peer: SocketAddr) -> Self {
        Self {
            session: Some(session),
            peer: Some(peer),
            connected_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn record(&mut self, report: StatusReport) {
        self.worker_id = Some(report.worker_id);
        self.last_report = Some(report);
        self.reports += 1;
    }
}

/// Point-in-time copy of one occupied slot.
#[derive(Debug, Clone)]
pub struct SlotView {
    pub index: SlotIndex,
    pub phase: SlotPhase,
    pub stats: SlotStats,
}

#[derive(Debug)]
pub struct SlotTable {
    phases: Mutex<Vec<SlotPhase>>,
    slots: Vec<Mutex<SlotStats>>,
}

impl SlotTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            phases: Mutex::new(vec![SlotPhase::Empty; capacity]),
            slots: (0..capacity).map(|_| Mutex::new(SlotStats::default())).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claim the lowest empty slot for a new connection.
    ///
    /// Returns `None` when every slot is taken; nothing is mutated then.
    pub async fn assign(&self, session: Uuid, peer: SocketAddr) -> Option<SlotIndex> {
        let mut phases = self.phases.lock().await;
        let index = phases.iter().position(|phase| *phase == SlotPhase::Empty)?;
        // The previous occupant was reaped, so nobody else holds this lock
        *self.slots[index].lock().await = SlotStats::occupied(session, peer);
        phases[index] = SlotPhase::Active;
        Some(index)
    }

    /// `Active -> Closing`. Called by the handler before it returns.
    pub async fn begin_close(&self, index: SlotIndex) {
        let mut phases = self.phases.lock().await;
        if phases[index] == SlotPhase::Active {
            phases[index] = SlotPhase::Closing;
        }
    }

    /// Make a slot reusable. Only called once its handler task has finished.
    pub async fn release(&self, index: SlotIndex) {
        self.phases.lock().await[index] = SlotPhase::Empty;
    }

    pub async fn phase(&self, index: SlotIndex) -> SlotPhase {
        self.phases.lock().await[index]
    }

    /// Slots whose handler is still serving its connection.
    pub async fn active_count(&self) -> usize {
        self.phases
            .lock()
            .await
            .iter()
            .filter(|phase| **phase == SlotPhase::Active)
            .count()
    }

    /// Slots that are not available for assignment.
    pub async fn occupied_count(&self) -> usize {
        self.phases
            .lock()
            .await
            .iter()
            .filter(|phase| **phase != SlotPhase::Empty)
            .count()
    }

    /// Apply `f` to one slot's data under its own lock.
    ///
    /// `f` runs synchronously, so the slot lock is never held across an await.
    pub async fn update<R>(&self, index: SlotIndex, f: impl FnOnce(&mut SlotStats) -> R) -> R {
        let mut stats = self.slots[index].lock().await;
        f(&mut stats)
    }

    /// Copy every non-empty slot, taking the structural lock first.
    ///
    /// Waiting on slot locks while holding the structural lock stays bounded
    /// only because [`SlotTable::update`] closures are synchronous; never
    /// hold a slot lock across an await.
    pub async fn snapshot(&self) -> Vec<SlotView> {
        let phases = self.phases.lock().await;
        let mut views = Vec::new();
        for (index, phase) in phases.iter().enumerate() {
            if *phase == SlotPhase::Empty {
                continue;
            }
            let stats = self.slots[index].lock().await.clone();
            views.push(SlotView {
                index,
                phase: *phase,
                stats,
            });
        }
        views
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_assign_lowest_index_first() {
        let table = SlotTable::new(3);
        assert_eq!(table.assign(Uuid::new_v4(), peer(1)).await, Some(0));
        assert_eq!(table.assign(Uuid::new_v4(), peer(2)).await, Some(1));
        assert_eq!(table.assign(Uuid::new_v4(), peer(3)).await, Some(2));
        assert_eq!(table.assign(Uuid::new_v4(), peer(4)).await, None);
        assert_eq!(table.active_count().await, 3);
    }

    #[tokio::test]
    async fn test_full_table_rejects_without_mutation() {
        let table = SlotTable::new(1);
        let session = Uuid::new_v4();
        table.assign(session, peer(1)).await.unwrap();

        assert_eq!(table.assign(Uuid::new_v4(), peer(2)).await, None);
        let views = table.snapshot().await;
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].stats.session, Some(session));
        assert_eq!(views[0].stats.peer, Some(peer(1)));
    }

    #[tokio::test]
    async fn test_closing_slot_is_not_reused_until_released() {
        let table = SlotTable::new(2);
        let first = table.assign(Uuid::new_v4(), peer(1)).await.unwrap();
        table.assign(Uuid::new_v4(), peer(2)).await.unwrap();

        table.begin_close(first).await;
        assert_eq!(table.phase(first).await, SlotPhase::Closing);
        assert_eq!(table.active_count().await, 1);
        assert_eq!(table.occupied_count().await, 2);
        assert_eq!(table.assign(Uuid::new_v4(), peer(3)).await, None);

        table.release(first).await;
        assert_eq!(table.assign(Uuid::new_v4(), peer(3)).await, Some(first));
    }

    #[tokio::test]
    async fn test_reassignment_clears_previous_stats() {
        let table = SlotTable::new(1);
        let index = table.assign(Uuid::new_v4(), peer(1)).await.unwrap();
        table
            .update(index, |stats| {
                stats.record(StatusReport {
                    worker_id: 9,
                    steps: 3,
                    reward: 1.0,
                })
            })
            .await;
        table.begin_close(index).await;
        table.release(index).await;

        let index = table.assign(Uuid::new_v4(), peer(2)).await.unwrap();
        let stats = table.update(index, |stats| stats.clone()).await;
        assert_eq!(stats.reports, 0);
        assert!(stats.last_report.is_none());
        assert_eq!(stats.peer, Some(peer(2)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_assignment_is_exclusive() {
        let table = Arc::new(SlotTable::new(16));
        let mut tasks = Vec::new();
        for i in 0..24u16 {
            let table = table.clone();
            tasks.push(tokio::spawn(async move {
                table.assign(Uuid::new_v4(), peer(i)).await
            }));
        }

        let mut assigned = HashSet::new();
        let mut rejected = 0;
        for task in tasks {
            match task.await.unwrap() {
                Some(index) => assert!(assigned.insert(index), "slot {index} handed out twice"),
                None => rejected += 1,
            }
        }
        assert_eq!(assigned.len(), 16);
        assert_eq!(rejected, 8);
    }
}
