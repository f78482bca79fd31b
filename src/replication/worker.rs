//! Replication worker
//!
//! A single background task per process. Each pass:
//! 1. reads up to `batch_size` PENDING events from the active endpoint
//! 2. replays them, in id order, each in its own transaction on the
//!    endpoint named by `target_db`, marking each APPLIED after commit
//! 3. stops at the first event that fails, leaving it and everything
//!    after it PENDING
//! 4. when healthy, drains the secondary's queue of events that target the
//!    primary; a request can commit on the secondary after the failback
//!    check saw an empty backlog and before routing flipped
//! 5. reinstates the primary once nothing PENDING targets it
//!
//! A stop request is honoured between passes; a pass in flight always
//! finishes its batch.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::event::ReplicationEvent;
use super::queue;
use crate::failover::persist_topology;
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};
use crate::operations::Outcome;
use crate::store::{Connector, QueuedEvent, StorageError, StorageResult};
use crate::topology::{Endpoint, EndpointRole, Topology, TopologyState};

/// Lower bound of the shortened sleep after a productive pass.
pub const MIN_BUSY_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub batch_size: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            batch_size: 25,
        }
    }
}

pub struct ReplicationWorker {
    topology: Arc<TopologyState>,
    connector: Arc<dyn Connector>,
    metrics: Arc<MetricsRegistry>,
    settings: WorkerSettings,
}

impl ReplicationWorker {
    pub fn new(
        topology: Arc<TopologyState>,
        connector: Arc<dyn Connector>,
        metrics: Arc<MetricsRegistry>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            topology,
            connector,
            metrics,
            settings,
        }
    }

    /// Sleep before the next pass: the full interval when idle, half of it
    /// (never below [`MIN_BUSY_DELAY`]) when the last pass applied events.
    pub fn next_delay(&self, applied: usize) -> Duration {
        if applied == 0 {
            self.settings.poll_interval
        } else {
            (self.settings.poll_interval / 2).max(MIN_BUSY_DELAY)
        }
    }

    /// One drain pass followed by a failback check. Returns the number of
    /// events marked APPLIED.
    pub async fn run_pass(&self) -> usize {
        let topology = self.topology.snapshot();
        let endpoints = self.topology.endpoints();
        let active = endpoints.get(topology.active());

        let mut applied = self.drain_batch(active, None).await;
        if !topology.is_degraded() {
            let standby = endpoints.get(topology.replica_target());
            applied += self.drain_batch(standby, Some(active.name())).await;
        }
        self.try_reinstate_primary().await;
        applied
    }

    /// Replay PENDING rows from the queue on `source`, optionally only
    /// those bound for `target_db`.
    async fn drain_batch(&self, source: &Endpoint, target_db: Option<&str>) -> usize {
        let mut queue_session = match self.connector.open(source).await {
            Ok(session) => session,
            Err(e) => {
                self.queue_unavailable(source.name(), &e);
                return 0;
            }
        };
        let rows = match queue::fetch_batch(
            queue_session.as_mut(),
            self.settings.batch_size,
            target_db,
        )
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                self.queue_unavailable(source.name(), &e);
                return 0;
            }
        };

        let mut applied = 0;
        for row in &rows {
            if let Err(e) = self.apply_one(row).await {
                self.metrics.increment_replication_failures();
                log_event_with_fields(
                    Event::ReplicationApplyFailed,
                    &[
                        ("error", &e.to_string()),
                        ("event_id", &row.id.to_string()),
                        ("operation", &row.operation_type),
                        ("target_db", &row.target_db),
                    ],
                );
                break;
            }
            // Replayed but not marked: replayed again next pass.
            if let Err(e) = queue_session.mark_applied(row.id).await {
                self.metrics.increment_replication_failures();
                self.queue_unavailable(source.name(), &e);
                break;
            }
            applied += 1;
        }

        if applied > 0 {
            self.metrics.add_events_applied(applied as u64);
            log_event_with_fields(
                Event::ReplicationBatchApplied,
                &[
                    ("applied", &applied.to_string()),
                    ("fetched", &rows.len().to_string()),
                    ("source", source.name()),
                ],
            );
        }
        applied
    }

    /// Replay one row on its destination. A row whose `target_db` names
    /// neither endpoint counts as applied.
    async fn apply_one(&self, row: &QueuedEvent) -> StorageResult<()> {
        let endpoints = self.topology.endpoints();
        let Some(role) = endpoints.resolve(&row.target_db) else {
            log_event_with_fields(
                Event::ReplicationTargetUnknown,
                &[
                    ("event_id", &row.id.to_string()),
                    ("target_db", &row.target_db),
                ],
            );
            return Ok(());
        };

        let event = ReplicationEvent::decode(row)?;
        let destination = endpoints.get(role);
        let apply_error = |e: StorageError| {
            StorageError::replication_apply(format!(
                "event {} on {}: {}",
                event.id,
                destination.name(),
                e.message
            ))
        };

        let mut session = self.connector.open(destination).await.map_err(apply_error)?;
        session.begin().await.map_err(apply_error)?;
        match event.replay().apply(session.as_mut(), None).await {
            Ok(Outcome::Completed(_)) => {
                session.commit().await.map_err(apply_error)?;
                Ok(())
            }
            Ok(Outcome::Rejected(rejection)) => {
                let _ = session.rollback().await;
                Err(StorageError::replication_apply(format!(
                    "event {} rejected on {}: {}",
                    event.id,
                    destination.name(),
                    rejection
                )))
            }
            Err(e) => {
                let _ = session.rollback().await;
                Err(apply_error(e))
            }
        }
    }

    /// Flip back to the primary when degraded and its backlog is empty.
    ///
    /// The meta row is written on the primary first; if that fails the
    /// topology is left untouched. Returns true when failback happened.
    pub async fn try_reinstate_primary(&self) -> bool {
        let topology = self.topology.snapshot();
        if !topology.is_degraded() || topology.replica_target() != EndpointRole::Primary {
            return false;
        }

        let endpoints = self.topology.endpoints();
        let active = endpoints.get(topology.active());
        let primary = endpoints.primary();

        let pending = match self.pending_for(active, primary.name()).await {
            Ok(pending) => pending,
            Err(e) => {
                self.queue_unavailable(active.name(), &e);
                return false;
            }
        };
        if pending > 0 {
            return false;
        }

        let restored = Topology::initial();
        if let Err(e) = persist_topology(self.connector.as_ref(), &self.topology, restored).await {
            log_event_with_fields(
                Event::FailbackFailed,
                &[("endpoint", primary.name()), ("error", &e.to_string())],
            );
            return false;
        }

        if !self.topology.reinstate_primary() {
            return false;
        }
        self.metrics.increment_failbacks();
        log_event_with_fields(
            Event::FailbackComplete,
            &[
                ("active", primary.name()),
                ("replica", endpoints.secondary().name()),
            ],
        );
        true
    }

    async fn pending_for(&self, queue_on: &Endpoint, target_db: &str) -> StorageResult<i64> {
        let mut session = self.connector.open(queue_on).await?;
        session.pending_count(Some(target_db)).await
    }

    fn queue_unavailable(&self, endpoint: &str, error: &StorageError) {
        log_event_with_fields(
            Event::ReplicationQueueUnavailable,
            &[("endpoint", endpoint), ("error", &error.to_string())],
        );
    }

    /// Run passes until `shutdown` turns true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let batch_size = self.settings.batch_size.to_string();
        let poll_ms = self.settings.poll_interval.as_millis().to_string();
        log_event_with_fields(
            Event::WorkerStart,
            &[("batch_size", &batch_size), ("poll_interval_ms", &poll_ms)],
        );

        loop {
            let stopping = *shutdown.borrow();
            if stopping {
                break;
            }
            let applied = self.run_pass().await;
            let delay = self.next_delay(applied);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        log_event_with_fields(Event::WorkerStop, &[]);
    }

    /// Move the worker onto its own task.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown, receiver) = watch::channel(false);
        let join = tokio::spawn(async move { self.run(receiver).await });
        WorkerHandle { shutdown, join }
    }
}

/// Owner of a spawned worker task.
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal stop and wait for the in-flight pass to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::replication::EventState;
    use crate::store::{MemoryConnector, MemoryDatabase, Session};
    use crate::topology::Endpoints;
    use serde_json::json;

    fn worker(
        primary: &Arc<MemoryDatabase>,
        secondary: &Arc<MemoryDatabase>,
        topology: Topology,
        poll_ms: u64,
    ) -> ReplicationWorker {
        let connector = MemoryConnector::new([Arc::clone(primary), Arc::clone(secondary)]);
        worker_on(Arc::new(connector), topology, poll_ms)
    }

    fn worker_on(
        connector: Arc<dyn Connector>,
        topology: Topology,
        poll_ms: u64,
    ) -> ReplicationWorker {
        let endpoints = Endpoints::new(
            Endpoint::new("library", "memory://library", "", ""),
            Endpoint::new("librarybackup", "memory://librarybackup", "", ""),
        );
        ReplicationWorker::new(
            Arc::new(TopologyState::with_topology(endpoints, topology)),
            connector,
            Arc::new(MetricsRegistry::new()),
            WorkerSettings {
                poll_interval: Duration::from_millis(poll_ms),
                batch_size: 25,
            },
        )
    }

    fn databases() -> (Arc<MemoryDatabase>, Arc<MemoryDatabase>) {
        (
            MemoryDatabase::new("library"),
            MemoryDatabase::new("librarybackup"),
        )
    }

    #[test]
    fn test_next_delay() {
        let (primary, secondary) = databases();
        let w = worker(&primary, &secondary, Topology::initial(), 2000);
        assert_eq!(w.next_delay(0), Duration::from_millis(2000));
        assert_eq!(w.next_delay(3), Duration::from_millis(1000));

        let fast = worker(&primary, &secondary, Topology::initial(), 300);
        assert_eq!(fast.next_delay(1), MIN_BUSY_DELAY);
        assert_eq!(fast.next_delay(0), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_pass_replays_without_requeueing() {
        let (primary, secondary) = databases();
        secondary.add_book("ISBN1", 2, 2).await;
        primary
            .enqueue_raw(
                "PRESTAMO",
                "ISBN1",
                json!({"sede": "SEDE2", "usuarioId": 9, "prestamoId": 1, "fechaFin": "2024-05-01"}),
                "librarybackup",
            )
            .await;

        let w = worker(&primary, &secondary, Topology::initial(), 2000);
        assert_eq!(w.run_pass().await, 1);

        assert_eq!(secondary.book("ISBN1").await.unwrap().copies_available, 1);
        assert_eq!(secondary.loans("ISBN1").await[0].user_id, 9);
        assert!(secondary.queue().await.is_empty());
        assert_eq!(primary.queue().await[0].state, EventState::Applied);
        assert!(primary.queue().await[0].applied_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_target_is_skipped() {
        let (primary, secondary) = databases();
        primary
            .enqueue_raw("DEVOLVER", "ISBN1", json!({"prestamoId": 1}), "archive")
            .await;

        let w = worker(&primary, &secondary, Topology::initial(), 2000);
        assert_eq!(w.run_pass().await, 1);
        assert_eq!(primary.queue().await[0].state, EventState::Applied);
    }

    #[tokio::test]
    async fn test_failback_waits_for_empty_backlog() {
        let (primary, secondary) = databases();
        let degraded = Topology::with_active(EndpointRole::Secondary);
        let w = worker(&primary, &secondary, degraded, 2000);

        // Backlog for the primary that cannot apply (book missing there).
        secondary
            .enqueue_raw("DEVOLVER", "ISBN1", json!({"prestamoId": 1}), "library")
            .await;
        assert_eq!(w.run_pass().await, 0);
        assert!(w.topology.is_degraded());

        primary.add_book("ISBN1", 0, 2).await;
        secondary
            .enqueue_raw("PRESTAMO", "ISBN1", json!({"prestamoId": 1, "fechaFin": "2024-05-01"}), "library")
            .await;
        // Still blocked: the head event has no open loan on the primary.
        assert_eq!(w.run_pass().await, 0);
        assert!(w.topology.is_degraded());
    }

    #[tokio::test]
    async fn test_failback_when_backlog_drained() {
        let (primary, secondary) = databases();
        primary.add_book("ISBN1", 1, 2).await;
        secondary
            .enqueue_raw(
                "PRESTAMO",
                "ISBN1",
                json!({"sede": "SEDE1", "usuarioId": 1, "prestamoId": 1, "fechaFin": "2024-05-01"}),
                "library",
            )
            .await;

        let degraded = Topology::with_active(EndpointRole::Secondary);
        let w = worker(&primary, &secondary, degraded, 2000);
        assert_eq!(w.run_pass().await, 1);

        assert!(!w.topology.is_degraded());
        assert_eq!(w.topology.active_endpoint().name(), "library");
        assert_eq!(primary.book("ISBN1").await.unwrap().copies_available, 0);
        let meta = primary.meta().await.unwrap();
        assert_eq!(meta.active_db, "library");
        assert!(!meta.degraded);
        assert_eq!(w.metrics.snapshot().failbacks, 1);
    }

    #[tokio::test]
    async fn test_failback_counts_backlog_case_insensitively() {
        let (primary, secondary) = databases();
        // Routed to the primary by name, but cannot apply there yet.
        secondary
            .enqueue_raw("DEVOLVER", "ISBN1", json!({"prestamoId": 1}), "LIBRARY")
            .await;

        let degraded = Topology::with_active(EndpointRole::Secondary);
        let w = worker(&primary, &secondary, degraded, 2000);
        assert_eq!(w.run_pass().await, 0);
        assert!(w.topology.is_degraded());
        assert_eq!(w.metrics.snapshot().failbacks, 0);
    }

    /// Enqueues a loan for the primary on the secondary the first time the
    /// primary is opened, i.e. between the backlog check and the flip.
    struct CommitDuringFailback {
        inner: MemoryConnector,
        secondary: Arc<MemoryDatabase>,
        armed: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Connector for CommitDuringFailback {
        async fn open(&self, endpoint: &Endpoint) -> StorageResult<Box<dyn Session>> {
            if endpoint.name() == "library" && self.armed.swap(false, Ordering::SeqCst) {
                self.secondary
                    .enqueue_raw(
                        "PRESTAMO",
                        "ISBN1",
                        json!({"sede": "SEDE1", "usuarioId": 4, "prestamoId": 1, "fechaFin": "2024-05-01"}),
                        "library",
                    )
                    .await;
            }
            self.inner.open(endpoint).await
        }
    }

    #[tokio::test]
    async fn test_commit_during_failback_reaches_primary() {
        let (primary, secondary) = databases();
        primary.add_book("ISBN1", 2, 2).await;
        let connector = CommitDuringFailback {
            inner: MemoryConnector::new([Arc::clone(&primary), Arc::clone(&secondary)]),
            secondary: Arc::clone(&secondary),
            armed: AtomicBool::new(true),
        };
        let degraded = Topology::with_active(EndpointRole::Secondary);
        let w = worker_on(Arc::new(connector), degraded, 2000);

        assert_eq!(w.run_pass().await, 0);
        assert!(!w.topology.is_degraded());
        assert_eq!(secondary.queue().await[0].state, EventState::Pending);

        // Healthy again: the straggler on the secondary is replayed.
        assert_eq!(w.run_pass().await, 1);
        assert_eq!(secondary.queue().await[0].state, EventState::Applied);
        assert_eq!(primary.book("ISBN1").await.unwrap().copies_available, 1);
        assert_eq!(primary.loans("ISBN1").await[0].user_id, 4);
        assert!(primary.queue().await.is_empty());
    }

    #[tokio::test]
    async fn test_failback_aborted_when_primary_unreachable() {
        let (primary, secondary) = databases();
        primary.set_online(false);

        let degraded = Topology::with_active(EndpointRole::Secondary);
        let w = worker(&primary, &secondary, degraded, 2000);
        assert!(!w.try_reinstate_primary().await);
        assert!(w.topology.is_degraded());
    }

    #[tokio::test]
    async fn test_spawned_worker_stops() {
        let (primary, secondary) = databases();
        let handle = worker(&primary, &secondary, Topology::initial(), 10_000).spawn();
        tokio::time::timeout(Duration::from_secs(5), handle.stop())
            .await
            .unwrap();
    }
}
