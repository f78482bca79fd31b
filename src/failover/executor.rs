//! Failover executor
//!
//! Runs every business operation against the active endpoint. A transport
//! or SQL failure swaps the topology (once, even under concurrent failures)
//! and retries the operation exactly once against the new active endpoint.

use std::sync::Arc;

use chrono::Utc;

use crate::observability::{log_event_with_fields, Event, Logger, MetricsRegistry, Severity};
use crate::operations::{Operation, Outcome};
use crate::store::{Connector, StorageError, StorageResult};
use crate::topology::{Endpoint, EndpointRole, Topology, TopologyMeta, TopologyState};

/// Write `topology` into the meta row of its active endpoint, then mirror
/// it onto the peer.
///
/// Only the write on the active endpoint is returned as an error; the peer
/// is usually the endpoint that just failed, so a failed mirror is logged
/// at WARN and otherwise ignored.
pub async fn persist_topology(
    connector: &dyn Connector,
    state: &TopologyState,
    topology: Topology,
) -> StorageResult<()> {
    let endpoints = state.endpoints();
    let meta = TopologyMeta::describe(endpoints, topology, Utc::now());

    let mut session = connector.open(endpoints.get(topology.active())).await?;
    session.upsert_meta(&meta).await?;

    let peer = endpoints.get(topology.replica_target());
    if let Err(e) = mirror_meta(connector, peer, &meta).await {
        Logger::log(
            Severity::Warn,
            Event::TopologyPersistFailed.as_str(),
            &[
                ("endpoint", peer.name()),
                ("error", &e.to_string()),
                ("mirror", "true"),
            ],
        );
    }
    Ok(())
}

async fn mirror_meta(
    connector: &dyn Connector,
    peer: &Endpoint,
    meta: &TopologyMeta,
) -> StorageResult<()> {
    let mut session = connector.open(peer).await?;
    session.upsert_meta(meta).await
}

pub struct FailoverExecutor {
    topology: Arc<TopologyState>,
    connector: Arc<dyn Connector>,
    metrics: Arc<MetricsRegistry>,
}

impl FailoverExecutor {
    pub fn new(
        topology: Arc<TopologyState>,
        connector: Arc<dyn Connector>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            topology,
            connector,
            metrics,
        }
    }

    pub fn topology(&self) -> &Arc<TopologyState> {
        &self.topology
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Execute `op` with at most one failover and one retry.
    ///
    /// Errors that do not trigger failover (payload encoding) are returned
    /// as they are. A failed retry is returned as a `Fatal` error.
    pub async fn execute(&self, op: &Operation) -> StorageResult<Outcome> {
        let attempted = self.topology.snapshot().active();

        let first = match self.run_on(attempted, op).await {
            Ok(outcome) => return Ok(self.record(op, outcome)),
            Err(e) if !e.triggers_failover() => return Err(e),
            Err(e) => e,
        };

        let retry_on = self.fail_over(attempted, &first).await;

        match self.run_on(retry_on, op).await {
            Ok(outcome) => Ok(self.record(op, outcome)),
            Err(second) => Err(StorageError::fatal(format!(
                "{} failed on {} ({}) and on {} after failover ({})",
                op.name(),
                self.topology.endpoints().get(attempted).name(),
                first.message,
                self.topology.endpoints().get(retry_on).name(),
                second.message
            ))),
        }
    }

    /// One transaction on `role`. Events are queued for its peer.
    async fn run_on(&self, role: EndpointRole, op: &Operation) -> StorageResult<Outcome> {
        let endpoints = self.topology.endpoints();
        let replica = endpoints.get(role.peer()).name();

        let mut session = self.connector.open(endpoints.get(role)).await?;
        session.begin().await?;
        match op.apply(session.as_mut(), Some(replica)).await {
            Ok(outcome) => {
                session.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                let _ = session.rollback().await;
                Err(e)
            }
        }
    }

    /// Swap away from `failed` if nobody did yet. Returns the role to
    /// retry on.
    async fn fail_over(&self, failed: EndpointRole, cause: &StorageError) -> EndpointRole {
        let failed_name = self.topology.endpoints().get(failed).name();
        log_event_with_fields(
            Event::FailoverStart,
            &[("endpoint", failed_name), ("error", &cause.to_string())],
        );

        let Some((active, replica)) = self.topology.swap_if_active(failed) else {
            let current = self.topology.snapshot().active();
            log_event_with_fields(
                Event::FailoverSkipped,
                &[
                    ("active", self.topology.endpoints().get(current).name()),
                    ("endpoint", failed_name),
                ],
            );
            return current;
        };

        self.metrics.increment_failovers();
        let swapped = Topology::with_active(failed.peer());
        let degraded = swapped.is_degraded().to_string();
        log_event_with_fields(
            Event::FailoverComplete,
            &[
                ("active", active.name()),
                ("degraded", &degraded),
                ("replica", replica.name()),
            ],
        );

        if let Err(e) = persist_topology(self.connector.as_ref(), &self.topology, swapped).await {
            log_event_with_fields(
                Event::TopologyPersistFailed,
                &[("endpoint", active.name()), ("error", &e.to_string())],
            );
        }

        swapped.active()
    }

    fn record(&self, op: &Operation, outcome: Outcome) -> Outcome {
        if op.is_mutation() && outcome.is_completed() {
            self.metrics.increment_events_enqueued();
        }
        outcome
    }
}
