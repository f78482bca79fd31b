//! Persisted topology mirror
//!
//! A single upserted `replication_meta` row records the last known routing
//! decision so a restarted process can pick it up. The in-memory
//! [`TopologyState`](super::TopologyState) of a running process stays
//! authoritative; this row is written after every change and read only at
//! boot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::endpoint::Endpoints;
use super::state::Topology;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyMeta {
    pub active_db: String,
    pub standby_db: String,
    pub degraded: bool,
    /// Set when entering degraded mode. `None` on upsert keeps the stored
    /// value, so the time of the last failover survives a failback.
    pub last_failover: Option<DateTime<Utc>>,
}

impl TopologyMeta {
    /// Describe `topology` as of `at`.
    pub fn describe(endpoints: &Endpoints, topology: Topology, at: DateTime<Utc>) -> Self {
        let degraded = topology.is_degraded();
        Self {
            active_db: endpoints.get(topology.active()).name().to_string(),
            standby_db: endpoints.get(topology.replica_target()).name().to_string(),
            degraded,
            last_failover: degraded.then_some(at),
        }
    }

    /// Rebuild a topology from this row.
    ///
    /// Returns `None` when `active_db` names neither configured endpoint.
    pub fn restore(&self, endpoints: &Endpoints) -> Option<Topology> {
        endpoints.resolve(&self.active_db).map(Topology::with_active)
    }
}

/// Pick the boot topology from the rows found on each endpoint.
///
/// Rows are mirrored best-effort, so they disagree only when one endpoint
/// was down during the last change. A row routing to the secondary can
/// only come from a failover and wins; otherwise any resolvable row is
/// used. `None` when neither row resolves.
pub fn reconcile(endpoints: &Endpoints, rows: &[Option<TopologyMeta>]) -> Option<Topology> {
    let restored: Vec<Topology> = rows
        .iter()
        .flatten()
        .filter_map(|meta| meta.restore(endpoints))
        .collect();
    restored
        .iter()
        .copied()
        .find(Topology::is_degraded)
        .or_else(|| restored.first().copied())
}
