//! Routing topology
//!
//! `TopologyState` is the single process-wide authority for which endpoint
//! serves live traffic. It is owned by the failover executor and shared by
//! reference with the replication worker and the status reporter.
//!
//! Invariants:
//! - `active != replica_target`, and together they are exactly the two
//!   configured endpoints. This holds structurally: only the active role is
//!   stored and the replica target is always its peer.
//! - `degraded` is true iff the secondary is active.
//! - Reads and swaps are serialized by one mutex, so concurrent failed
//!   requests against the same endpoint produce exactly one swap.

use parking_lot::Mutex;

use super::endpoint::{Endpoint, EndpointRole, Endpoints};

/// Immutable view of the routing topology at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    active: EndpointRole,
    degraded: bool,
}

impl Default for Topology {
    fn default() -> Self {
        Self::initial()
    }
}

impl Topology {
    /// Boot topology: primary active, secondary as replica target.
    pub fn initial() -> Self {
        Self::with_active(EndpointRole::Primary)
    }

    /// Topology routing live traffic to `active`.
    pub fn with_active(active: EndpointRole) -> Self {
        Self {
            active,
            degraded: active == EndpointRole::Secondary,
        }
    }

    pub fn active(&self) -> EndpointRole {
        self.active
    }

    pub fn replica_target(&self) -> EndpointRole {
        self.active.peer()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    fn swapped(self) -> Self {
        Self::with_active(self.active.peer())
    }
}

/// Shared, mutable routing state.
#[derive(Debug)]
pub struct TopologyState {
    endpoints: Endpoints,
    current: Mutex<Topology>,
}

impl TopologyState {
    /// Create with the boot topology (primary active).
    pub fn new(endpoints: Endpoints) -> Self {
        Self::with_topology(endpoints, Topology::initial())
    }

    /// Create with an explicit topology, e.g. one restored from meta.
    pub fn with_topology(endpoints: Endpoints, topology: Topology) -> Self {
        Self {
            endpoints,
            current: Mutex::new(topology),
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Current topology.
    pub fn snapshot(&self) -> Topology {
        *self.current.lock()
    }

    /// Endpoint currently serving live reads and writes.
    pub fn active_endpoint(&self) -> &Endpoint {
        let role = self.current.lock().active();
        self.endpoints.get(role)
    }

    /// Endpoint currently receiving queued replication events.
    pub fn replica_target(&self) -> &Endpoint {
        let role = self.current.lock().replica_target();
        self.endpoints.get(role)
    }

    pub fn is_degraded(&self) -> bool {
        self.current.lock().is_degraded()
    }

    /// Unconditionally exchange active and replica target.
    ///
    /// Returns `(new_active, new_replica)`. Persisting the change is the
    /// caller's job.
    pub fn swap(&self) -> (&Endpoint, &Endpoint) {
        let mut current = self.current.lock();
        *current = current.swapped();
        self.pair(*current)
    }

    /// Exchange active and replica target only if `failed` is still active.
    ///
    /// Returns `None` when another caller already swapped away from
    /// `failed`; the caller should then retry against the current active
    /// endpoint without swapping again.
    pub fn swap_if_active(&self, failed: EndpointRole) -> Option<(&Endpoint, &Endpoint)> {
        let mut current = self.current.lock();
        if current.active() != failed {
            return None;
        }
        *current = current.swapped();
        Some(self.pair(*current))
    }

    /// Route traffic back to the primary after its backlog drained.
    ///
    /// Returns false when the topology was not degraded any more (nothing
    /// to reinstate).
    pub fn reinstate_primary(&self) -> bool {
        let mut current = self.current.lock();
        if !current.is_degraded() {
            return false;
        }
        *current = Topology::initial();
        true
    }

    fn pair(&self, topology: Topology) -> (&Endpoint, &Endpoint) {
        (
            self.endpoints.get(topology.active()),
            self.endpoints.get(topology.replica_target()),
        )
    }
}
