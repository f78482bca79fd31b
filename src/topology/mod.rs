//! Endpoint registry and routing topology
//!
//! - Two immutable endpoints (primary, secondary) loaded at boot
//! - One mutable routing decision: which endpoint is active
//! - The replica target is always the non-active endpoint
//! - Degraded mode means the secondary is active
//!
//! No I/O happens here. Callers persist topology changes separately via
//! [`TopologyMeta`].

mod endpoint;
mod meta;
mod state;

pub use endpoint::{Endpoint, EndpointRole, Endpoints};
pub use meta::{reconcile, TopologyMeta};
pub use state::{Topology, TopologyState};
