//! Failover
//!
//! # Principles
//!
//! 1. The in-memory topology is authoritative for routing
//! 2. One failure against one endpoint produces at most one swap
//! 3. One request gets at most one retry, never a second failover
//! 4. Degraded mode is a signal, not an error

mod executor;

pub use executor::{persist_topology, FailoverExecutor};
