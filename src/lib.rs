//! librarium - storage tier of a distributed library-loan pipeline
//!
//! Two PostgreSQL endpoints, one active at a time. Mutations run on the
//! active endpoint and queue a replication event for the other; a
//! background worker replays the queue and reinstates the primary once it
//! has caught up.

pub mod cli;
pub mod failover;
pub mod observability;
pub mod operations;
pub mod replication;
pub mod service;
pub mod status;
pub mod store;
pub mod topology;
