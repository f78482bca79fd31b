//! Replication Subsystem
//!
//! Asynchronous, at-least-once propagation of applied mutations to the
//! endpoint that is not serving traffic.
//!
//! - Events are created on the active endpoint only, in the same
//!   transaction as the mutation they describe
//! - Replays never create events
//! - Events are applied in id order; a pass halts at the first failure
//! - Events are never deleted; PENDING -> APPLIED happens once
//!
//! Replication is best-effort: the standby may lag arbitrarily and
//! failback only checks that nothing is PENDING for the primary, not that
//! both endpoints hold equivalent data.

mod event;
pub mod queue;
mod worker;

pub use event::{
    EventState, LoanPayload, OperationType, RenewalPayload, ReplicationEvent,
    ReplicationPayload, ReturnPayload, DEFAULT_SITE,
};
pub use worker::{ReplicationWorker, WorkerHandle, WorkerSettings, MIN_BUSY_DELAY};
