//! Relational store access
//!
//! Everything above this module talks to a database only through
//! [`Connector`] and [`Session`]. Two implementations exist:
//!
//! - [`PgConnector`]: PostgreSQL over `tokio-postgres`, one connection per
//!   session, bounded per endpoint
//! - [`MemoryConnector`]: in-process tables with outage injection
//!
//! # Error classes
//!
//! Transport and SQL failures surface as `Connection`/`Query` errors and
//! are the only ones that trigger failover. Domain outcomes (unknown book,
//! no copies) are never errors at this layer.

mod errors;
mod memory;
mod model;
mod postgres;
mod schema;
mod session;

pub use errors::{StorageError, StorageErrorKind, StorageResult};
pub use memory::{Book, Loan, MemoryConnector, MemoryDatabase, MemorySession, QueueEntry};
pub use model::{BookRow, LoanStatus, NewEvent, NewLoan, OpenLoan, QueueStats, QueuedEvent};
pub use postgres::{driver_config, PgConnector, PgSession, PoolSettings};
pub use schema::SCHEMA_DDL;
pub use session::{Connector, Session};
