//! Storage-tier error types
//!
//! Error kinds drive the failover decision:
//! - `Connection` / `Query`: transport failure, one failover + retry
//! - `Serialization`: hard failure of one operation or event, no failover
//! - `ReplicationApply`: replica refused an event, batch halts
//! - `Fatal`: the single retry after failover also failed
//!
//! Domain rejections (unknown book, no copies, ...) are not errors; see
//! [`Rejection`](crate::operations::Rejection).

use std::fmt;

/// Storage error type
#[derive(Debug, Clone)]
pub struct StorageError {
    /// Error kind
    pub kind: StorageErrorKind,
    /// Error message
    pub message: String,
}

/// Storage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// Endpoint unreachable, connection refused or lost, timeout
    Connection,

    /// Statement rejected by the database
    Query,

    /// Payload could not be encoded or decoded
    Serialization,

    /// Replica transaction for a queued event did not apply
    ReplicationApply,

    /// Request failed on the active endpoint and again after failover
    Fatal,

    /// Invalid endpoint or pool configuration
    Configuration,
}

impl StorageError {
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::Connection, message)
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::Query, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::Serialization, message)
    }

    pub fn replication_apply(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::ReplicationApply, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::Fatal, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::Configuration, message)
    }

    /// Transport-class failures switch the active endpoint.
    pub fn triggers_failover(&self) -> bool {
        matches!(
            self.kind,
            StorageErrorKind::Connection | StorageErrorKind::Query
        )
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageError({:?}): {}", self.kind, self.message)
    }
}

impl std::error::Error for StorageError {}

impl From<tokio_postgres::Error> for StorageError {
    fn from(e: tokio_postgres::Error) -> Self {
        // Server-side errors carry a SQLSTATE; everything else is the wire.
        if e.code().is_some() {
            Self::query(e.to_string())
        } else {
            Self::connection(e.to_string())
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
