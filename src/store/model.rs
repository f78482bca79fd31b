//! Row shapes exchanged with a [`Session`](super::Session)

use chrono::NaiveDate;
use serde_json::Value;

use crate::replication::OperationType;

/// The columns of a `libros` row the business operations need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookRow {
    pub id: i64,
    pub copies_available: i32,
    pub renewals_allowed: i32,
}

/// Oldest OPEN loan of a book, joined with the book's renewal limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenLoan {
    pub id: i64,
    pub book_id: i64,
    pub renewals_used: i32,
    pub renewals_allowed: i32,
}

/// Loan to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLoan {
    pub book_id: i64,
    pub user_id: i32,
    pub site: String,
    pub start_date: NaiveDate,
    pub due_date: NaiveDate,
}

/// Loan lifecycle. Persisted with the legacy Spanish labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanStatus {
    Open,
    Closed,
}

impl LoanStatus {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Open => "ABIERTO",
            Self::Closed => "CERRADO",
        }
    }
}

/// Replication event to append, always inside the mutation's transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub operation_type: OperationType,
    pub book_code: String,
    pub payload: Value,
    pub target_db: String,
}

/// A PENDING queue row as read back, before payload decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    pub id: i64,
    pub operation_type: String,
    pub book_code: String,
    pub payload: Value,
    pub target_db: String,
}

/// Depth and age of the PENDING backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub pending: i64,
    /// Seconds since the oldest PENDING row was created; 0 when empty.
    pub lag_seconds: i64,
}
