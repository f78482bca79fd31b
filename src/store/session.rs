//! Connector and session seams
//!
//! A [`Connector`] opens a [`Session`] on one endpoint. A session behaves
//! like a single database connection: statements auto-commit until
//! [`Session::begin`] is called, after which they accumulate until
//! [`Session::commit`] or [`Session::rollback`].
//!
//! Row-level mutual exclusion (`lock_book`, `lock_open_loan`) is the
//! database's job. No in-process lock guards book or loan rows.

use async_trait::async_trait;
use chrono::NaiveDate;

use super::errors::StorageResult;
use super::model::{BookRow, NewEvent, NewLoan, OpenLoan, QueueStats, QueuedEvent};
use crate::topology::{Endpoint, TopologyMeta};

/// Opens sessions against endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, endpoint: &Endpoint) -> StorageResult<Box<dyn Session>>;
}

/// One connection to one endpoint.
#[async_trait]
pub trait Session: Send {
    // Transaction control

    async fn begin(&mut self) -> StorageResult<()>;

    async fn commit(&mut self) -> StorageResult<()>;

    async fn rollback(&mut self) -> StorageResult<()>;

    /// Create the tables if they do not exist.
    async fn ensure_schema(&mut self) -> StorageResult<()>;

    // Books and loans

    /// Lock a book row by code for the rest of the transaction.
    async fn lock_book(&mut self, code: &str) -> StorageResult<Option<BookRow>>;

    /// Read a book row by code without locking.
    async fn find_book(&mut self, code: &str) -> StorageResult<Option<BookRow>>;

    /// Add `delta` to `copies_available` and stamp site and update time.
    async fn adjust_copies(&mut self, book_id: i64, delta: i32, site: &str) -> StorageResult<()>;

    /// Stamp site and update time without touching copies.
    async fn touch_book(&mut self, book_id: i64, site: &str) -> StorageResult<()>;

    /// Insert an OPEN loan and return its id.
    async fn insert_loan(&mut self, loan: &NewLoan) -> StorageResult<i64>;

    /// Lock the oldest OPEN loan of the book with `code`.
    async fn lock_open_loan(&mut self, code: &str) -> StorageResult<Option<OpenLoan>>;

    /// Mark a loan CLOSED, ending it on `closed_on`.
    async fn close_loan(&mut self, loan_id: i64, closed_on: NaiveDate) -> StorageResult<()>;

    /// Count one renewal and push the due date back by `days`.
    async fn extend_loan(&mut self, loan_id: i64, days: i32) -> StorageResult<()>;

    // Replication queue

    /// Append a PENDING event and return its id.
    async fn enqueue_event(&mut self, event: &NewEvent) -> StorageResult<i64>;

    /// Up to `limit` PENDING events in ascending id order, optionally only
    /// those targeting `target_db`.
    async fn pending_events(
        &mut self,
        limit: usize,
        target_db: Option<&str>,
    ) -> StorageResult<Vec<QueuedEvent>>;

    /// Transition an event PENDING -> APPLIED.
    async fn mark_applied(&mut self, event_id: i64) -> StorageResult<()>;

    /// PENDING rows, optionally only those targeting `target_db`.
    ///
    /// Target names compare case-insensitively, as endpoint names do.
    async fn pending_count(&mut self, target_db: Option<&str>) -> StorageResult<i64>;

    async fn queue_stats(&mut self) -> StorageResult<QueueStats>;

    // Topology mirror

    async fn upsert_meta(&mut self, meta: &TopologyMeta) -> StorageResult<()>;

    async fn load_meta(&mut self) -> StorageResult<Option<TopologyMeta>>;
}
