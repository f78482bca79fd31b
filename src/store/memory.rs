//! In-memory store
//!
//! A [`Session`] implementation over plain collections, used by the
//! integration tests and for running the service without PostgreSQL.
//!
//! Semantics kept from the relational store:
//! - a transaction sees its own writes and publishes them atomically on
//!   commit; rollback (or dropping the session) discards them
//! - an open transaction excludes every other writer on the same database,
//!   which stands in for `SELECT ... FOR UPDATE` row locks
//! - `copies_available` has a non-negative CHECK and loans reference
//!   existing books
//!
//! Each database can be taken offline with [`MemoryDatabase::set_online`];
//! while offline, opening a session and every statement on an already open
//! session fail with a connection error. [`MemoryDatabase::fail_next_enqueue`]
//! drops the connection at one statement instead, after the mutation's
//! earlier statements already ran inside the transaction.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::errors::{StorageError, StorageResult};
use super::model::{BookRow, LoanStatus, NewEvent, NewLoan, OpenLoan, QueueStats, QueuedEvent};
use super::session::{Connector, Session};
use crate::replication::EventState;
use crate::topology::{Endpoint, TopologyMeta};

/// A `libros` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Book {
    pub id: i64,
    pub code: String,
    pub copies_available: i32,
    pub site: String,
    pub renewals_allowed: i32,
    pub updated_at: DateTime<Utc>,
}

/// A `prestamos` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loan {
    pub id: i64,
    pub book_id: i64,
    pub user_id: i32,
    pub site: String,
    pub start_date: NaiveDate,
    pub due_date: NaiveDate,
    pub renewals_used: i32,
    pub status: LoanStatus,
}

/// A `replication_queue` row.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub id: i64,
    pub operation_type: String,
    pub book_code: String,
    pub payload: Value,
    pub target_db: String,
    pub state: EventState,
    pub created_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    books: BTreeMap<i64, Book>,
    loans: BTreeMap<i64, Loan>,
    queue: BTreeMap<i64, QueueEntry>,
    meta: Option<TopologyMeta>,
    last_book_id: i64,
    last_loan_id: i64,
    last_event_id: i64,
}

impl Tables {
    fn book_by_code(&self, code: &str) -> Option<&Book> {
        self.books.values().find(|book| book.code == code)
    }

    fn book_row(&self, code: &str) -> Option<BookRow> {
        self.book_by_code(code).map(|book| BookRow {
            id: book.id,
            copies_available: book.copies_available,
            renewals_allowed: book.renewals_allowed,
        })
    }

    fn book_mut(&mut self, book_id: i64) -> StorageResult<&mut Book> {
        self.books
            .get_mut(&book_id)
            .ok_or_else(|| StorageError::query(format!("libros row {} does not exist", book_id)))
    }

    fn loan_mut(&mut self, loan_id: i64) -> StorageResult<&mut Loan> {
        self.loans
            .get_mut(&loan_id)
            .ok_or_else(|| StorageError::query(format!("prestamos row {} does not exist", loan_id)))
    }

    fn insert_book(&mut self, code: &str, copies: i32, renewals_allowed: i32) -> i64 {
        self.last_book_id += 1;
        let id = self.last_book_id;
        self.books.insert(
            id,
            Book {
                id,
                code: code.to_string(),
                copies_available: copies,
                site: "SEDE1".to_string(),
                renewals_allowed,
                updated_at: Utc::now(),
            },
        );
        id
    }

    fn adjust_copies(&mut self, book_id: i64, delta: i32, site: &str) -> StorageResult<()> {
        let book = self.book_mut(book_id)?;
        let copies = book.copies_available + delta;
        if copies < 0 {
            return Err(StorageError::query(format!(
                "check constraint violated: ejemplares_disponibles would be {}",
                copies
            )));
        }
        book.copies_available = copies;
        book.site = site.to_string();
        book.updated_at = Utc::now();
        Ok(())
    }

    fn touch_book(&mut self, book_id: i64, site: &str) -> StorageResult<()> {
        let book = self.book_mut(book_id)?;
        book.site = site.to_string();
        book.updated_at = Utc::now();
        Ok(())
    }

    fn insert_loan(&mut self, loan: &NewLoan) -> StorageResult<i64> {
        if !self.books.contains_key(&loan.book_id) {
            return Err(StorageError::query(format!(
                "foreign key violated: libros row {} does not exist",
                loan.book_id
            )));
        }
        self.last_loan_id += 1;
        let id = self.last_loan_id;
        self.loans.insert(
            id,
            Loan {
                id,
                book_id: loan.book_id,
                user_id: loan.user_id,
                site: loan.site.clone(),
                start_date: loan.start_date,
                due_date: loan.due_date,
                renewals_used: 0,
                status: LoanStatus::Open,
            },
        );
        Ok(id)
    }

    fn oldest_open_loan(&self, code: &str) -> Option<OpenLoan> {
        let book = self.book_by_code(code)?;
        self.loans
            .values()
            .filter(|loan| loan.book_id == book.id && loan.status == LoanStatus::Open)
            .min_by_key(|loan| (loan.start_date, loan.id))
            .map(|loan| OpenLoan {
                id: loan.id,
                book_id: loan.book_id,
                renewals_used: loan.renewals_used,
                renewals_allowed: book.renewals_allowed,
            })
    }

    fn enqueue(&mut self, operation_type: &str, book_code: &str, payload: Value, target_db: &str) -> i64 {
        self.last_event_id += 1;
        let id = self.last_event_id;
        self.queue.insert(
            id,
            QueueEntry {
                id,
                operation_type: operation_type.to_string(),
                book_code: book_code.to_string(),
                payload,
                target_db: target_db.to_string(),
                state: EventState::Pending,
                created_at: Utc::now(),
                applied_at: None,
            },
        );
        id
    }

    fn pending(&self) -> impl Iterator<Item = &QueueEntry> {
        self.queue
            .values()
            .filter(|entry| entry.state == EventState::Pending)
    }

    fn pending_for<'a>(
        &'a self,
        target_db: Option<&'a str>,
    ) -> impl Iterator<Item = &'a QueueEntry> {
        self.pending().filter(move |entry| {
            target_db.map_or(true, |target| entry.target_db.eq_ignore_ascii_case(target))
        })
    }
}

/// One named in-memory database.
#[derive(Debug)]
pub struct MemoryDatabase {
    name: String,
    online: AtomicBool,
    fail_enqueue: AtomicBool,
    tables: Arc<Mutex<Tables>>,
}

impl MemoryDatabase {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            online: AtomicBool::new(true),
            fail_enqueue: AtomicBool::new(false),
            tables: Arc::new(Mutex::new(Tables::default())),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Lose the connection at the next `enqueue_event` statement, once.
    pub fn fail_next_enqueue(&self) {
        self.fail_enqueue.store(true, Ordering::SeqCst);
    }

    fn check_enqueue_fault(&self) -> StorageResult<()> {
        if self.fail_enqueue.swap(false, Ordering::SeqCst) {
            return Err(StorageError::connection(format!(
                "connection to {} lost",
                self.name
            )));
        }
        Ok(())
    }

    fn check_online(&self) -> StorageResult<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(StorageError::connection(format!(
                "connection to {} refused",
                self.name
            )))
        }
    }

    /// Insert a book at site `SEDE1` and return its id.
    pub async fn add_book(&self, code: &str, copies: i32, renewals_allowed: i32) -> i64 {
        self.tables
            .lock()
            .await
            .insert_book(code, copies, renewals_allowed)
    }

    pub async fn book(&self, code: &str) -> Option<Book> {
        self.tables.lock().await.book_by_code(code).cloned()
    }

    /// All loans of a book, oldest first.
    pub async fn loans(&self, code: &str) -> Vec<Loan> {
        let tables = self.tables.lock().await;
        let Some(book_id) = tables.book_by_code(code).map(|book| book.id) else {
            return Vec::new();
        };
        tables
            .loans
            .values()
            .filter(|loan| loan.book_id == book_id)
            .cloned()
            .collect()
    }

    /// The whole replication queue in id order.
    pub async fn queue(&self) -> Vec<QueueEntry> {
        self.tables.lock().await.queue.values().cloned().collect()
    }

    pub async fn meta(&self) -> Option<TopologyMeta> {
        self.tables.lock().await.meta.clone()
    }

    /// Append a queue row bypassing the typed producer.
    pub async fn enqueue_raw(
        &self,
        operation_type: &str,
        book_code: &str,
        payload: Value,
        target_db: &str,
    ) -> i64 {
        self.tables
            .lock()
            .await
            .enqueue(operation_type, book_code, payload, target_db)
    }
}

/// Connector over a fixed set of in-memory databases, keyed by name.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    databases: HashMap<String, Arc<MemoryDatabase>>,
}

impl MemoryConnector {
    pub fn new(databases: impl IntoIterator<Item = Arc<MemoryDatabase>>) -> Self {
        Self {
            databases: databases
                .into_iter()
                .map(|db| (db.name().to_string(), db))
                .collect(),
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, endpoint: &Endpoint) -> StorageResult<Box<dyn Session>> {
        let db = self.databases.get(endpoint.name()).ok_or_else(|| {
            StorageError::connection(format!("database {} does not exist", endpoint.name()))
        })?;
        db.check_online()?;
        Ok(Box::new(MemorySession {
            db: Arc::clone(db),
            tx: None,
        }))
    }
}

struct Transaction {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

/// Session on a [`MemoryDatabase`].
pub struct MemorySession {
    db: Arc<MemoryDatabase>,
    tx: Option<Transaction>,
}

impl MemorySession {
    /// Run `f` against the transaction's working copy, or auto-commit it.
    async fn with_tables<R, F>(&mut self, f: F) -> StorageResult<R>
    where
        F: FnOnce(&mut Tables) -> StorageResult<R> + Send,
        R: Send,
    {
        self.db.check_online()?;
        match self.tx.as_mut() {
            Some(tx) => f(&mut tx.working),
            None => {
                let mut tables = self.db.tables.lock().await;
                // Auto-commit: a failed statement leaves nothing behind.
                let mut working = tables.clone();
                let result = f(&mut working)?;
                *tables = working;
                Ok(result)
            }
        }
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn begin(&mut self) -> StorageResult<()> {
        self.db.check_online()?;
        if self.tx.is_some() {
            return Err(StorageError::query("transaction already in progress"));
        }
        let guard = Arc::clone(&self.db.tables).lock_owned().await;
        let working = guard.clone();
        self.tx = Some(Transaction { guard, working });
        Ok(())
    }

    async fn commit(&mut self) -> StorageResult<()> {
        self.db.check_online()?;
        if let Some(mut tx) = self.tx.take() {
            *tx.guard = tx.working;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> StorageResult<()> {
        self.tx = None;
        Ok(())
    }

    async fn ensure_schema(&mut self) -> StorageResult<()> {
        self.db.check_online()
    }

    async fn lock_book(&mut self, code: &str) -> StorageResult<Option<BookRow>> {
        self.with_tables(|tables| Ok(tables.book_row(code))).await
    }

    async fn find_book(&mut self, code: &str) -> StorageResult<Option<BookRow>> {
        self.with_tables(|tables| Ok(tables.book_row(code))).await
    }

    async fn adjust_copies(&mut self, book_id: i64, delta: i32, site: &str) -> StorageResult<()> {
        self.with_tables(|tables| tables.adjust_copies(book_id, delta, site))
            .await
    }

    async fn touch_book(&mut self, book_id: i64, site: &str) -> StorageResult<()> {
        self.with_tables(|tables| tables.touch_book(book_id, site))
            .await
    }

    async fn insert_loan(&mut self, loan: &NewLoan) -> StorageResult<i64> {
        self.with_tables(|tables| tables.insert_loan(loan)).await
    }

    async fn lock_open_loan(&mut self, code: &str) -> StorageResult<Option<OpenLoan>> {
        self.with_tables(|tables| Ok(tables.oldest_open_loan(code)))
            .await
    }

    async fn close_loan(&mut self, loan_id: i64, closed_on: NaiveDate) -> StorageResult<()> {
        self.with_tables(|tables| {
            let loan = tables.loan_mut(loan_id)?;
            loan.status = LoanStatus::Closed;
            loan.due_date = closed_on;
            Ok(())
        })
        .await
    }

    async fn extend_loan(&mut self, loan_id: i64, days: i32) -> StorageResult<()> {
        self.with_tables(|tables| {
            let loan = tables.loan_mut(loan_id)?;
            loan.renewals_used += 1;
            loan.due_date = loan.due_date + Duration::days(i64::from(days));
            Ok(())
        })
        .await
    }

    async fn enqueue_event(&mut self, event: &NewEvent) -> StorageResult<i64> {
        self.db.check_enqueue_fault()?;
        self.with_tables(|tables| {
            Ok(tables.enqueue(
                event.operation_type.as_str(),
                &event.book_code,
                event.payload.clone(),
                &event.target_db,
            ))
        })
        .await
    }

    async fn pending_events(
        &mut self,
        limit: usize,
        target_db: Option<&str>,
    ) -> StorageResult<Vec<QueuedEvent>> {
        self.with_tables(|tables| {
            Ok(tables
                .pending_for(target_db)
                .take(limit)
                .map(|entry| QueuedEvent {
                    id: entry.id,
                    operation_type: entry.operation_type.clone(),
                    book_code: entry.book_code.clone(),
                    payload: entry.payload.clone(),
                    target_db: entry.target_db.clone(),
                })
                .collect())
        })
        .await
    }

    async fn mark_applied(&mut self, event_id: i64) -> StorageResult<()> {
        self.with_tables(|tables| {
            if let Some(entry) = tables.queue.get_mut(&event_id) {
                if entry.state == EventState::Pending {
                    entry.state = EventState::Applied;
                    entry.applied_at = Some(Utc::now());
                }
            }
            Ok(())
        })
        .await
    }

    async fn pending_count(&mut self, target_db: Option<&str>) -> StorageResult<i64> {
        self.with_tables(|tables| {
            let count = tables.pending_for(target_db).count();
            Ok(count as i64)
        })
        .await
    }

    async fn queue_stats(&mut self) -> StorageResult<QueueStats> {
        self.with_tables(|tables| {
            let pending = tables.pending().count() as i64;
            let lag_seconds = tables
                .pending()
                .map(|entry| entry.created_at)
                .min()
                .map(|oldest| {
                    let millis = (Utc::now() - oldest).num_milliseconds().max(0);
                    (millis as f64 / 1000.0).round() as i64
                })
                .unwrap_or(0);
            Ok(QueueStats {
                pending,
                lag_seconds,
            })
        })
        .await
    }

    async fn upsert_meta(&mut self, meta: &TopologyMeta) -> StorageResult<()> {
        self.with_tables(|tables| {
            let last_failover = meta
                .last_failover
                .or_else(|| tables.meta.as_ref().and_then(|m| m.last_failover));
            tables.meta = Some(TopologyMeta {
                last_failover,
                ..meta.clone()
            });
            Ok(())
        })
        .await
    }

    async fn load_meta(&mut self) -> StorageResult<Option<TopologyMeta>> {
        self.with_tables(|tables| Ok(tables.meta.clone())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::OperationType;
    use serde_json::json;

    fn endpoint(name: &str) -> Endpoint {
        Endpoint::new(name, format!("memory://{}", name), "", "")
    }

    async fn session(db: &Arc<MemoryDatabase>) -> Box<dyn Session> {
        MemoryConnector::new([Arc::clone(db)])
            .open(&endpoint(db.name()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let db = MemoryDatabase::new("library");
        let book_id = db.add_book("ISBN1", 2, 1).await;
        let mut session = session(&db).await;

        session.begin().await.unwrap();
        session.adjust_copies(book_id, -1, "SEDE2").await.unwrap();
        assert_eq!(
            session.find_book("ISBN1").await.unwrap().unwrap().copies_available,
            1
        );
        session.rollback().await.unwrap();

        assert_eq!(db.book("ISBN1").await.unwrap().copies_available, 2);
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let db = MemoryDatabase::new("library");
        let book_id = db.add_book("ISBN1", 2, 1).await;
        let mut session = session(&db).await;

        session.begin().await.unwrap();
        session.adjust_copies(book_id, -1, "SEDE2").await.unwrap();
        session.commit().await.unwrap();

        let book = db.book("ISBN1").await.unwrap();
        assert_eq!(book.copies_available, 1);
        assert_eq!(book.site, "SEDE2");
    }

    #[tokio::test]
    async fn test_copies_cannot_go_negative() {
        let db = MemoryDatabase::new("library");
        let book_id = db.add_book("ISBN1", 0, 1).await;
        let mut session = session(&db).await;

        let err = session.adjust_copies(book_id, -1, "SEDE1").await.unwrap_err();
        assert_eq!(err.kind, crate::store::StorageErrorKind::Query);
        assert_eq!(db.book("ISBN1").await.unwrap().copies_available, 0);
    }

    #[tokio::test]
    async fn test_offline_database_refuses_sessions_and_statements() {
        let db = MemoryDatabase::new("library");
        let mut open = session(&db).await;

        db.set_online(false);
        let connector = MemoryConnector::new([Arc::clone(&db)]);
        let err = connector.open(&endpoint("library")).await.err().unwrap();
        assert!(err.triggers_failover());

        let err = open.find_book("ISBN1").await.unwrap_err();
        assert!(err.triggers_failover());
    }

    #[tokio::test]
    async fn test_oldest_open_loan_wins() {
        let db = MemoryDatabase::new("library");
        let book_id = db.add_book("ISBN1", 5, 2).await;
        let mut session = session(&db).await;
        let today = Utc::now().date_naive();

        let newer = NewLoan {
            book_id,
            user_id: 1,
            site: "SEDE1".into(),
            start_date: today,
            due_date: today + Duration::days(14),
        };
        let older = NewLoan {
            start_date: today - Duration::days(3),
            ..newer.clone()
        };
        session.insert_loan(&newer).await.unwrap();
        let older_id = session.insert_loan(&older).await.unwrap();

        let open = session.lock_open_loan("ISBN1").await.unwrap().unwrap();
        assert_eq!(open.id, older_id);
        assert_eq!(open.renewals_allowed, 2);
    }

    #[tokio::test]
    async fn test_queue_counts_and_marking() {
        let db = MemoryDatabase::new("library");
        let mut session = session(&db).await;

        for target in ["librarybackup", "librarybackup", "library"] {
            session
                .enqueue_event(&NewEvent {
                    operation_type: OperationType::Return,
                    book_code: "ISBN1".into(),
                    payload: json!({"sede": "SEDE1", "prestamoId": 1}),
                    target_db: target.into(),
                })
                .await
                .unwrap();
        }

        assert_eq!(session.pending_count(None).await.unwrap(), 3);
        assert_eq!(session.pending_count(Some("library")).await.unwrap(), 1);
        assert_eq!(session.pending_count(Some("LIBRARY")).await.unwrap(), 1);

        let batch = session.pending_events(2, None).await.unwrap();
        assert_eq!(batch.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);
        let batch = session.pending_events(25, Some("Library")).await.unwrap();
        assert_eq!(batch.iter().map(|e| e.id).collect::<Vec<_>>(), vec![3]);

        session.mark_applied(1).await.unwrap();
        assert_eq!(session.queue_stats().await.unwrap().pending, 2);
        assert_eq!(db.queue().await[0].state, EventState::Applied);
    }

    #[tokio::test]
    async fn test_upsert_meta_keeps_last_failover() {
        let db = MemoryDatabase::new("library");
        let mut session = session(&db).await;
        let failed_at = Utc::now();

        session
            .upsert_meta(&TopologyMeta {
                active_db: "librarybackup".into(),
                standby_db: "library".into(),
                degraded: true,
                last_failover: Some(failed_at),
            })
            .await
            .unwrap();
        session
            .upsert_meta(&TopologyMeta {
                active_db: "library".into(),
                standby_db: "librarybackup".into(),
                degraded: false,
                last_failover: None,
            })
            .await
            .unwrap();

        let meta = db.meta().await.unwrap();
        assert_eq!(meta.active_db, "library");
        assert!(!meta.degraded);
        assert_eq!(meta.last_failover, Some(failed_at));
    }
}
