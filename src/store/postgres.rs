//! PostgreSQL sessions
//!
//! Each session owns one `tokio_postgres::Client`. Transactions are driven
//! with explicit `BEGIN` / `COMMIT` / `ROLLBACK` so a session can be boxed
//! behind the [`Session`] trait without borrowing from a transaction guard.
//!
//! Integer parameters are cast explicitly (`$n::bigint`) and integer columns
//! are cast on the way out, so the statements work against both the
//! `BIGSERIAL` schema installed by `init` and legacy `SERIAL` tables.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_postgres::types::FromSql;
use tokio_postgres::{Client, NoTls, Row};

use super::errors::{StorageError, StorageResult};
use super::model::{BookRow, LoanStatus, NewEvent, NewLoan, OpenLoan, QueueStats, QueuedEvent};
use super::schema::SCHEMA_DDL;
use super::session::{Connector, Session};
use crate::observability::{log_event_with_fields, Event};
use crate::replication::EventState;
use crate::topology::{Endpoint, Endpoints, TopologyMeta};

/// Connection limits shared by both endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Concurrently open sessions per endpoint.
    pub max_connections: usize,
    /// Bound on waiting for a pool slot and on the TCP/auth handshake.
    pub connect_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            connect_timeout: Duration::from_millis(5000),
        }
    }
}

/// Opens PostgreSQL sessions, at most `max_connections` per endpoint.
pub struct PgConnector {
    slots: HashMap<String, Arc<Semaphore>>,
    settings: PoolSettings,
}

impl PgConnector {
    pub fn new(endpoints: &Endpoints, settings: PoolSettings) -> Self {
        let slots = [endpoints.primary(), endpoints.secondary()]
            .into_iter()
            .map(|endpoint| {
                (
                    endpoint.name().to_string(),
                    Arc::new(Semaphore::new(settings.max_connections)),
                )
            })
            .collect();
        Self { slots, settings }
    }

    async fn acquire_slot(&self, endpoint: &Endpoint) -> StorageResult<OwnedSemaphorePermit> {
        let slots = self.slots.get(endpoint.name()).ok_or_else(|| {
            StorageError::configuration(format!("no pool for endpoint {}", endpoint))
        })?;

        match tokio::time::timeout(
            self.settings.connect_timeout,
            Arc::clone(slots).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(StorageError::connection(format!(
                "pool for {} is closed",
                endpoint
            ))),
            Err(_) => Err(StorageError::connection(format!(
                "timed out waiting for a connection to {}",
                endpoint
            ))),
        }
    }
}

/// Build driver configuration, accepting legacy `jdbc:` URLs.
pub fn driver_config(
    endpoint: &Endpoint,
    connect_timeout: Duration,
) -> StorageResult<tokio_postgres::Config> {
    let url = endpoint.url().strip_prefix("jdbc:").unwrap_or(endpoint.url());
    let mut config: tokio_postgres::Config = url.parse().map_err(|e| {
        StorageError::configuration(format!("invalid url for {}: {}", endpoint.name(), e))
    })?;

    if !endpoint.user().is_empty() {
        config.user(endpoint.user());
    }
    if !endpoint.password().is_empty() {
        config.password(endpoint.password());
    }
    config.connect_timeout(connect_timeout);

    Ok(config)
}

#[async_trait]
impl Connector for PgConnector {
    async fn open(&self, endpoint: &Endpoint) -> StorageResult<Box<dyn Session>> {
        let permit = self.acquire_slot(endpoint).await?;
        let config = driver_config(endpoint, self.settings.connect_timeout)?;
        let (client, connection) = config.connect(NoTls).await?;

        let name = endpoint.name().to_string();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                log_event_with_fields(
                    Event::ConnectionDriverError,
                    &[("endpoint", name.as_str()), ("error", &e.to_string())],
                );
            }
        });

        Ok(Box::new(PgSession {
            client,
            _permit: permit,
        }))
    }
}

/// One PostgreSQL connection holding a pool slot until dropped.
pub struct PgSession {
    client: Client,
    _permit: OwnedSemaphorePermit,
}

fn column<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> StorageResult<T> {
    row.try_get(idx)
        .map_err(|e| StorageError::query(format!("column {}: {}", idx, e)))
}

fn book_row(row: &Row) -> StorageResult<BookRow> {
    Ok(BookRow {
        id: column(row, 0)?,
        copies_available: column(row, 1)?,
        renewals_allowed: column(row, 2)?,
    })
}

#[async_trait]
impl Session for PgSession {
    async fn begin(&mut self) -> StorageResult<()> {
        self.client.batch_execute("BEGIN").await?;
        Ok(())
    }

    async fn commit(&mut self) -> StorageResult<()> {
        self.client.batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> StorageResult<()> {
        self.client.batch_execute("ROLLBACK").await?;
        Ok(())
    }

    async fn ensure_schema(&mut self) -> StorageResult<()> {
        self.client.batch_execute(SCHEMA_DDL).await?;
        Ok(())
    }

    async fn lock_book(&mut self, code: &str) -> StorageResult<Option<BookRow>> {
        let row = self
            .client
            .query_opt(
                "SELECT id::bigint, ejemplares_disponibles::int, renovaciones_permitidas::int \
                 FROM libros WHERE codigo = $1 FOR UPDATE",
                &[&code],
            )
            .await?;
        row.as_ref().map(book_row).transpose()
    }

    async fn find_book(&mut self, code: &str) -> StorageResult<Option<BookRow>> {
        let row = self
            .client
            .query_opt(
                "SELECT id::bigint, ejemplares_disponibles::int, renovaciones_permitidas::int \
                 FROM libros WHERE codigo = $1",
                &[&code],
            )
            .await?;
        row.as_ref().map(book_row).transpose()
    }

    async fn adjust_copies(&mut self, book_id: i64, delta: i32, site: &str) -> StorageResult<()> {
        self.client
            .execute(
                "UPDATE libros SET ejemplares_disponibles = ejemplares_disponibles + $1::int, \
                 actualizado_en = NOW(), sede = $2 WHERE id = $3::bigint",
                &[&delta, &site, &book_id],
            )
            .await?;
        Ok(())
    }

    async fn touch_book(&mut self, book_id: i64, site: &str) -> StorageResult<()> {
        self.client
            .execute(
                "UPDATE libros SET actualizado_en = NOW(), sede = $1 WHERE id = $2::bigint",
                &[&site, &book_id],
            )
            .await?;
        Ok(())
    }

    async fn insert_loan(&mut self, loan: &NewLoan) -> StorageResult<i64> {
        let row = self
            .client
            .query_one(
                "INSERT INTO prestamos (libro_id, usuario_id, sede, fecha_inicio, fecha_fin, estado) \
                 VALUES ($1::bigint, $2::int, $3, $4::date, $5::date, $6) RETURNING id::bigint",
                &[
                    &loan.book_id,
                    &loan.user_id,
                    &loan.site,
                    &loan.start_date,
                    &loan.due_date,
                    &LoanStatus::Open.as_sql(),
                ],
            )
            .await?;
        column(&row, 0)
    }

    async fn lock_open_loan(&mut self, code: &str) -> StorageResult<Option<OpenLoan>> {
        let row = self
            .client
            .query_opt(
                "SELECT p.id::bigint, p.libro_id::bigint, p.renovaciones::int, \
                 l.renovaciones_permitidas::int \
                 FROM prestamos p INNER JOIN libros l ON l.id = p.libro_id \
                 WHERE l.codigo = $1 AND p.estado = $2 \
                 ORDER BY p.fecha_inicio, p.id LIMIT 1 FOR UPDATE",
                &[&code, &LoanStatus::Open.as_sql()],
            )
            .await?;

        match row {
            Some(row) => Ok(Some(OpenLoan {
                id: column(&row, 0)?,
                book_id: column(&row, 1)?,
                renewals_used: column(&row, 2)?,
                renewals_allowed: column(&row, 3)?,
            })),
            None => Ok(None),
        }
    }

    async fn close_loan(&mut self, loan_id: i64, closed_on: NaiveDate) -> StorageResult<()> {
        self.client
            .execute(
                "UPDATE prestamos SET estado = $1, fecha_fin = $2::date WHERE id = $3::bigint",
                &[&LoanStatus::Closed.as_sql(), &closed_on, &loan_id],
            )
            .await?;
        Ok(())
    }

    async fn extend_loan(&mut self, loan_id: i64, days: i32) -> StorageResult<()> {
        self.client
            .execute(
                "UPDATE prestamos SET renovaciones = renovaciones + 1, \
                 fecha_fin = fecha_fin + $1::int WHERE id = $2::bigint",
                &[&days, &loan_id],
            )
            .await?;
        Ok(())
    }

    async fn enqueue_event(&mut self, event: &NewEvent) -> StorageResult<i64> {
        let row = self
            .client
            .query_one(
                "INSERT INTO replication_queue (operation_type, libro_codigo, payload, target_db, estado) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING id::bigint",
                &[
                    &event.operation_type.as_str(),
                    &event.book_code,
                    &event.payload,
                    &event.target_db,
                    &EventState::Pending.as_sql(),
                ],
            )
            .await?;
        column(&row, 0)
    }

    async fn pending_events(
        &mut self,
        limit: usize,
        target_db: Option<&str>,
    ) -> StorageResult<Vec<QueuedEvent>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .client
            .query(
                "SELECT id::bigint, operation_type, libro_codigo, payload, target_db \
                 FROM replication_queue \
                 WHERE estado = $1 AND ($3::text IS NULL OR lower(target_db) = lower($3::text)) \
                 ORDER BY id LIMIT $2::bigint",
                &[&EventState::Pending.as_sql(), &limit, &target_db],
            )
            .await?;

        rows.iter()
            .map(|row| {
                Ok(QueuedEvent {
                    id: column(row, 0)?,
                    operation_type: column(row, 1)?,
                    book_code: column(row, 2)?,
                    payload: column(row, 3)?,
                    target_db: column(row, 4)?,
                })
            })
            .collect()
    }

    async fn mark_applied(&mut self, event_id: i64) -> StorageResult<()> {
        self.client
            .execute(
                "UPDATE replication_queue SET estado = $1, applied_at = NOW() \
                 WHERE id = $2::bigint AND estado = $3",
                &[
                    &EventState::Applied.as_sql(),
                    &event_id,
                    &EventState::Pending.as_sql(),
                ],
            )
            .await?;
        Ok(())
    }

    async fn pending_count(&mut self, target_db: Option<&str>) -> StorageResult<i64> {
        let row = match target_db {
            Some(target) => {
                self.client
                    .query_one(
                        "SELECT COUNT(*) FROM replication_queue \
                         WHERE estado = $1 AND lower(target_db) = lower($2)",
                        &[&EventState::Pending.as_sql(), &target],
                    )
                    .await?
            }
            None => {
                self.client
                    .query_one(
                        "SELECT COUNT(*) FROM replication_queue WHERE estado = $1",
                        &[&EventState::Pending.as_sql()],
                    )
                    .await?
            }
        };
        column(&row, 0)
    }

    async fn queue_stats(&mut self) -> StorageResult<QueueStats> {
        let row = self
            .client
            .query_one(
                "SELECT COUNT(*), \
                 COALESCE(EXTRACT(EPOCH FROM (NOW() - MIN(created_at))), 0)::float8 \
                 FROM replication_queue WHERE estado = $1",
                &[&EventState::Pending.as_sql()],
            )
            .await?;

        let pending: i64 = column(&row, 0)?;
        let lag: f64 = column(&row, 1)?;
        Ok(QueueStats {
            pending,
            lag_seconds: lag.round() as i64,
        })
    }

    async fn upsert_meta(&mut self, meta: &TopologyMeta) -> StorageResult<()> {
        self.client
            .execute(
                "INSERT INTO replication_meta (id, active_db, standby_db, degraded_mode, last_failover) \
                 VALUES (1, $1, $2, $3, $4::timestamptz) \
                 ON CONFLICT (id) DO UPDATE SET active_db = EXCLUDED.active_db, \
                 standby_db = EXCLUDED.standby_db, degraded_mode = EXCLUDED.degraded_mode, \
                 last_failover = COALESCE(EXCLUDED.last_failover, replication_meta.last_failover)",
                &[
                    &meta.active_db,
                    &meta.standby_db,
                    &meta.degraded,
                    &meta.last_failover,
                ],
            )
            .await?;
        Ok(())
    }

    async fn load_meta(&mut self) -> StorageResult<Option<TopologyMeta>> {
        let row = self
            .client
            .query_opt(
                "SELECT active_db, standby_db, degraded_mode, last_failover::timestamptz \
                 FROM replication_meta WHERE id = 1",
                &[],
            )
            .await?;

        match row {
            Some(row) => {
                let last_failover: Option<DateTime<Utc>> = column(&row, 3)?;
                Ok(Some(TopologyMeta {
                    active_db: column(&row, 0)?,
                    standby_db: column(&row, 1)?,
                    degraded: column(&row, 2)?,
                    last_failover,
                }))
            }
            None => Ok(None),
        }
    }
}
