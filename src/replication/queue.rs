//! Replication queue producer and consumer
//!
//! The queue is an outbox table on each endpoint. Producers append inside
//! the mutation's own transaction; the worker consumes in id order.

use super::event::ReplicationPayload;
use crate::store::{NewEvent, QueuedEvent, Session, StorageResult};

/// Append a PENDING event for `target_db` on the session's current
/// transaction.
pub async fn enqueue(
    session: &mut dyn Session,
    target_db: &str,
    book_code: &str,
    payload: &ReplicationPayload,
) -> StorageResult<i64> {
    let event = NewEvent {
        operation_type: payload.operation_type(),
        book_code: book_code.to_string(),
        payload: payload.encode()?,
        target_db: target_db.to_string(),
    };
    session.enqueue_event(&event).await
}

/// Up to `limit` PENDING events, oldest first. With `target_db`, only the
/// events bound for that endpoint.
pub async fn fetch_batch(
    session: &mut dyn Session,
    limit: usize,
    target_db: Option<&str>,
) -> StorageResult<Vec<QueuedEvent>> {
    session.pending_events(limit, target_db).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::{EventState, ReturnPayload};
    use crate::store::{Connector, MemoryConnector, MemoryDatabase};
    use crate::topology::Endpoint;

    #[tokio::test]
    async fn test_enqueue_then_fetch_in_order() {
        let db = MemoryDatabase::new("library");
        let connector = MemoryConnector::new([db.clone()]);
        let mut session = connector
            .open(&Endpoint::new("library", "memory://library", "", ""))
            .await
            .unwrap();

        for loan_id in 1..=3 {
            let payload = ReplicationPayload::Return(ReturnPayload {
                book_code: "ISBN1".into(),
                site: "SEDE1".into(),
                loan_id,
            });
            enqueue(session.as_mut(), "librarybackup", "ISBN1", &payload)
                .await
                .unwrap();
        }

        let batch = fetch_batch(session.as_mut(), 2, None).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch[0].id < batch[1].id);
        assert_eq!(batch[0].operation_type, "DEVOLVER");
        assert_eq!(batch[0].payload["prestamoId"], 1);

        let rows = db.queue().await;
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| row.state == EventState::Pending));
        assert!(rows.iter().all(|row| row.target_db == "librarybackup"));
    }
}
