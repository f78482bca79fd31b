//! Request dispatch
//!
//! Turns one protocol line into one reply line. Every request is tagged
//! with a fresh request id in its log lines.

use std::sync::Arc;

use uuid::Uuid;

use super::command::{self, Command};
use crate::failover::FailoverExecutor;
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};
use crate::operations::{Operation, Outcome};
use crate::status::StatusReporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSettings {
    /// User charged for a loan whose request names none.
    pub default_user_id: i32,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self { default_user_id: 1 }
    }
}

pub struct LibraryService {
    executor: Arc<FailoverExecutor>,
    status: StatusReporter,
    metrics: Arc<MetricsRegistry>,
    settings: ServiceSettings,
}

impl LibraryService {
    pub fn new(executor: Arc<FailoverExecutor>, settings: ServiceSettings) -> Self {
        let status = StatusReporter::new(
            Arc::clone(executor.topology()),
            Arc::clone(executor.connector()),
        );
        let metrics = Arc::clone(executor.metrics());
        Self {
            executor,
            status,
            metrics,
            settings,
        }
    }

    pub fn executor(&self) -> &Arc<FailoverExecutor> {
        &self.executor
    }

    /// Handle one request line and produce its reply.
    pub async fn handle_line(&self, line: &str) -> String {
        let request_id = Uuid::new_v4().to_string();
        log_event_with_fields(
            Event::RequestReceived,
            &[("request", line.trim()), ("request_id", &request_id)],
        );

        match command::parse(line, self.settings.default_user_id) {
            Ok(Command::Status) => self.status.summary().await,
            Ok(Command::Execute(op)) => self.execute(&request_id, &op).await,
            Err(e) => {
                self.metrics.increment_requests_rejected();
                let reason = e.to_string();
                log_event_with_fields(
                    Event::RequestRejected,
                    &[("reason", &reason), ("request_id", &request_id)],
                );
                reason
            }
        }
    }

    async fn execute(&self, request_id: &str, op: &Operation) -> String {
        let operation = op.name();
        match self.executor.execute(op).await {
            Ok(Outcome::Completed(reply)) => {
                self.metrics.increment_requests_completed();
                log_event_with_fields(
                    Event::RequestCompleted,
                    &[
                        ("active", self.executor.topology().active_endpoint().name()),
                        ("code", op.code()),
                        ("operation", operation),
                        ("request_id", request_id),
                    ],
                );
                reply
            }
            Ok(Outcome::Rejected(rejection)) => {
                self.metrics.increment_requests_rejected();
                let reason = rejection.to_string();
                log_event_with_fields(
                    Event::RequestRejected,
                    &[
                        ("code", op.code()),
                        ("operation", operation),
                        ("reason", &reason),
                        ("request_id", request_id),
                    ],
                );
                // Availability answers a bare yes/no.
                match op {
                    Operation::Availability { .. } => "NO".to_string(),
                    _ => reason,
                }
            }
            Err(e) => {
                self.metrics.increment_requests_failed();
                log_event_with_fields(
                    Event::RequestFailed,
                    &[
                        ("code", op.code()),
                        ("error", &e.to_string()),
                        ("operation", operation),
                        ("request_id", request_id),
                    ],
                );
                format!("error: {}", e.message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryConnector, MemoryDatabase};
    use crate::topology::{Endpoint, Endpoints, TopologyState};

    async fn service() -> (Arc<MemoryDatabase>, Arc<MemoryDatabase>, LibraryService) {
        let primary = MemoryDatabase::new("library");
        let secondary = MemoryDatabase::new("librarybackup");
        primary.add_book("ISBN1", 1, 1).await;
        let endpoints = Endpoints::new(
            Endpoint::new("library", "memory://library", "", ""),
            Endpoint::new("librarybackup", "memory://librarybackup", "", ""),
        );
        let executor = FailoverExecutor::new(
            Arc::new(TopologyState::new(endpoints)),
            Arc::new(MemoryConnector::new([
                Arc::clone(&primary),
                Arc::clone(&secondary),
            ])),
            Arc::new(MetricsRegistry::new()),
        );
        let service = LibraryService::new(Arc::new(executor), ServiceSettings { default_user_id: 5 });
        (primary, secondary, service)
    }

    #[tokio::test]
    async fn test_loan_uses_default_user() {
        let (primary, _secondary, service) = service().await;
        let reply = service.handle_line("PRESTAMO ISBN1 SEDE1").await;
        assert!(reply.starts_with("loan confirmed, due date: "), "{}", reply);
        assert_eq!(primary.loans("ISBN1").await[0].user_id, 5);
    }

    #[tokio::test]
    async fn test_availability_replies_yes_no() {
        let (_primary, _secondary, service) = service().await;
        assert_eq!(service.handle_line("DISPONIBILIDAD? ISBN1").await, "SI");
        assert_eq!(service.handle_line("DISPONIBILIDAD? MISSING").await, "NO");
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let (_primary, _secondary, service) = service().await;
        assert_eq!(service.handle_line("").await, "empty request");
        assert_eq!(service.handle_line("HOLA").await, "unrecognized request");
        assert_eq!(
            service.handle_line("PRESTAMO ISBN1").await,
            "invalid format, usage: PRESTAMO <code> <site> [userId]"
        );
        assert_eq!(service.executor().metrics().snapshot().requests_rejected, 3);
    }

    #[tokio::test]
    async fn test_fatal_failure_is_reported() {
        let (primary, secondary, service) = service().await;
        primary.set_online(false);
        secondary.set_online(false);

        let reply = service.handle_line("DEVOLVER ISBN1 SEDE1").await;
        assert!(reply.starts_with("error: "), "{}", reply);
        assert_eq!(service.executor().metrics().snapshot().requests_failed, 1);
    }

    #[tokio::test]
    async fn test_status_line() {
        let (_primary, _secondary, service) = service().await;
        assert_eq!(
            service.handle_line("STATUS").await,
            "Active=library, Replica=librarybackup, Pending=0, Lag=0s, Degraded=false"
        );
    }
}
