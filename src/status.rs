//! Status reporting
//!
//! Read-only view of topology and replication backlog. Never fails the
//! caller: a store error becomes an "unavailable" line.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::store::{Connector, StorageResult};
use crate::topology::TopologyState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub active: String,
    pub replica: String,
    pub pending: i64,
    pub lag_seconds: i64,
    pub degraded: bool,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Active={}, Replica={}, Pending={}, Lag={}s, Degraded={}",
            self.active, self.replica, self.pending, self.lag_seconds, self.degraded
        )
    }
}

pub struct StatusReporter {
    topology: Arc<TopologyState>,
    connector: Arc<dyn Connector>,
}

impl StatusReporter {
    pub fn new(topology: Arc<TopologyState>, connector: Arc<dyn Connector>) -> Self {
        Self {
            topology,
            connector,
        }
    }

    /// Topology plus one queue query against the active endpoint.
    pub async fn report(&self) -> StorageResult<StatusReport> {
        let topology = self.topology.snapshot();
        let endpoints = self.topology.endpoints();
        let active = endpoints.get(topology.active());

        let mut session = self.connector.open(active).await?;
        let stats = session.queue_stats().await?;

        Ok(StatusReport {
            active: active.name().to_string(),
            replica: endpoints.get(topology.replica_target()).name().to_string(),
            pending: stats.pending,
            lag_seconds: stats.lag_seconds,
            degraded: topology.is_degraded(),
        })
    }

    pub async fn summary(&self) -> String {
        match self.report().await {
            Ok(report) => report.to_string(),
            Err(e) => format!("replication status unavailable: {}", e.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryConnector, MemoryDatabase};
    use crate::topology::{Endpoint, Endpoints};
    use serde_json::json;

    fn reporter(primary: &Arc<MemoryDatabase>) -> StatusReporter {
        let endpoints = Endpoints::new(
            Endpoint::new("library", "memory://library", "", ""),
            Endpoint::new("librarybackup", "memory://librarybackup", "", ""),
        );
        StatusReporter::new(
            Arc::new(TopologyState::new(endpoints)),
            Arc::new(MemoryConnector::new([Arc::clone(primary)])),
        )
    }

    #[test]
    fn test_report_display() {
        let report = StatusReport {
            active: "librarybackup".into(),
            replica: "library".into(),
            pending: 3,
            lag_seconds: 12,
            degraded: true,
        };
        assert_eq!(
            report.to_string(),
            "Active=librarybackup, Replica=library, Pending=3, Lag=12s, Degraded=true"
        );
    }

    #[tokio::test]
    async fn test_summary_counts_pending() {
        let primary = MemoryDatabase::new("library");
        primary
            .enqueue_raw("DEVOLVER", "ISBN1", json!({"prestamoId": 1}), "librarybackup")
            .await;

        let report = reporter(&primary).report().await.unwrap();
        assert_eq!(report.active, "library");
        assert_eq!(report.replica, "librarybackup");
        assert_eq!(report.pending, 1);
        assert!(report.lag_seconds >= 0);
        assert!(!report.degraded);
    }

    #[tokio::test]
    async fn test_summary_never_fails() {
        let primary = MemoryDatabase::new("library");
        primary.set_online(false);

        let summary = reporter(&primary).summary().await;
        assert!(summary.starts_with("replication status unavailable: "));
    }
}
