//! Observable lifecycle events
//!
//! Events are explicit and typed. Each carries the severity it is logged at.

use std::fmt;

use super::logger::Severity;

/// Observable events in the storage tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Boot & Lifecycle
    BootStart,
    BootComplete,
    ShutdownStart,
    ShutdownComplete,

    // Configuration and provisioning
    ConfigLoaded,
    /// Topology restored from the persisted meta row
    TopologyRestored,
    /// No endpoint had a usable meta row; booting with the primary active
    TopologyRestoreSkipped,
    SchemaInstalled,
    SchemaInstallFailed,

    // Request path
    Serving,
    RequestReceived,
    RequestCompleted,
    RequestRejected,
    RequestFailed,
    ListenerError,

    // Failover
    FailoverStart,
    FailoverComplete,
    /// Failed endpoint was already swapped away by a concurrent request
    FailoverSkipped,
    TopologyPersistFailed,

    // Replication
    WorkerStart,
    WorkerStop,
    ReplicationBatchApplied,
    ReplicationApplyFailed,
    ReplicationTargetUnknown,
    ReplicationQueueUnavailable,
    FailbackComplete,
    FailbackFailed,

    // Store
    ConnectionDriverError,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::BootStart => "LIBRARIUM_STARTUP_BEGIN",
            Event::BootComplete => "LIBRARIUM_STARTUP_COMPLETE",
            Event::ShutdownStart => "SHUTDOWN_START",
            Event::ShutdownComplete => "SHUTDOWN_COMPLETE",

            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::TopologyRestored => "TOPOLOGY_RESTORED",
            Event::TopologyRestoreSkipped => "TOPOLOGY_RESTORE_SKIPPED",
            Event::SchemaInstalled => "SCHEMA_INSTALLED",
            Event::SchemaInstallFailed => "SCHEMA_INSTALL_FAILED",

            Event::Serving => "LIBRARIUM_SERVING",
            Event::RequestReceived => "REQUEST_BEGIN",
            Event::RequestCompleted => "REQUEST_COMPLETE",
            Event::RequestRejected => "REQUEST_REJECTED",
            Event::RequestFailed => "REQUEST_FAILED",
            Event::ListenerError => "LISTENER_ERROR",

            Event::FailoverStart => "FAILOVER_BEGIN",
            Event::FailoverComplete => "FAILOVER_COMPLETE",
            Event::FailoverSkipped => "FAILOVER_SKIPPED",
            Event::TopologyPersistFailed => "TOPOLOGY_PERSIST_FAILED",

            Event::WorkerStart => "REPLICATION_WORKER_START",
            Event::WorkerStop => "REPLICATION_WORKER_STOP",
            Event::ReplicationBatchApplied => "REPLICATION_BATCH_APPLIED",
            Event::ReplicationApplyFailed => "REPLICATION_APPLY_FAILED",
            Event::ReplicationTargetUnknown => "REPLICATION_TARGET_UNKNOWN",
            Event::ReplicationQueueUnavailable => "REPLICATION_QUEUE_UNAVAILABLE",
            Event::FailbackComplete => "FAILBACK_COMPLETE",
            Event::FailbackFailed => "FAILBACK_FAILED",

            Event::ConnectionDriverError => "CONNECTION_DRIVER_ERROR",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Event::RequestReceived => Severity::Trace,
            Event::TopologyRestoreSkipped
            | Event::FailoverStart
            | Event::FailoverComplete
            | Event::ReplicationTargetUnknown
            | Event::ReplicationQueueUnavailable
            | Event::FailbackFailed
            | Event::ConnectionDriverError => Severity::Warn,
            Event::SchemaInstallFailed
            | Event::RequestFailed
            | Event::ListenerError
            | Event::TopologyPersistFailed
            | Event::ReplicationApplyFailed => Severity::Error,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_events_have_string_representation() {
        let events = [
            Event::BootStart,
            Event::BootComplete,
            Event::ShutdownStart,
            Event::ShutdownComplete,
            Event::ConfigLoaded,
            Event::TopologyRestored,
            Event::TopologyRestoreSkipped,
            Event::SchemaInstalled,
            Event::SchemaInstallFailed,
            Event::Serving,
            Event::RequestReceived,
            Event::RequestCompleted,
            Event::RequestRejected,
            Event::RequestFailed,
            Event::ListenerError,
            Event::FailoverStart,
            Event::FailoverComplete,
            Event::FailoverSkipped,
            Event::TopologyPersistFailed,
            Event::WorkerStart,
            Event::WorkerStop,
            Event::ReplicationBatchApplied,
            Event::ReplicationApplyFailed,
            Event::ReplicationTargetUnknown,
            Event::ReplicationQueueUnavailable,
            Event::FailbackComplete,
            Event::FailbackFailed,
            Event::ConnectionDriverError,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_failures_log_at_error() {
        assert_eq!(Event::ReplicationApplyFailed.severity(), Severity::Error);
        assert_eq!(Event::RequestFailed.severity(), Severity::Error);
        assert_eq!(Event::FailoverStart.severity(), Severity::Warn);
        assert_eq!(Event::BootStart.severity(), Severity::Info);
    }

    #[test]
    fn test_event_display() {
        assert_eq!(format!("{}", Event::FailoverComplete), "FAILOVER_COMPLETE");
    }
}
