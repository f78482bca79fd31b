//! Metrics registry
//!
//! - Counters only
//! - Monotonic increase
//! - Reset only on process start
//! - Thread-safe but lock-free

use std::sync::atomic::{AtomicU64, Ordering};

/// Operational counters shared by the request path and the worker.
///
/// Relaxed ordering throughout; counters are informational.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    requests_completed: AtomicU64,
    requests_rejected: AtomicU64,
    requests_failed: AtomicU64,
    failovers: AtomicU64,
    failbacks: AtomicU64,
    events_enqueued: AtomicU64,
    events_applied: AtomicU64,
    replication_failures: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Request path

    pub fn increment_requests_completed(&self) {
        self.requests_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_requests_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_requests_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one mutation whose replication event was committed.
    pub fn increment_events_enqueued(&self) {
        self.events_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    // Topology

    pub fn increment_failovers(&self) {
        self.failovers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failbacks(&self) {
        self.failbacks.fetch_add(1, Ordering::Relaxed);
    }

    // Replication worker

    pub fn add_events_applied(&self, count: u64) {
        self.events_applied.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_replication_failures(&self) {
        self.replication_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_completed: self.requests_completed.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            failovers: self.failovers.load(Ordering::Relaxed),
            failbacks: self.failbacks.load(Ordering::Relaxed),
            events_enqueued: self.events_enqueued.load(Ordering::Relaxed),
            events_applied: self.events_applied.load(Ordering::Relaxed),
            replication_failures: self.replication_failures.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of all counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub requests_completed: u64,
    pub requests_rejected: u64,
    pub requests_failed: u64,
    pub failovers: u64,
    pub failbacks: u64,
    pub events_enqueued: u64,
    pub events_applied: u64,
    pub replication_failures: u64,
}

impl MetricsSnapshot {
    /// Counters as owned `(key, value)` pairs for a log line.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("requests_completed", self.requests_completed.to_string()),
            ("requests_rejected", self.requests_rejected.to_string()),
            ("requests_failed", self.requests_failed.to_string()),
            ("failovers", self.failovers.to_string()),
            ("failbacks", self.failbacks.to_string()),
            ("events_enqueued", self.events_enqueued.to_string()),
            ("events_applied", self.events_applied.to_string()),
            ("replication_failures", self.replication_failures.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_is_zero() {
        assert_eq!(MetricsRegistry::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_counters_accumulate() {
        let metrics = MetricsRegistry::new();
        metrics.increment_requests_completed();
        metrics.increment_requests_completed();
        metrics.increment_failovers();
        metrics.add_events_applied(3);
        metrics.add_events_applied(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_completed, 2);
        assert_eq!(snapshot.failovers, 1);
        assert_eq!(snapshot.events_applied, 5);
        assert_eq!(snapshot.failbacks, 0);
    }

    #[test]
    fn test_concurrent_increments() {
        let metrics = std::sync::Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let metrics = std::sync::Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        metrics.increment_events_enqueued();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.snapshot().events_enqueued, 1000);
    }

    #[test]
    fn test_snapshot_fields_cover_every_counter() {
        let fields = MetricsSnapshot::default().fields();
        assert_eq!(fields.len(), 8);
        assert!(fields.iter().all(|(_, v)| v == "0"));
    }
}
