//! Observability subsystem
//!
//! Provides:
//! - Structured logging (JSON lines)
//! - Typed lifecycle events
//! - Atomic operational counters
//!
//! # Principles
//!
//! 1. Observability is read-only
//! 2. No side effects on execution
//! 3. Logging failures are swallowed, never surfaced
//!
//! # Usage
//!
//! ```ignore
//! use librarium::observability::{log_event_with_fields, Event, MetricsRegistry};
//!
//! log_event_with_fields(Event::FailoverComplete, &[("active", "librarybackup")]);
//!
//! let metrics = MetricsRegistry::new();
//! metrics.increment_failovers();
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

/// Log a lifecycle event at its own severity
pub fn log_event(event: Event) {
    Logger::log(event.severity(), event.as_str(), &[]);
}

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}

/// Log the final counter values, once, at shutdown.
pub fn log_metrics(metrics: &MetricsRegistry) {
    let fields = metrics.snapshot().fields();
    let refs: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
    log_event_with_fields(Event::ShutdownComplete, &refs);
}
