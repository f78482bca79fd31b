//! CLI command implementations
//!
//! Boot sequence shared by `start` and `serve`:
//! 1. Configuration load (sets the log level)
//! 2. Connector construction, one connection gate per endpoint
//! 3. Topology restore from the persisted meta rows
//! 4. Failover executor and replication worker
//! 5. Request service activation
//!
//! Shutdown stops the worker after its in-flight pass and logs the final
//! counters.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::sync::watch;

use crate::failover::FailoverExecutor;
use crate::observability::{
    log_event, log_event_with_fields, log_metrics, Event, Logger, MetricsRegistry,
};
use crate::replication::{ReplicationWorker, WorkerHandle};
use crate::service::{serve_lines, serve_tcp, LibraryService};
use crate::status::StatusReporter;
use crate::store::{Connector, PgConnector, StorageResult};
use crate::topology::{reconcile, EndpointRole, Endpoints, Topology, TopologyState};

use super::args::Command;
use super::config::Config;
use super::errors::{CliError, CliResult};
use super::io::write_response;

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Init { config } => init(&config),
        Command::Start { config } => start(&config),
        Command::Serve { config, listen } => serve(&config, listen),
        Command::Status { config } => status(&config),
    }
}

/// Install the schema on both endpoints
///
/// Idempotent. Fails if either endpoint could not be prepared.
pub fn init(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    let endpoints = config.endpoints();
    let connector = PgConnector::new(&endpoints, config.pool_settings());

    let installed = block_on_runtime(async { Ok(install_schema(&connector, &endpoints).await) })?;

    let failed: Vec<&str> = installed
        .iter()
        .filter(|(_, result)| result.is_err())
        .map(|(name, _)| name.as_str())
        .collect();
    if !failed.is_empty() {
        return Err(CliError::boot_failed(format!(
            "schema install failed on {}",
            failed.join(", ")
        )));
    }

    let names: Vec<&str> = installed.iter().map(|(name, _)| name.as_str()).collect();
    write_response(json!({ "initialized": names }))?;

    Ok(())
}

/// Serve the command protocol on stdin/stdout
///
/// Runs until end of input or Ctrl-C.
pub fn start(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;

    block_on_runtime(async {
        let connector = pg_connector(&config);
        let system = boot_system(&config, connector).await;
        let shutdown = shutdown_on_ctrl_c();

        log_event_with_fields(Event::Serving, &[("transport", "stdio")]);
        let served = serve_lines(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            &system.service,
            shutdown,
        )
        .await;

        system.shutdown().await;
        served.map_err(CliError::from)
    })
}

/// Serve the command protocol over TCP
///
/// `listen` overrides `service.listen_addr`. Runs until Ctrl-C.
pub fn serve(config_path: &Path, listen: Option<String>) -> CliResult<()> {
    let config = load_config(config_path)?;
    let listen_addr = listen.unwrap_or_else(|| config.service.listen_addr.clone());

    block_on_runtime(async {
        let listener = TcpListener::bind(&listen_addr).await.map_err(|e| {
            CliError::boot_failed(format!("Failed to bind {}: {}", listen_addr, e))
        })?;

        let connector = pg_connector(&config);
        let system = boot_system(&config, connector).await;
        let shutdown = shutdown_on_ctrl_c();

        let served = serve_tcp(listener, Arc::clone(&system.service), shutdown).await;

        system.shutdown().await;
        served.map_err(CliError::from)
    })
}

/// Print the replication status summary and exit
pub fn status(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;

    let summary = block_on_runtime(async {
        let endpoints = config.endpoints();
        let connector = pg_connector(&config);
        let topology = restore_topology(connector.as_ref(), &endpoints).await;
        let state = Arc::new(TopologyState::with_topology(endpoints, topology));
        Ok(StatusReporter::new(state, connector).summary().await)
    })?;

    write_response(json!({ "summary": summary }))?;

    Ok(())
}

/// A booted process: request service plus its background worker.
pub struct System {
    pub service: Arc<LibraryService>,
    worker: WorkerHandle,
    metrics: Arc<MetricsRegistry>,
}

impl System {
    /// Stop the worker and log the final counters.
    pub async fn shutdown(self) {
        log_event(Event::ShutdownStart);
        self.worker.stop().await;
        log_metrics(&self.metrics);
    }
}

/// Boot against `connector`. Endpoints that are down at boot are not an
/// error; the first request fails over if needed.
pub async fn boot_system(config: &Config, connector: Arc<dyn Connector>) -> System {
    log_event(Event::BootStart);

    let endpoints = config.endpoints();
    let topology = restore_topology(connector.as_ref(), &endpoints).await;
    let state = Arc::new(TopologyState::with_topology(endpoints, topology));
    let metrics = Arc::new(MetricsRegistry::new());

    let executor = Arc::new(FailoverExecutor::new(
        Arc::clone(&state),
        Arc::clone(&connector),
        Arc::clone(&metrics),
    ));
    let worker = ReplicationWorker::new(
        Arc::clone(&state),
        Arc::clone(&connector),
        Arc::clone(&metrics),
        config.worker_settings(),
    )
    .spawn();
    let service = Arc::new(LibraryService::new(executor, config.service_settings()));

    log_event_with_fields(
        Event::BootComplete,
        &[
            ("active", state.active_endpoint().name()),
            ("degraded", &state.is_degraded().to_string()),
        ],
    );

    System {
        service,
        worker,
        metrics,
    }
}

/// Read the persisted topology from both endpoints.
///
/// Unreachable endpoints are skipped. Falls back to the initial topology
/// when no row resolves.
pub async fn restore_topology(connector: &dyn Connector, endpoints: &Endpoints) -> Topology {
    let mut rows = Vec::with_capacity(2);
    for role in [EndpointRole::Primary, EndpointRole::Secondary] {
        let endpoint = endpoints.get(role);
        let row = match connector.open(endpoint).await {
            Ok(mut session) => session.load_meta().await,
            Err(e) => Err(e),
        };
        match row {
            Ok(row) => rows.push(row),
            Err(e) => {
                log_event_with_fields(
                    Event::TopologyRestoreSkipped,
                    &[("endpoint", endpoint.name()), ("error", &e.to_string())],
                );
                rows.push(None);
            }
        }
    }

    match reconcile(endpoints, &rows) {
        Some(topology) => {
            log_event_with_fields(
                Event::TopologyRestored,
                &[
                    ("active", endpoints.get(topology.active()).name()),
                    ("degraded", &topology.is_degraded().to_string()),
                ],
            );
            topology
        }
        None => Topology::initial(),
    }
}

/// Run the DDL on both endpoints, reporting each result by name.
pub async fn install_schema(
    connector: &dyn Connector,
    endpoints: &Endpoints,
) -> Vec<(String, StorageResult<()>)> {
    let mut results = Vec::with_capacity(2);
    for role in [EndpointRole::Primary, EndpointRole::Secondary] {
        let endpoint = endpoints.get(role);
        let result = match connector.open(endpoint).await {
            Ok(mut session) => session.ensure_schema().await,
            Err(e) => Err(e),
        };
        match &result {
            Ok(()) => log_event_with_fields(Event::SchemaInstalled, &[("endpoint", endpoint.name())]),
            Err(e) => log_event_with_fields(
                Event::SchemaInstallFailed,
                &[("endpoint", endpoint.name()), ("error", &e.to_string())],
            ),
        }
        results.push((endpoint.name().to_string(), result));
    }
    results
}

fn load_config(config_path: &Path) -> CliResult<Config> {
    let config = Config::load(config_path)?;
    Logger::set_min_severity(config.severity()?);
    log_event_with_fields(
        Event::ConfigLoaded,
        &[("path", &config_path.display().to_string())],
    );
    Ok(config)
}

fn pg_connector(config: &Config) -> Arc<dyn Connector> {
    Arc::new(PgConnector::new(&config.endpoints(), config.pool_settings()))
}

/// Flip the returned channel to `true` on Ctrl-C.
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (sender, receiver) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = sender.send(true);
        }
    });
    receiver
}

/// Run `fut` to completion on a fresh runtime.
///
/// A pending blocking stdin read must not hold up process exit, so the
/// runtime is shut down with a timeout rather than dropped.
fn block_on_runtime<T>(fut: impl std::future::Future<Output = CliResult<T>>) -> CliResult<T> {
    let runtime = Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))?;
    let result = runtime.block_on(fut);
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryConnector, MemoryDatabase, Session};
    use crate::topology::TopologyMeta;
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    fn create_config(temp_dir: &TempDir) -> std::path::PathBuf {
        let config_path = temp_dir.path().join("librarium.json");
        let config = json!({
            "primary": {"name": "library", "url": "memory://library"},
            "secondary": {"name": "librarybackup", "url": "memory://librarybackup"},
            "replication": {"poll_interval_ms": 20},
            "log_level": "error"
        });
        fs::write(&config_path, config.to_string()).unwrap();
        config_path
    }

    fn databases() -> (Arc<MemoryDatabase>, Arc<MemoryDatabase>, Arc<dyn Connector>) {
        let primary = MemoryDatabase::new("library");
        let secondary = MemoryDatabase::new("librarybackup");
        let connector: Arc<dyn Connector> = Arc::new(MemoryConnector::new([
            Arc::clone(&primary),
            Arc::clone(&secondary),
        ]));
        (primary, secondary, connector)
    }

    async fn store_meta(
        connector: &dyn Connector,
        endpoints: &Endpoints,
        on: EndpointRole,
        topology: Topology,
    ) {
        let meta = TopologyMeta::describe(endpoints, topology, Utc::now());
        let mut session: Box<dyn Session> = connector.open(endpoints.get(on)).await.unwrap();
        session.upsert_meta(&meta).await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_without_meta_is_initial() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(&create_config(&temp_dir)).unwrap();
        let (_primary, _secondary, connector) = databases();

        let topology = restore_topology(connector.as_ref(), &config.endpoints()).await;
        assert_eq!(topology, Topology::initial());
    }

    #[tokio::test]
    async fn test_restore_degraded_from_secondary_row() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(&create_config(&temp_dir)).unwrap();
        let endpoints = config.endpoints();
        let (_primary, _secondary, connector) = databases();

        // Primary still claims to be active: it went down before the
        // failover could be mirrored onto it.
        store_meta(connector.as_ref(), &endpoints, EndpointRole::Primary, Topology::initial()).await;
        store_meta(
            connector.as_ref(),
            &endpoints,
            EndpointRole::Secondary,
            Topology::with_active(EndpointRole::Secondary),
        )
        .await;

        let topology = restore_topology(connector.as_ref(), &endpoints).await;
        assert!(topology.is_degraded());
    }

    #[tokio::test]
    async fn test_restore_skips_unreachable_primary() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(&create_config(&temp_dir)).unwrap();
        let endpoints = config.endpoints();
        let (primary, _secondary, connector) = databases();
        store_meta(
            connector.as_ref(),
            &endpoints,
            EndpointRole::Secondary,
            Topology::with_active(EndpointRole::Secondary),
        )
        .await;
        primary.set_online(false);

        let topology = restore_topology(connector.as_ref(), &endpoints).await;
        assert_eq!(topology.active(), EndpointRole::Secondary);
    }

    #[tokio::test]
    async fn test_install_schema_reports_each_endpoint() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(&create_config(&temp_dir)).unwrap();
        let (_primary, secondary, connector) = databases();
        secondary.set_online(false);

        let results = install_schema(connector.as_ref(), &config.endpoints()).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "library");
        assert!(results[0].1.is_ok());
        assert_eq!(results[1].0, "librarybackup");
        assert!(results[1].1.is_err());
    }

    #[tokio::test]
    async fn test_booted_system_serves_and_shuts_down() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(&create_config(&temp_dir)).unwrap();
        let (primary, secondary, connector) = databases();
        for db in [&primary, &secondary] {
            db.add_book("ISBN1", 2, 1).await;
        }

        let system = boot_system(&config, connector).await;
        let reply = system.service.handle_line("PRESTAMO ISBN1 SEDE1 7").await;
        assert!(reply.starts_with("loan confirmed"), "{}", reply);

        // The worker replays the loan onto the secondary.
        let mut replicated = false;
        for _ in 0..100 {
            if secondary.book("ISBN1").await.unwrap().copies_available == 1 {
                replicated = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(replicated);

        system.shutdown().await;
    }
}
