//! Configuration file
//!
//! Loaded once at start and immutable afterwards. Every field except the
//! endpoint URLs has a default.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{CliError, CliResult};
use crate::observability::Severity;
use crate::replication::WorkerSettings;
use crate::service::ServiceSettings;
use crate::store::PoolSettings;
use crate::topology::{Endpoint, Endpoints};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Logical name, used as `target_db` in the replication queue
    pub name: String,
    /// `postgresql://…` or legacy `jdbc:postgresql://…`
    pub url: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_user_id")]
    pub default_user_id: i32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            default_user_id: default_user_id(),
        }
    }
}

/// Configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub primary: EndpointConfig,
    pub secondary: EndpointConfig,

    #[serde(default)]
    pub replication: ReplicationConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub service: ServiceConfig,

    /// Minimum log severity: trace, info, warn, error or fatal
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_user() -> String {
    "postgres".to_string()
}
fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_batch_size() -> usize {
    25
}
fn default_max_connections() -> usize {
    5
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_listen_addr() -> String {
    "0.0.0.0:5557".to_string()
}
fn default_user_id() -> i32 {
    1
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::config_error(format!("Failed to read config: {}", e)))?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> CliResult<()> {
        for (role, endpoint) in [("primary", &self.primary), ("secondary", &self.secondary)] {
            if endpoint.name.trim().is_empty() {
                return Err(CliError::config_error(format!("{}.name must not be empty", role)));
            }
            if endpoint.url.trim().is_empty() {
                return Err(CliError::config_error(format!("{}.url must not be empty", role)));
            }
        }

        // Queue targets resolve case-insensitively.
        if self.primary.name.eq_ignore_ascii_case(&self.secondary.name) {
            return Err(CliError::config_error(format!(
                "primary and secondary share the name '{}'",
                self.primary.name
            )));
        }

        if self.replication.poll_interval_ms == 0 {
            return Err(CliError::config_error("replication.poll_interval_ms must be > 0"));
        }
        if self.replication.batch_size == 0 {
            return Err(CliError::config_error("replication.batch_size must be > 0"));
        }
        if self.pool.max_connections == 0 {
            return Err(CliError::config_error("pool.max_connections must be > 0"));
        }
        if self.pool.connect_timeout_ms == 0 {
            return Err(CliError::config_error("pool.connect_timeout_ms must be > 0"));
        }

        self.severity()?;

        Ok(())
    }

    pub fn severity(&self) -> CliResult<Severity> {
        Severity::parse(&self.log_level).ok_or_else(|| {
            CliError::config_error(format!(
                "Invalid log_level: '{}'. Must be one of trace, info, warn, error, fatal.",
                self.log_level
            ))
        })
    }

    pub fn endpoints(&self) -> Endpoints {
        let endpoint = |c: &EndpointConfig| Endpoint::new(&c.name, &c.url, &c.user, &c.password);
        Endpoints::new(endpoint(&self.primary), endpoint(&self.secondary))
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.pool.max_connections,
            connect_timeout: Duration::from_millis(self.pool.connect_timeout_ms),
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            poll_interval: Duration::from_millis(self.replication.poll_interval_ms),
            batch_size: self.replication.batch_size,
        }
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            default_user_id: self.service.default_user_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::errors::CliErrorCode;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn endpoints_json() -> Value {
        json!({
            "primary": {"name": "library", "url": "postgresql://localhost:5432/library"},
            "secondary": {"name": "librarybackup", "url": "jdbc:postgresql://localhost:5433/librarybackup"}
        })
    }

    fn write_config(temp_dir: &TempDir, config: &Value) -> std::path::PathBuf {
        let config_path = temp_dir.path().join("librarium.json");
        fs::write(&config_path, config.to_string()).unwrap();
        config_path
    }

    #[test]
    fn test_config_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(&temp_dir, &endpoints_json());

        let config = Config::load(&config_path).unwrap();
        assert_eq!(config.primary.user, "postgres");
        assert_eq!(config.replication.poll_interval_ms, 2000);
        assert_eq!(config.replication.batch_size, 25);
        assert_eq!(config.pool.max_connections, 5);
        assert_eq!(config.pool.connect_timeout_ms, 5000);
        assert_eq!(config.service.listen_addr, "0.0.0.0:5557");
        assert_eq!(config.service.default_user_id, 1);
        assert_eq!(config.severity().unwrap(), Severity::Info);

        assert_eq!(config.worker_settings(), WorkerSettings::default());
        assert_eq!(config.pool_settings(), PoolSettings::default());
        assert_eq!(config.endpoints().secondary().name(), "librarybackup");
    }

    #[test]
    fn test_config_rejects_duplicate_names() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = endpoints_json();
        config["secondary"]["name"] = json!("LIBRARY");
        let config_path = write_config(&temp_dir, &config);

        let err = Config::load(&config_path).unwrap_err();
        assert_eq!(err.code(), &CliErrorCode::ConfigError);
    }

    #[test]
    fn test_config_rejects_zero_batch() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = endpoints_json();
        config["replication"] = json!({"batch_size": 0});
        let config_path = write_config(&temp_dir, &config);

        let err = Config::load(&config_path).unwrap_err();
        assert!(err.message().contains("batch_size"));
    }

    #[test]
    fn test_config_rejects_unknown_log_level() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = endpoints_json();
        config["log_level"] = json!("verbose");
        let config_path = write_config(&temp_dir, &config);

        assert!(Config::load(&config_path).is_err());
    }

    #[test]
    fn test_config_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = Config::load(&temp_dir.path().join("absent.json")).unwrap_err();
        assert_eq!(err.code(), &CliErrorCode::ConfigError);
    }
}
