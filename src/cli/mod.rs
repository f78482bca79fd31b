//! CLI module for Librarium
//!
//! Provides command-line interface for:
//! - init: Install the schema on both endpoints
//! - start: Boot and serve the command protocol on stdin/stdout
//! - serve: Boot and serve the command protocol over TCP
//! - status: One-shot replication status summary

mod args;
mod commands;
mod config;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{
    boot_system, init, install_schema, restore_topology, run, run_command, serve, start, status,
    System,
};
pub use config::{Config, EndpointConfig, PoolConfig, ReplicationConfig, ServiceConfig};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::write_response;
