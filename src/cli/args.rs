//! CLI argument definitions using clap
//!
//! Commands:
//! - librarium init --config <path>
//! - librarium start --config <path>
//! - librarium serve --config <path> [--listen <addr>]
//! - librarium status --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Librarium - library-loan storage tier with failover and queued replication
#[derive(Parser, Debug)]
#[command(name = "librarium")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Install the schema on both endpoints
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./librarium.json")]
        config: PathBuf,
    },

    /// Serve the command protocol on stdin/stdout
    Start {
        /// Path to configuration file
        #[arg(long, default_value = "./librarium.json")]
        config: PathBuf,
    },

    /// Serve the command protocol over TCP
    Serve {
        /// Path to configuration file
        #[arg(long, default_value = "./librarium.json")]
        config: PathBuf,

        /// Listen address, overrides `service.listen_addr`
        #[arg(long)]
        listen: Option<String>,
    },

    /// Print the replication status summary and exit
    Status {
        /// Path to configuration file
        #[arg(long, default_value = "./librarium.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
