//! Request service
//!
//! Thin collaborator plumbing in front of the failover executor: a
//! line-oriented command protocol served over stdin/stdout or TCP.

pub mod command;
mod handler;
mod server;

pub use command::{Command, CommandError};
pub use handler::{LibraryService, ServiceSettings};
pub use server::{serve_lines, serve_tcp};
