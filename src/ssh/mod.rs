//! SSH config resolution and remote execution module
//!
//! This module resolves per-alias connection parameters from the SSH client
//! config and runs single commands over a transport boundary with one
//! production (russh) implementation.

pub mod connection;
pub mod executor;
pub mod handler;
pub mod resolver;
pub mod transport;

// Re-exports
pub use connection::RusshTransport;
pub use executor::{ExecRequest, RemoteCommandResult, RemoteExecutor};
pub use handler::ClientHandler;
pub use resolver::{resolve, ResolvedHostConfig};
pub use transport::{ByteStream, ConnectParams, Connection, RemoteProcess, Transport};
