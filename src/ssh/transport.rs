//! Transport boundary for remote command execution
//!
//! The executor talks to the SSH transport through these object-safe traits
//! so the real client library stays swappable: production uses the russh
//! implementation in `connection.rs`, tests use a scripted double.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::Result;

/// Byte stream for one remote output channel (stdout or stderr)
///
/// Supports both line-by-line pulls (via `BufReader`) and read-to-completion.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Parameters for opening one transport connection
#[derive(Debug, Clone)]
pub struct ConnectParams {
    /// Network target (resolved `HostName` or the validated alias)
    pub host: String,

    /// SSH port
    pub port: u16,

    /// Remote username; `None` defers to the transport default
    pub user: Option<String>,

    /// Identity file paths, tried in order; empty defers to the ssh-agent
    pub identity_files: Vec<String>,

    /// Optional proxy command to tunnel the transport through
    pub proxy_command: Option<String>,

    /// Connection establishment timeout
    pub timeout: Duration,
}

/// Opens transport connections
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect and authenticate to the target described by `params`
    async fn connect(&self, params: ConnectParams) -> Result<Box<dyn Connection>>;
}

/// One established connection, exclusively owned by a single invocation
#[async_trait]
pub trait Connection: Send {
    /// Spawn `command` on the remote side, verbatim (no quoting or escaping)
    async fn spawn(&mut self, command: &str) -> Result<Box<dyn RemoteProcess>>;

    /// Close the connection and wait until closure completes
    async fn close(&mut self) -> Result<()>;
}

/// A spawned remote process
#[async_trait]
pub trait RemoteProcess: Send {
    /// Take the stdout stream. May only be taken once.
    fn take_stdout(&mut self) -> ByteStream;

    /// Take the stderr stream. May only be taken once.
    fn take_stderr(&mut self) -> ByteStream;

    /// Wait for the process to finish and return its exit status
    async fn wait(&mut self) -> Result<u32>;
}
