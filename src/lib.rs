//! remote-bash - Run a single bash command on a remote host via SSH
//!
//! This crate resolves a host alias against an OpenSSH-style client config
//! (`~/.ssh/config`), opens one SSH connection, runs one command, and
//! returns the captured output and exit status. Output can optionally be
//! streamed to the local stdout/stderr while the command runs.
//!
//! # Features
//!
//! - `Host` alias resolution with glob patterns (`HostName`, `User`,
//!   `Port`, `IdentityFile`, `ProxyCommand`)
//! - Key-file and ssh-agent authentication
//! - `ProxyCommand` support with `%h`/`%p`/`%r` token expansion
//! - Live line-by-line streaming or single-shot output capture
//! - Connection closed on every exit path, including failures
//!
//! # Example Usage (CLI)
//!
//! ```bash
//! remote-bash --host-alias=demo --command='uptime'
//! remote-bash --host-alias=demo --command='df -h' --no-stream --json
//! ```
//!
//! # Example Usage (library)
//!
//! ```no_run
//! use remote_bash::{ExecRequest, RemoteExecutor};
//!
//! # async fn example() -> remote_bash::Result<()> {
//! let result = RemoteExecutor::new()
//!     .run(ExecRequest::new("demo", "uptime"))
//!     .await?;
//! println!("exit status: {}", result.exit_status);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod ssh;

// Re-exports for convenience
pub use config::{Args, Config};
pub use error::{RemoteBashError, Result};
pub use ssh::{
    ConnectParams, Connection, ExecRequest, RemoteCommandResult, RemoteExecutor, RemoteProcess,
    ResolvedHostConfig, RusshTransport, Transport,
};
