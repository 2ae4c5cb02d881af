//! Configuration and CLI argument parsing for remote-bash

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::{RemoteBashError, Result};
use crate::ssh::executor::DEFAULT_TIMEOUT_SECS;

/// remote-bash CLI arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "remote-bash")]
#[command(version)]
#[command(about = "Run a bash command on a remote host using ~/.ssh/config settings")]
pub struct Args {
    /// Host alias from the SSH client config
    #[arg(long, env = "REMOTE_BASH_HOST_ALIAS")]
    pub host_alias: String,

    /// Bash command to run on the remote host
    #[arg(long, env = "REMOTE_BASH_COMMAND")]
    pub command: String,

    /// SSH connection timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS as f64, env = "REMOTE_BASH_TIMEOUT")]
    pub timeout: f64,

    /// Do not stream stdout/stderr locally while the command runs
    #[arg(long, default_value = "false", env = "REMOTE_BASH_NO_STREAM")]
    pub no_stream: bool,

    /// Output the full result as JSON on stdout
    #[arg(long, default_value = "false", env = "REMOTE_BASH_JSON")]
    pub json: bool,

    /// Path to the SSH client config (default: ~/.ssh/config)
    #[arg(long, env = "REMOTE_BASH_SSH_CONFIG")]
    pub ssh_config: Option<PathBuf>,
}

/// Parsed and validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host alias to resolve
    pub host_alias: String,

    /// Command to run remotely
    pub command: String,

    /// Connection establishment timeout
    pub timeout: Duration,

    /// Echo remote output locally while the command runs
    pub stream_output: bool,

    /// Emit the result as JSON
    pub json: bool,

    /// SSH client config override
    pub ssh_config: Option<PathBuf>,
}

impl Config {
    /// Create Config from CLI Args
    pub fn from_args(args: Args) -> Result<Self> {
        validate_args(&args)?;

        Ok(Config {
            host_alias: args.host_alias,
            command: args.command,
            timeout: Duration::from_secs_f64(args.timeout),
            stream_output: !args.no_stream,
            json: args.json,
            ssh_config: args.ssh_config,
        })
    }
}

/// Validate CLI arguments
fn validate_args(args: &Args) -> Result<()> {
    let mut errors = Vec::new();

    if args.host_alias.trim().is_empty() {
        errors.push("Missing required --host-alias".to_string());
    }

    if args.command.trim().is_empty() {
        errors.push("Missing required --command".to_string());
    }

    if !args.timeout.is_finite() || args.timeout <= 0.0 {
        errors.push(format!(
            "--timeout must be a positive number of seconds, got {}",
            args.timeout
        ));
    }

    if !errors.is_empty() {
        return Err(RemoteBashError::invalid_params(errors.join("\n")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Args {
        Args {
            host_alias: "demo".to_string(),
            command: "uptime".to_string(),
            timeout: 10.0,
            no_stream: false,
            json: false,
            ssh_config: None,
        }
    }

    #[test]
    fn test_from_args_valid() {
        let config = Config::from_args(args()).unwrap();
        assert_eq!(config.host_alias, "demo");
        assert_eq!(config.command, "uptime");
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(config.stream_output);
        assert!(!config.json);
    }

    #[test]
    fn test_no_stream_disables_streaming() {
        let mut raw = args();
        raw.no_stream = true;
        let config = Config::from_args(raw).unwrap();
        assert!(!config.stream_output);
    }

    #[test]
    fn test_empty_command_rejected() {
        let mut raw = args();
        raw.command = "   ".to_string();
        let err = Config::from_args(raw).unwrap_err();
        assert!(err.to_string().contains("--command"));
    }

    #[test]
    fn test_empty_host_alias_rejected() {
        let mut raw = args();
        raw.host_alias = String::new();
        let err = Config::from_args(raw).unwrap_err();
        assert!(err.to_string().contains("--host-alias"));
    }

    #[test]
    fn test_non_positive_timeout_rejected() {
        for bad in [0.0, -2.5, f64::NAN, f64::INFINITY] {
            let mut raw = args();
            raw.timeout = bad;
            assert!(Config::from_args(raw).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_fractional_timeout_preserved() {
        let mut raw = args();
        raw.timeout = 2.5;
        let config = Config::from_args(raw).unwrap();
        assert_eq!(config.timeout, Duration::from_secs_f64(2.5));
    }
}
