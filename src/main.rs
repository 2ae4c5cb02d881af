//! remote-bash - Entry point
//!
//! Parses CLI arguments, runs one command on the resolved remote host, and
//! prints the captured output (or a JSON result). The process exit code is
//! the remote command's exit status.

use std::io::Write;

use clap::Parser;
use serde::Serialize;
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use remote_bash::config::{Args, Config};
use remote_bash::error::Result;
use remote_bash::ssh::{ExecRequest, RemoteExecutor};

/// JSON response shape for `--json` mode
#[derive(Serialize)]
struct JsonOutput<'a> {
    exit_status: u32,
    stdout: &'a str,
    stderr: &'a str,
}

#[tokio::main]
async fn main() {
    // Logging goes to stderr; stdout carries command output / JSON.
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    match run(config).await {
        Ok(exit_status) => std::process::exit(exit_status),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

/// Run the configured command and print its result
async fn run(config: Config) -> Result<i32> {
    let mut executor = RemoteExecutor::new();
    if let Some(ref path) = config.ssh_config {
        executor = executor.with_config_path(path);
    }

    let request = ExecRequest::new(&config.host_alias, &config.command)
        .with_timeout(config.timeout)
        .with_stream_output(config.stream_output);

    let result = executor.run(request).await?;

    if config.json {
        let payload = serde_json::to_string(&JsonOutput {
            exit_status: result.exit_status,
            stdout: &result.stdout,
            stderr: &result.stderr,
        })
        .map_err(|e| remote_bash::RemoteBashError::execution(e.to_string()))?;
        println!("{payload}");
    } else if !config.stream_output {
        // Streaming mode already echoed everything live.
        if !result.stdout.is_empty() {
            let mut out = std::io::stdout();
            out.write_all(result.stdout.as_bytes())?;
            out.flush()?;
        }
        if !result.stderr.is_empty() {
            let mut err = std::io::stderr();
            err.write_all(result.stderr.as_bytes())?;
            err.flush()?;
        }
    }

    Ok(result.exit_status as i32)
}
