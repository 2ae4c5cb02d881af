//! Remote command execution
//!
//! Runs a single shell command on a host resolved from the SSH client
//! config: connect, spawn, drain/collect output, wait for the exit status,
//! close. The connection is exclusively owned by one invocation and is
//! closed on every exit path, including failures.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use super::connection::RusshTransport;
use super::resolver::{self, ResolvedHostConfig};
use super::transport::{ByteStream, ConnectParams, Connection, Transport};
use crate::error::{RemoteBashError, Result};

/// Default connection timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// One remote command invocation
#[derive(Debug, Clone, Deserialize)]
pub struct ExecRequest {
    /// Host alias to look up in the SSH client config
    pub host_alias: String,

    /// Shell command to run on the remote host, passed verbatim
    pub command: String,

    /// Connection establishment timeout (seconds in serialized form)
    #[serde(default = "default_timeout", deserialize_with = "de_timeout_secs")]
    pub timeout: Duration,

    /// Echo stdout/stderr lines locally while the command runs
    #[serde(default = "default_stream_output")]
    pub stream_output: bool,
}

impl ExecRequest {
    /// Create a request with the default timeout and streaming enabled
    pub fn new(host_alias: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            host_alias: host_alias.into(),
            command: command.into(),
            timeout: default_timeout(),
            stream_output: default_stream_output(),
        }
    }

    /// Set the connection timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable live output streaming
    pub fn with_stream_output(mut self, stream_output: bool) -> Self {
        self.stream_output = stream_output;
        self
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(DEFAULT_TIMEOUT_SECS)
}

fn default_stream_output() -> bool {
    true
}

fn de_timeout_secs<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(serde::de::Error::custom(
            "timeout must be a positive number of seconds",
        ));
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Outcome of one remote command invocation
///
/// Immutable once returned. The timestamps bracket the whole
/// connect-through-close lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteCommandResult {
    /// Exit status reported by the remote process
    pub exit_status: u32,

    /// Captured stdout, chunks concatenated in arrival order
    pub stdout: String,

    /// Captured stderr, chunks concatenated in arrival order
    pub stderr: String,

    /// Taken immediately before connecting
    pub started_at: DateTime<Utc>,

    /// Taken immediately after connection close completed
    pub finished_at: DateTime<Utc>,
}

/// Executes single commands on remote hosts
///
/// Resolves connection parameters from the SSH client config, then drives
/// one connection per `run` call through the transport boundary. No state
/// is shared between invocations.
pub struct RemoteExecutor {
    /// SSH client config path (default `~/.ssh/config`)
    config_path: PathBuf,

    /// Transport used to open connections
    transport: Arc<dyn Transport>,
}

impl RemoteExecutor {
    /// Create an executor using `~/.ssh/config` and the russh transport
    pub fn new() -> Self {
        Self {
            config_path: default_config_path(),
            transport: Arc::new(RusshTransport::new()),
        }
    }

    /// Override the SSH client config path
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = path.into();
        self
    }

    /// Override the transport implementation
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Run one command on the host behind `request.host_alias`
    ///
    /// Lifecycle: resolve → connect → spawn → drain → wait → close. The
    /// connection close always runs and is awaited before this returns,
    /// whether the invocation succeeded or failed. Only connection
    /// establishment is bounded by `request.timeout`; a command that never
    /// exits will hang the caller.
    ///
    /// No failure is retried here; retry policy belongs to the caller.
    pub async fn run(&self, request: ExecRequest) -> Result<RemoteCommandResult> {
        let started_at = Utc::now();

        let resolved = resolver::resolve(&self.config_path, &request.host_alias)?;
        let host = network_target(&resolved, &request.host_alias)?;

        let params = ConnectParams {
            host,
            port: resolved.port,
            user: resolved.user,
            identity_files: resolved.identity_files,
            proxy_command: resolved.proxy_command,
            timeout: request.timeout,
        };

        let mut connection = self.transport.connect(params).await?;

        // Mandatory cleanup: close and await closure on every path before
        // the result or the error leaves this function.
        let outcome = execute(connection.as_mut(), &request).await;
        if let Err(e) = connection.close().await {
            warn!("Error while closing connection: {}", e);
        }
        let (exit_status, stdout, stderr) = outcome?;

        let finished_at = Utc::now();
        debug!(
            "Command on '{}' finished with status {} in {}ms",
            request.host_alias,
            exit_status,
            (finished_at - started_at).num_milliseconds()
        );

        Ok(RemoteCommandResult {
            exit_status,
            stdout,
            stderr,
            started_at,
            finished_at,
        })
    }
}

impl Default for RemoteExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Default SSH client config location
fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/"))
        .join(".ssh")
        .join("config")
}

/// Pick the network target for an invocation
///
/// A resolved `HostName` is used as-is. Otherwise the alias itself goes on
/// the wire (and into any ProxyCommand expansion performed by the
/// transport), so it must not carry shell metacharacters: letters, digits,
/// hyphens, and dots only.
fn network_target(resolved: &ResolvedHostConfig, host_alias: &str) -> Result<String> {
    if let Some(hostname) = &resolved.hostname {
        return Ok(hostname.clone());
    }

    let trusted = !host_alias.is_empty()
        && host_alias
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if !trusted {
        return Err(RemoteBashError::UntrustedHostAlias(host_alias.to_string()));
    }

    Ok(host_alias.to_string())
}

/// Spawn the command and collect its output and exit status
///
/// Both output streams are drained concurrently; the `join!` is a barrier,
/// so a failure on one stream still lets the other finish before the error
/// propagates (and the caller then closes the connection).
async fn execute(
    connection: &mut dyn Connection,
    request: &ExecRequest,
) -> Result<(u32, String, String)> {
    let mut process = connection.spawn(&request.command).await?;
    let stdout = process.take_stdout();
    let stderr = process.take_stderr();

    let (stdout, stderr) = if request.stream_output {
        let (out, err) = tokio::join!(
            drain_lines(stdout, tokio::io::stdout(), "stdout"),
            drain_lines(stderr, tokio::io::stderr(), "stderr"),
        );
        (out?, err?)
    } else {
        let (out, err) = tokio::join!(read_all(stdout, "stdout"), read_all(stderr, "stderr"));
        (out?, err?)
    };

    let exit_status = process.wait().await?;
    Ok((exit_status, stdout, stderr))
}

/// Drain a stream line by line, echoing each line to `sink` as it arrives
/// and accumulating it into the returned buffer. Line delimiters are
/// preserved; intra-stream order is preserved.
async fn drain_lines(
    stream: ByteStream,
    mut sink: impl AsyncWrite + Unpin,
    name: &'static str,
) -> Result<String> {
    let mut reader = BufReader::new(stream);
    let mut captured = String::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = reader
            .read_until(b'\n', &mut line)
            .await
            .map_err(|e| RemoteBashError::execution(format!("failed to read remote {name}: {e}")))?;
        if n == 0 {
            break;
        }

        let text = String::from_utf8_lossy(&line);
        captured.push_str(&text);
        sink.write_all(text.as_bytes())
            .await
            .map_err(|e| RemoteBashError::execution(format!("failed to echo {name}: {e}")))?;
        sink.flush()
            .await
            .map_err(|e| RemoteBashError::execution(format!("failed to echo {name}: {e}")))?;
    }

    Ok(captured)
}

/// Read a stream to completion in one piece, with no local echo
async fn read_all(mut stream: ByteStream, name: &'static str) -> Result<String> {
    let mut bytes = Vec::new();
    stream
        .read_to_end(&mut bytes)
        .await
        .map_err(|e| RemoteBashError::execution(format!("failed to read remote {name}: {e}")))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::task::{Context, Poll};

    use async_trait::async_trait;
    use tokio::io::AsyncRead;

    use super::*;
    use crate::ssh::transport::RemoteProcess;

    /// Scripted behavior for one mock invocation
    #[derive(Clone, Default)]
    struct Script {
        stdout: String,
        stderr: String,
        exit_status: u32,
        fail_spawn: bool,
        fail_wait: bool,
        fail_stdout_stream: bool,
        /// When set, stdout is `ran:<command>` like a remote echo harness
        echo_command: bool,
    }

    #[derive(Default)]
    struct MockState {
        connects: AtomicUsize,
        closes: AtomicUsize,
        spawned: Mutex<Vec<String>>,
        last_params: Mutex<Option<ConnectParams>>,
    }

    struct MockTransport {
        script: Script,
        state: Arc<MockState>,
    }

    impl MockTransport {
        fn new(script: Script) -> (Arc<MockState>, Arc<Self>) {
            let state = Arc::new(MockState::default());
            let transport = Arc::new(Self {
                script,
                state: Arc::clone(&state),
            });
            (state, transport)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&self, params: ConnectParams) -> Result<Box<dyn Connection>> {
            self.state.connects.fetch_add(1, Ordering::SeqCst);
            *self.state.last_params.lock().unwrap() = Some(params);
            Ok(Box::new(MockConnection {
                script: self.script.clone(),
                state: Arc::clone(&self.state),
            }))
        }
    }

    struct MockConnection {
        script: Script,
        state: Arc<MockState>,
    }

    #[async_trait]
    impl Connection for MockConnection {
        async fn spawn(&mut self, command: &str) -> Result<Box<dyn RemoteProcess>> {
            if self.script.fail_spawn {
                return Err(RemoteBashError::execution("spawn refused"));
            }
            self.state.spawned.lock().unwrap().push(command.to_string());

            let stdout = if self.script.echo_command {
                format!("ran:{command}")
            } else {
                self.script.stdout.clone()
            };
            let stdout: ByteStream = if self.script.fail_stdout_stream {
                Box::new(FailingReader)
            } else {
                Box::new(Cursor::new(stdout.into_bytes()))
            };

            Ok(Box::new(MockProcess {
                stdout: Some(stdout),
                stderr: Some(Box::new(Cursor::new(self.script.stderr.clone().into_bytes()))),
                exit_status: self.script.exit_status,
                fail_wait: self.script.fail_wait,
            }))
        }

        async fn close(&mut self) -> Result<()> {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct MockProcess {
        stdout: Option<ByteStream>,
        stderr: Option<ByteStream>,
        exit_status: u32,
        fail_wait: bool,
    }

    #[async_trait]
    impl RemoteProcess for MockProcess {
        fn take_stdout(&mut self) -> ByteStream {
            self.stdout.take().unwrap()
        }

        fn take_stderr(&mut self) -> ByteStream {
            self.stderr.take().unwrap()
        }

        async fn wait(&mut self) -> Result<u32> {
            if self.fail_wait {
                return Err(RemoteBashError::execution("wait failed"));
            }
            Ok(self.exit_status)
        }
    }

    /// Stream that fails on the first read
    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Err(std::io::Error::other("stream torn down")))
        }
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn executor(config: &tempfile::NamedTempFile, transport: Arc<MockTransport>) -> RemoteExecutor {
        RemoteExecutor::new()
            .with_config_path(config.path())
            .with_transport(transport)
    }

    #[tokio::test]
    async fn test_non_streaming_run_captures_output() {
        let config = write_config("Host demo\nHostName 127.0.0.1\n");
        let (state, transport) = MockTransport::new(Script {
            echo_command: true,
            ..Script::default()
        });

        let result = executor(&config, transport)
            .run(ExecRequest::new("demo", "echo ok").with_stream_output(false))
            .await
            .unwrap();

        assert_eq!(result.exit_status, 0);
        assert_eq!(result.stdout, "ran:echo ok");
        assert_eq!(result.stderr, "");
        assert!(result.finished_at >= result.started_at);
        assert_eq!(state.spawned.lock().unwrap().as_slice(), ["echo ok"]);
        assert_eq!(state.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_streaming_run_accumulates_lines_in_order() {
        let config = write_config("Host demo\nHostName 127.0.0.1\n");
        let (state, transport) = MockTransport::new(Script {
            stdout: "line one\nline two\nno newline".to_string(),
            stderr: "oops\n".to_string(),
            ..Script::default()
        });

        let result = executor(&config, transport)
            .run(ExecRequest::new("demo", "uptime"))
            .await
            .unwrap();

        assert_eq!(result.stdout, "line one\nline two\nno newline");
        assert_eq!(result.stderr, "oops\n");
        assert_eq!(state.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exit_status_passthrough() {
        let config = write_config("Host demo\nHostName 127.0.0.1\n");
        let (_state, transport) = MockTransport::new(Script {
            exit_status: 7,
            ..Script::default()
        });

        let result = executor(&config, transport)
            .run(ExecRequest::new("demo", "false").with_stream_output(false))
            .await
            .unwrap();
        assert_eq!(result.exit_status, 7);
    }

    #[tokio::test]
    async fn test_resolved_params_reach_transport() {
        let config = write_config(
            &[
                "Host demo",
                "HostName 10.0.0.1",
                "User ubuntu",
                "Port 2222",
                "IdentityFile ~/.ssh/id_demo",
                "ProxyCommand ssh -W %h:%p jump",
            ]
            .join("\n"),
        );
        let (state, transport) = MockTransport::new(Script::default());

        executor(&config, transport)
            .run(
                ExecRequest::new("demo", "uptime")
                    .with_stream_output(false)
                    .with_timeout(Duration::from_secs(3)),
            )
            .await
            .unwrap();

        let params = state.last_params.lock().unwrap().clone().unwrap();
        assert_eq!(params.host, "10.0.0.1");
        assert_eq!(params.port, 2222);
        assert_eq!(params.user.as_deref(), Some("ubuntu"));
        assert_eq!(params.identity_files, vec!["~/.ssh/id_demo".to_string()]);
        assert_eq!(params.proxy_command.as_deref(), Some("ssh -W %h:%p jump"));
        assert_eq!(params.timeout, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_plain_alias_used_as_target_when_no_hostname() {
        let config = write_config("# empty\n");
        let (state, transport) = MockTransport::new(Script::default());

        executor(&config, transport)
            .run(ExecRequest::new("my-host.example", "uptime").with_stream_output(false))
            .await
            .unwrap();

        let params = state.last_params.lock().unwrap().clone().unwrap();
        assert_eq!(params.host, "my-host.example");
        assert_eq!(params.port, 22);
        assert_eq!(params.user, None);
    }

    #[tokio::test]
    async fn test_untrusted_alias_rejected_before_connect() {
        let config = write_config("# empty\n");
        for alias in ["evil;rm -rf /", "has space", "a|b", "$(boom)", ""] {
            let (state, transport) = MockTransport::new(Script::default());
            let err = executor(&config, transport)
                .run(ExecRequest::new(alias, "uptime"))
                .await
                .unwrap_err();

            assert!(matches!(err, RemoteBashError::UntrustedHostAlias(_)), "{alias:?}");
            assert_eq!(state.connects.load(Ordering::SeqCst), 0, "{alias:?}");
        }
    }

    #[tokio::test]
    async fn test_hostname_override_bypasses_alias_validation() {
        let config = write_config("Host weird!alias\nHostName 10.0.0.5\n");
        let (state, transport) = MockTransport::new(Script::default());

        executor(&config, transport)
            .run(ExecRequest::new("weird!alias", "uptime").with_stream_output(false))
            .await
            .unwrap();

        let params = state.last_params.lock().unwrap().clone().unwrap();
        assert_eq!(params.host, "10.0.0.5");
    }

    #[tokio::test]
    async fn test_missing_config_fails_before_connect() {
        let (state, transport) = MockTransport::new(Script::default());
        let err = RemoteExecutor::new()
            .with_config_path("/nonexistent/ssh_config")
            .with_transport(transport)
            .run(ExecRequest::new("demo", "uptime"))
            .await
            .unwrap_err();

        assert!(matches!(err, RemoteBashError::ConfigNotFound(_)));
        assert_eq!(state.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_close_runs_once_on_spawn_failure() {
        let config = write_config("Host demo\nHostName 127.0.0.1\n");
        let (state, transport) = MockTransport::new(Script {
            fail_spawn: true,
            ..Script::default()
        });

        let err = executor(&config, transport)
            .run(ExecRequest::new("demo", "uptime"))
            .await
            .unwrap_err();

        assert!(matches!(err, RemoteBashError::Execution(_)));
        assert_eq!(state.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_runs_once_on_drain_failure() {
        let config = write_config("Host demo\nHostName 127.0.0.1\n");
        let (state, transport) = MockTransport::new(Script {
            fail_stdout_stream: true,
            stderr: "partial\n".to_string(),
            ..Script::default()
        });

        let err = executor(&config, transport)
            .run(ExecRequest::new("demo", "uptime"))
            .await
            .unwrap_err();

        assert!(matches!(err, RemoteBashError::Execution(_)));
        assert_eq!(state.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_runs_once_on_wait_failure() {
        let config = write_config("Host demo\nHostName 127.0.0.1\n");
        let (state, transport) = MockTransport::new(Script {
            fail_wait: true,
            ..Script::default()
        });

        let err = executor(&config, transport)
            .run(ExecRequest::new("demo", "uptime").with_stream_output(false))
            .await
            .unwrap_err();

        assert!(matches!(err, RemoteBashError::Execution(_)));
        assert_eq!(state.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exec_request_deserialize_defaults() {
        let request: ExecRequest =
            serde_json::from_str(r#"{"host_alias": "demo", "command": "uptime"}"#).unwrap();
        assert_eq!(request.host_alias, "demo");
        assert_eq!(request.command, "uptime");
        assert_eq!(request.timeout, Duration::from_secs(10));
        assert!(request.stream_output);
    }

    #[test]
    fn test_exec_request_deserialize_explicit_fields() {
        let request: ExecRequest = serde_json::from_str(
            r#"{"host_alias": "demo", "command": "uptime", "timeout": 2.5, "stream_output": false}"#,
        )
        .unwrap();
        assert_eq!(request.timeout, Duration::from_secs_f64(2.5));
        assert!(!request.stream_output);
    }

    #[test]
    fn test_exec_request_rejects_non_positive_timeout() {
        let result: std::result::Result<ExecRequest, _> = serde_json::from_str(
            r#"{"host_alias": "demo", "command": "uptime", "timeout": -1.0}"#,
        );
        assert!(result.is_err());
    }
}
