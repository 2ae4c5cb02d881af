//! russh-backed transport
//!
//! Production implementation of the `Transport` boundary: opens one SSH
//! connection per invocation (directly or through a `ProxyCommand` child),
//! authenticates with resolved identity files or the running ssh-agent, and
//! exposes spawned commands as demultiplexed stdout/stderr byte streams.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use russh::{Channel, ChannelMsg, Disconnect};
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::handler::ClientHandler;
use super::transport::{ByteStream, ConnectParams, Connection, RemoteProcess, Transport};
use crate::error::{RemoteBashError, Result};

/// Capacity of each in-memory pipe between the channel demultiplexer and a
/// stream reader.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Transport backed by the russh client library
#[derive(Debug, Clone, Default)]
pub struct RusshTransport;

impl RusshTransport {
    /// Create a new russh transport
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for RusshTransport {
    async fn connect(&self, params: ConnectParams) -> Result<Box<dyn Connection>> {
        let config = Arc::new(client::Config::default());
        let username = params.user.clone().unwrap_or_else(whoami::username);

        let (mut session, proxy_child) = match params.proxy_command {
            Some(ref proxy) => {
                let (session, child) =
                    connect_via_proxy(config, &params, proxy, &username).await?;
                (session, Some(child))
            }
            None => (connect_direct(config, &params).await?, None),
        };

        authenticate(&mut session, &username, &params.identity_files).await?;

        info!(
            "Successfully connected to {}@{}:{}",
            username, params.host, params.port
        );

        Ok(Box::new(RusshConnection {
            session: Some(session),
            proxy_child,
        }))
    }
}

/// Connect over a plain TCP socket with the caller-supplied timeout
async fn connect_direct(
    config: Arc<client::Config>,
    params: &ConnectParams,
) -> Result<Handle<ClientHandler>> {
    let addr = format!("{}:{}", params.host, params.port);
    info!("Connecting to SSH server {}...", addr);

    let connect_result = timeout(
        params.timeout,
        client::connect(config, addr.as_str(), ClientHandler::new()),
    )
    .await;

    match connect_result {
        Ok(Ok(session)) => Ok(session),
        Ok(Err(e)) => Err(RemoteBashError::connection(e.to_string())),
        Err(_) => Err(RemoteBashError::connection(format!(
            "Connection timeout after {:.1}s",
            params.timeout.as_secs_f64()
        ))),
    }
}

/// Connect through a `ProxyCommand` child process, speaking SSH over the
/// child's stdin/stdout.
async fn connect_via_proxy(
    config: Arc<client::Config>,
    params: &ConnectParams,
    proxy_command: &str,
    username: &str,
) -> Result<(Handle<ClientHandler>, Child)> {
    let command = expand_proxy_tokens(proxy_command, &params.host, params.port, username);
    info!("Connecting via proxy command: {}", command);

    let mut child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| RemoteBashError::connection(format!("Failed to spawn proxy command: {e}")))?;

    let child_stdout = child
        .stdout
        .take()
        .ok_or_else(|| RemoteBashError::connection("Proxy command stdout was not captured"))?;
    let child_stdin = child
        .stdin
        .take()
        .ok_or_else(|| RemoteBashError::connection("Proxy command stdin was not captured"))?;
    let stream = tokio::io::join(child_stdout, child_stdin);

    let connect_result = timeout(
        params.timeout,
        client::connect_stream(config, stream, ClientHandler::new()),
    )
    .await;

    match connect_result {
        Ok(Ok(session)) => Ok((session, child)),
        Ok(Err(e)) => Err(RemoteBashError::connection(e.to_string())),
        Err(_) => Err(RemoteBashError::connection(format!(
            "Connection timeout after {:.1}s (proxy command)",
            params.timeout.as_secs_f64()
        ))),
    }
}

/// Authenticate with the SSH server
///
/// Tries each resolved identity file in order; with no identity files,
/// falls back to the running ssh-agent.
async fn authenticate(
    session: &mut Handle<ClientHandler>,
    username: &str,
    identity_files: &[String],
) -> Result<()> {
    if identity_files.is_empty() {
        debug!("No identity files resolved, trying ssh-agent");
        return authenticate_via_agent(session, username).await;
    }

    for path in identity_files {
        let key_path = expand_tilde(path);
        let key = match russh::keys::load_secret_key(&key_path, None) {
            Ok(key) => key,
            Err(e) => {
                warn!("Skipping identity file {}: {}", key_path.display(), e);
                continue;
            }
        };

        let hash = session
            .best_supported_rsa_hash()
            .await
            .map_err(|e| RemoteBashError::connection(e.to_string()))?
            .flatten();
        let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), hash);

        let auth_result = session
            .authenticate_publickey(username, key_with_alg)
            .await
            .map_err(|e| RemoteBashError::connection(format!("Authentication failed: {e}")))?;

        if auth_result.success() {
            info!("Key authentication successful ({})", key_path.display());
            return Ok(());
        }
        debug!("Identity file {} rejected by server", key_path.display());
    }

    Err(RemoteBashError::connection(
        "Authentication failed: all identity files were rejected",
    ))
}

/// Authenticate by offering every identity held by the running ssh-agent
async fn authenticate_via_agent(session: &mut Handle<ClientHandler>, username: &str) -> Result<()> {
    let mut agent = russh::keys::agent::client::AgentClient::connect_env()
        .await
        .map_err(|e| {
            RemoteBashError::connection(format!(
                "No identity files configured and ssh-agent is unavailable: {e}"
            ))
        })?;

    let identities = agent.request_identities().await.map_err(|e| {
        RemoteBashError::connection(format!("Failed to list ssh-agent identities: {e}"))
    })?;

    if identities.is_empty() {
        return Err(RemoteBashError::connection("ssh-agent holds no identities"));
    }

    for identity in identities {
        let hash = session
            .best_supported_rsa_hash()
            .await
            .map_err(|e| RemoteBashError::connection(e.to_string()))?
            .flatten();

        let auth_result = session
            .authenticate_publickey_with(username, identity, hash, &mut agent)
            .await
            .map_err(|e| RemoteBashError::connection(format!("Authentication failed: {e}")))?;

        if auth_result.success() {
            info!("ssh-agent authentication successful");
            return Ok(());
        }
    }

    Err(RemoteBashError::connection(
        "Authentication failed: all ssh-agent identities were rejected",
    ))
}

/// Expand `%h`, `%p`, `%r`, and `%%` tokens in a `ProxyCommand` value
fn expand_proxy_tokens(template: &str, host: &str, port: u16, user: &str) -> String {
    let mut expanded = String::with_capacity(template.len());
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            expanded.push(c);
            continue;
        }
        match chars.next() {
            Some('h') => expanded.push_str(host),
            Some('p') => expanded.push_str(&port.to_string()),
            Some('r') => expanded.push_str(user),
            Some('%') => expanded.push('%'),
            Some(other) => {
                expanded.push('%');
                expanded.push(other);
            }
            None => expanded.push('%'),
        }
    }
    expanded
}

/// Expand a leading `~/` to the local home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// One established russh connection, exclusively owned by a single
/// invocation
pub struct RusshConnection {
    /// Active session handle; taken on close so closing twice is a no-op
    session: Option<Handle<ClientHandler>>,

    /// Proxy command child, kept alive for the connection's lifetime
    proxy_child: Option<Child>,
}

#[async_trait]
impl Connection for RusshConnection {
    async fn spawn(&mut self, command: &str) -> Result<Box<dyn RemoteProcess>> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| RemoteBashError::connection("SSH connection not established"))?;

        let channel = session
            .channel_open_session()
            .await
            .map_err(|e| RemoteBashError::execution(format!("Failed to open channel: {e}")))?;

        // The command goes over verbatim, same as `ssh host command`.
        channel
            .exec(true, command)
            .await
            .map_err(|e| RemoteBashError::execution(format!("Failed to spawn command: {e}")))?;

        debug!("Spawned remote command: {}", command);
        Ok(Box::new(RusshProcess::start(channel)))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            if let Err(e) = session
                .disconnect(Disconnect::ByApplication, "", "")
                .await
            {
                debug!("Disconnect error (connection may already be down): {}", e);
            }
            info!("SSH connection closed");
        }

        if let Some(mut child) = self.proxy_child.take() {
            if let Err(e) = child.kill().await {
                debug!("Failed to kill proxy command child: {}", e);
            }
        }

        Ok(())
    }
}

/// A command spawned over a russh channel
///
/// A background task demultiplexes channel messages into a stdout pipe, a
/// stderr pipe, and the exit status; `wait` joins that task.
pub struct RusshProcess {
    stdout: Option<ByteStream>,
    stderr: Option<ByteStream>,
    demux: Option<JoinHandle<Option<u32>>>,
}

impl RusshProcess {
    fn start(mut channel: Channel<client::Msg>) -> Self {
        let (stdout_rd, mut stdout_wr) = tokio::io::duplex(PIPE_CAPACITY);
        let (stderr_rd, mut stderr_wr) = tokio::io::duplex(PIPE_CAPACITY);

        let demux = tokio::spawn(async move {
            let mut exit_status = None;
            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Data { data } => {
                        if stdout_wr.write_all(&data).await.is_err() {
                            debug!("stdout pipe closed, discarding remote data");
                        }
                    }
                    ChannelMsg::ExtendedData { data, ext } => {
                        // ext == 1 is stderr
                        let sink = if ext == 1 { &mut stderr_wr } else { &mut stdout_wr };
                        if sink.write_all(&data).await.is_err() {
                            debug!("output pipe closed, discarding remote data");
                        }
                    }
                    ChannelMsg::ExitStatus { exit_status: status } => {
                        exit_status = Some(status);
                    }
                    ChannelMsg::Eof | ChannelMsg::Close => {
                        // Keep draining until the channel ends; the exit
                        // status may arrive after EOF.
                    }
                    _ => {}
                }
            }
            // Dropping the writers signals EOF to both pipe readers.
            exit_status
        });

        Self {
            stdout: Some(Box::new(stdout_rd)),
            stderr: Some(Box::new(stderr_rd)),
            demux: Some(demux),
        }
    }
}

#[async_trait]
impl RemoteProcess for RusshProcess {
    fn take_stdout(&mut self) -> ByteStream {
        self.stdout.take().expect("stdout stream already taken")
    }

    fn take_stderr(&mut self) -> ByteStream {
        self.stderr.take().expect("stderr stream already taken")
    }

    async fn wait(&mut self) -> Result<u32> {
        let demux = self
            .demux
            .take()
            .ok_or_else(|| RemoteBashError::execution("remote process already waited on"))?;

        match demux.await {
            Ok(Some(status)) => {
                debug!("Remote command exited with status {}", status);
                Ok(status)
            }
            Ok(None) => Err(RemoteBashError::execution(
                "channel closed without reporting an exit status",
            )),
            Err(e) => Err(RemoteBashError::execution(format!(
                "output demultiplexer failed: {e}"
            ))),
        }
    }
}
