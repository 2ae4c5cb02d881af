//! SSH client config resolution
//!
//! Resolves per-alias connection parameters from an OpenSSH-style client
//! configuration file (`~/.ssh/config`). Supports `Host` blocks with glob
//! patterns plus the `HostName`, `User`, `Port`, `IdentityFile`, and
//! `ProxyCommand` directives. `Include` and `Match` directives are not
//! interpreted; files relying on them get a best-effort literal parse.

use std::fs;
use std::path::Path;

use glob::Pattern;
use tracing::{debug, warn};

use crate::error::{RemoteBashError, Result};

/// Connection parameters resolved for one host alias
///
/// First-seen value wins for every field except `identity_files`, which
/// accumulates across all matching `Host` blocks in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHostConfig {
    /// Real host name to connect to (falls back to the alias if absent)
    pub hostname: Option<String>,

    /// SSH port (default: 22)
    pub port: u16,

    /// Remote username
    pub user: Option<String>,

    /// Identity file paths, in file order, duplicates included
    pub identity_files: Vec<String>,

    /// Command to open the transport through a proxy/jump host
    pub proxy_command: Option<String>,
}

impl Default for ResolvedHostConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            port: 22,
            user: None,
            identity_files: Vec::new(),
            proxy_command: None,
        }
    }
}

/// Resolve connection parameters for `host_alias` from the config file at
/// `config_path`.
///
/// Resolution is pure: the same file and alias always yield the same
/// `ResolvedHostConfig`. Blank lines and `#` comments are skipped, and
/// directives are only interpreted while the most recent `Host` line has a
/// pattern matching the alias.
///
/// # Errors
/// * `RemoteBashError::ConfigNotFound` - config file does not exist
/// * `RemoteBashError::Io` - config file exists but cannot be read
pub fn resolve(config_path: &Path, host_alias: &str) -> Result<ResolvedHostConfig> {
    if !config_path.exists() {
        return Err(RemoteBashError::ConfigNotFound(config_path.to_path_buf()));
    }

    let contents = fs::read_to_string(config_path)?;
    let resolved = resolve_from_str(&contents, host_alias);

    debug!(
        "Resolved '{}' from {}: hostname={:?}, port={}, user={:?}, {} identity file(s), proxy={:?}",
        host_alias,
        config_path.display(),
        resolved.hostname,
        resolved.port,
        resolved.user,
        resolved.identity_files.len(),
        resolved.proxy_command,
    );

    Ok(resolved)
}

/// Parse config text and collect the directives active for `host_alias`.
fn resolve_from_str(contents: &str, host_alias: &str) -> ResolvedHostConfig {
    let mut resolved = ResolvedHostConfig::default();
    let mut port_seen = false;
    let mut current_matches = false;

    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut tokens = line.split_whitespace();
        let first = match tokens.next() {
            Some(token) => token,
            None => continue,
        };

        if first.eq_ignore_ascii_case("host") {
            let patterns: Vec<&str> = tokens.collect();
            // A bare `Host` with no patterns is malformed and skipped like
            // any other valueless directive.
            if !patterns.is_empty() {
                current_matches = patterns
                    .iter()
                    .any(|pattern| alias_matches(host_alias, pattern));
            }
            continue;
        }

        if !current_matches {
            continue;
        }

        // Key and trimmed remainder, separated by the first whitespace run.
        let mut parts = line.splitn(2, char::is_whitespace);
        let key = match parts.next() {
            Some(key) => key.to_ascii_lowercase(),
            None => continue,
        };
        let value = match parts.next().map(str::trim) {
            Some(value) if !value.is_empty() => value,
            _ => continue,
        };

        match key.as_str() {
            "hostname" => {
                if resolved.hostname.is_none() {
                    resolved.hostname = Some(value.to_string());
                }
            }
            "user" => {
                if resolved.user.is_none() {
                    resolved.user = Some(value.to_string());
                }
            }
            "port" => {
                if !port_seen {
                    port_seen = true;
                    match value.parse::<u16>() {
                        Ok(port) => resolved.port = port,
                        Err(_) => {
                            warn!("Ignoring unparseable Port value '{}'", value);
                        }
                    }
                }
            }
            "proxycommand" => {
                if resolved.proxy_command.is_none() {
                    resolved.proxy_command = Some(value.to_string());
                }
            }
            "identityfile" => {
                resolved.identity_files.push(value.to_string());
            }
            _ => {}
        }
    }

    resolved
}

/// Glob match of `alias` against a single `Host` pattern (case-sensitive,
/// shell filename semantics: `*`, `?`, character classes). A pattern that
/// fails to compile matches nothing.
fn alias_matches(alias: &str, pattern: &str) -> bool {
    match Pattern::new(pattern) {
        Ok(pattern) => pattern.matches(alias),
        Err(e) => {
            debug!("Skipping malformed Host pattern '{}': {}", pattern, e);
            false
        }
    }
}
