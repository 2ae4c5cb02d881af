//! Error types for remote-bash

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for remote-bash
#[derive(Debug, Error)]
pub enum RemoteBashError {
    /// SSH client config file does not exist at the given path
    #[error("SSH config not found: {0}")]
    ConfigNotFound(PathBuf),

    /// Host alias failed the safety allow-list and no HostName was resolved
    #[error("untrusted host alias '{0}': only letters, digits, hyphens, and dots are allowed")]
    UntrustedHostAlias(String),

    /// SSH connection failed (timeout, DNS, refused, or authentication)
    #[error("SSH connection error: {0}")]
    Connection(String),

    /// Unexpected failure during spawn/drain/wait
    #[error("remote execution error: {0}")]
    Execution(String),

    /// Invalid parameters provided
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH key loading/parsing error
    #[error("SSH key error: {0}")]
    SshKey(String),
}

/// Result type alias using RemoteBashError
pub type Result<T> = std::result::Result<T, RemoteBashError>;

impl RemoteBashError {
    /// Create a connection error from a string
    pub fn connection(msg: impl Into<String>) -> Self {
        RemoteBashError::Connection(msg.into())
    }

    /// Create an execution error from a string
    pub fn execution(msg: impl Into<String>) -> Self {
        RemoteBashError::Execution(msg.into())
    }

    /// Create an invalid params error from a string
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        RemoteBashError::InvalidParams(msg.into())
    }
}
