// ABOUTME: SSH-specific error types.
// ABOUTME: Covers validation, credentials, connection, channel, and transfer failures.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid parameters: hostname is empty")]
    InvalidHostName,

    #[error("invalid parameters: port must be in range 0 ~ 65535, got {0}")]
    InvalidPort(i64),

    #[error("failed to load key from {path}: {reason}")]
    Credential { path: PathBuf, reason: String },

    #[error("connection to {addr} failed: {reason}")]
    Connect { addr: String, reason: String },

    #[error("authentication failed for user {user}")]
    Auth { user: String },

    #[error("host key for {host} rejected by trust policy")]
    HostKeyRejected { host: String },

    #[error("not connected")]
    NotConnected,

    #[error("channel error: {0}")]
    Channel(String),

    #[error("channel closed unexpectedly without exit status")]
    ChannelClosed,

    #[error("file transfer subsystem unavailable: {0}")]
    Subsystem(String),

    #[error("transfer failed for {path}: {source}")]
    Transfer {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Only produced by `ExecResult::check`; `exec` reports exit codes as data.
    #[error("command `{command}` exited with status {code}")]
    RemoteExit { command: String, code: u32 },

    #[error("cancelled before completion")]
    Cancelled,

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn transfer(path: impl Into<String>, source: std::io::Error) -> Self {
        Error::Transfer {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
