// ABOUTME: Abstractions over the SSH transport, its channels, and the SFTP sub-client.
// ABOUTME: The russh backend implements these; tests substitute in-memory fakes.

use super::auth::ClientConfig;
use super::error::Result;
use super::pty::PtyRequest;
use async_trait::async_trait;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

pub type ByteReader = Pin<Box<dyn AsyncRead + Send>>;
pub type ByteWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Establishes authenticated transports.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, host: &str, port: u16, config: &ClientConfig)
    -> Result<Arc<dyn Transport>>;
}

/// One authenticated connection, multiplexed into channels.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new session channel. Every operation gets its own.
    async fn open_session(&self) -> Result<Box<dyn SessionChannel>>;

    /// Start the SFTP subsystem on a dedicated channel.
    async fn open_file_transfer(&self) -> Result<Arc<dyn FileTransfer>>;

    /// True once the connection is gone, whether we closed it or the server did.
    fn is_closed(&self) -> bool;

    async fn close(&self) -> Result<()>;
}

/// A single-use session channel.
///
/// Methods that run a command consume the channel, so a channel can never
/// carry a second command.
#[async_trait]
pub trait SessionChannel: Send {
    /// Run `command`, collecting stdout and stderr interleaved in arrival order.
    async fn combined_output(self: Box<Self>, command: &str) -> Result<CommandOutput>;

    async fn request_pty(&mut self, pty: &PtyRequest) -> Result<()>;

    /// Hand out the channel's stdin/stdout/stderr pipes. Callable once.
    fn attach_streams(&mut self) -> Result<ChannelStreams>;

    /// Run `command` as the foreground job, pumping the attached pipes until it exits.
    async fn run(self: Box<Self>, command: &str) -> Result<ExitStatus>;

    async fn close(self: Box<Self>) -> Result<()>;
}

/// Remote file access over the SFTP sub-client.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Open `path` for writing, creating or truncating it.
    async fn create(&self, path: &str) -> Result<ByteWriter>;

    /// Open `path` for reading.
    async fn open(&self, path: &str) -> Result<ByteReader>;

    async fn close(&self) -> Result<()>;
}

/// Channel-side ends of an interactive session's standard streams.
pub struct ChannelStreams {
    pub stdin: ByteWriter,
    pub stdout: ByteReader,
    pub stderr: ByteReader,
}

/// Captured result of `SessionChannel::combined_output`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub output: Vec<u8>,
    pub status: ExitStatus,
}

/// How a remote command finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    /// The server sent `exit-status`.
    Exited(u32),
    /// The server sent `exit-signal` instead, e.g. "TERM".
    Signaled(String),
}

impl ExitStatus {
    /// Numeric exit code. Signals map to 128 + signal number, as shells report them.
    pub fn code(&self) -> u32 {
        match self {
            ExitStatus::Exited(code) => *code,
            ExitStatus::Signaled(name) => 128 + signal_number(name),
        }
    }

    pub fn success(&self) -> bool {
        self.code() == 0
    }

    pub fn signal(&self) -> Option<&str> {
        match self {
            ExitStatus::Exited(_) => None,
            ExitStatus::Signaled(name) => Some(name),
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exit status {}", code),
            ExitStatus::Signaled(name) => write!(f, "killed by signal {}", name),
        }
    }
}

fn signal_number(name: &str) -> u32 {
    match name.trim_start_matches("SIG") {
        "HUP" => 1,
        "INT" => 2,
        "QUIT" => 3,
        "ILL" => 4,
        "ABRT" => 6,
        "FPE" => 8,
        "KILL" => 9,
        "USR1" => 10,
        "SEGV" => 11,
        "USR2" => 12,
        "PIPE" => 13,
        "ALRM" => 14,
        "TERM" => 15,
        _ => 0,
    }
}
