// ABOUTME: SSH client module: one connection multiplexed into exec, SFTP, and interactive channels.
// ABOUTME: Supports password or key authentication with pluggable host key trust policies.

mod auth;
mod client;
mod connection;
mod error;
mod host_key;
mod interactive;
mod pty;
mod runner;
mod russh_transport;
mod transport;

pub use auth::{AuthConfig, AuthMethod, ClientConfig, DEFAULT_KEY_FILE, DEFAULT_TIMEOUT, ResolvedAuth};
pub use client::{
    DEFAULT_PORT, ExecResult, RemoteClient, TransferFailure, TransferKind, TransferResult,
};
pub use connection::Connection;
pub use error::{Error, Result};
pub use host_key::HostKeyPolicy;
pub use interactive::{InteractiveSession, LocalStreams, SessionState, run_interactive};
pub use pty::PtyRequest;
pub use runner::{BatchReport, CommandExecutor, CommandReport, CommandRunner};
pub use russh_transport::RusshDialer;
pub use transport::{
    ByteReader, ByteWriter, ChannelStreams, CommandOutput, Dialer, ExitStatus, FileTransfer,
    SessionChannel, Transport,
};
