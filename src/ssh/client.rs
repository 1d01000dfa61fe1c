// ABOUTME: RemoteClient facade over one SSH connection.
// ABOUTME: Connect, exec, upload, download, and close, with results that survive partial failure.

use super::auth::AuthConfig;
use super::connection::Connection;
use super::error::{Error, Result};
use super::russh_transport::RusshDialer;
use super::transport::{ByteReader, ByteWriter, CommandOutput, Dialer, ExitStatus, SessionChannel};
use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Port dialed when the client was built with port 0.
pub const DEFAULT_PORT: u16 = 22;

const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// Output from a remote command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub command: String,
    /// Standard output and standard error, interleaved in arrival order.
    pub output: Vec<u8>,
    pub exit_code: u32,
    /// Set when the command was killed by a signal.
    pub exit_signal: Option<String>,
}

impl ExecResult {
    pub fn new(command: impl Into<String>, output: Vec<u8>, status: &ExitStatus) -> Self {
        Self {
            command: command.into(),
            output,
            exit_code: status.code(),
            exit_signal: status.signal().map(str::to_string),
        }
    }

    pub fn output_string(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output)
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into `Error::RemoteExit`.
    pub fn check(self) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::RemoteExit {
                command: self.command,
                code: self.exit_code,
            })
        }
    }
}

impl fmt::Display for ExecResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ExecResult(command: {:?}, exit_code: {})",
            self.command, self.exit_code
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Upload,
    Download,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferKind::Upload => f.write_str("upload"),
            TransferKind::Download => f.write_str("download"),
        }
    }
}

/// What a transfer moved. `bytes` counts everything written before any failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub kind: TransferKind,
    pub local: PathBuf,
    pub remote: String,
    pub bytes: u64,
}

impl TransferResult {
    fn new(kind: TransferKind, local: &Path, remote: &str) -> Self {
        Self {
            kind,
            local: local.to_path_buf(),
            remote: remote.to_string(),
            bytes: 0,
        }
    }
}

impl fmt::Display for TransferResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TransferResult(kind: {}, local: {:?}, remote: {:?}, bytes: {})",
            self.kind,
            self.local.display().to_string(),
            self.remote,
            self.bytes
        )
    }
}

/// A failed transfer together with the progress made before it failed.
#[derive(Debug, thiserror::Error)]
#[error("{kind} stopped after {bytes} bytes: {source}", kind = .result.kind, bytes = .result.bytes)]
pub struct TransferFailure {
    pub result: TransferResult,
    #[source]
    pub source: Error,
}

/// SSH client bound to one host. Operations share a single transport.
pub struct RemoteClient {
    host: String,
    port: u16,
    auth: AuthConfig,
    connection: Connection,
    dialer: Arc<dyn Dialer>,
}

impl fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteClient")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

impl RemoteClient {
    /// Validate parameters. Does not touch the network; call `connect` next.
    pub fn new(host: impl Into<String>, port: i64, auth: AuthConfig) -> Result<Self> {
        Self::with_dialer(host, port, auth, Arc::new(RusshDialer))
    }

    pub fn with_dialer(
        host: impl Into<String>,
        port: i64,
        auth: AuthConfig,
        dialer: Arc<dyn Dialer>,
    ) -> Result<Self> {
        let host: String = host.into();
        let host = host.trim().to_string();
        if host.is_empty() {
            return Err(Error::InvalidHostName);
        }
        let port = u16::try_from(port).map_err(|_| Error::InvalidPort(port))?;

        Ok(Self {
            host,
            port,
            auth,
            connection: Connection::new(),
            dialer,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port as configured. Zero means `DEFAULT_PORT` is dialed.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn auth(&self) -> &AuthConfig {
        &self.auth
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }

    fn dial_port(&self) -> u16 {
        if self.port == 0 { DEFAULT_PORT } else { self.port }
    }

    /// Dial and authenticate. A no-op while the current transport is live;
    /// a transport the server has closed is replaced.
    pub async fn connect(&self) -> Result<()> {
        let port = self.dial_port();
        let dialed = self
            .connection
            .connect_with(|| async {
                let config = self.auth.resolve_defaults().build_client_config()?;
                tracing::info!("connecting to {}:{} as {}", self.host, port, config.user);
                self.dialer.dial(&self.host, port, &config).await
            })
            .await?;
        if !dialed {
            tracing::info!("already connected to {}:{}", self.host, port);
        }
        Ok(())
    }

    /// Run `command` on its own channel and capture its combined output.
    ///
    /// A non-zero exit is reported in the result, not as an error.
    pub async fn exec(&self, command: &str) -> Result<ExecResult> {
        let channel = self.open_session().await?;
        let CommandOutput { output, status } = channel.combined_output(command).await?;
        tracing::debug!("`{}` finished with {}", command, status);
        Ok(ExecResult::new(command, output, &status))
    }

    /// Open a fresh session channel, e.g. for an interactive session.
    pub async fn open_session(&self) -> Result<Box<dyn SessionChannel>> {
        let transport = self.connection.transport().await?;
        transport.open_session().await
    }

    /// Copy a local file to `remote_path`, creating or truncating it.
    pub async fn upload(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
    ) -> std::result::Result<TransferResult, TransferFailure> {
        let mut result = TransferResult::new(TransferKind::Upload, local_path.as_ref(), remote_path);
        let outcome = self.upload_into(&mut result).await;
        finish_transfer(result, outcome)
    }

    async fn upload_into(&self, result: &mut TransferResult) -> Result<()> {
        let sftp = self.connection.file_transfer().await?;

        let local = tokio::fs::File::open(&result.local)
            .await
            .map_err(|e| Error::transfer(result.local.display().to_string(), e))?;
        let mut reader: ByteReader = Box::pin(local);
        let mut writer = sftp.create(&result.remote).await?;

        copy_counted(&mut reader, &mut writer, &mut result.bytes)
            .await
            .map_err(|failure| match failure {
                CopyFailure::Read(e) => Error::transfer(result.local.display().to_string(), e),
                CopyFailure::Write(e) => Error::transfer(result.remote.as_str(), e),
            })
    }

    /// Copy `remote_path` into a local file, creating or truncating it.
    pub async fn download(
        &self,
        remote_path: &str,
        local_path: impl AsRef<Path>,
    ) -> std::result::Result<TransferResult, TransferFailure> {
        let mut result =
            TransferResult::new(TransferKind::Download, local_path.as_ref(), remote_path);
        let outcome = self.download_into(&mut result).await;
        finish_transfer(result, outcome)
    }

    async fn download_into(&self, result: &mut TransferResult) -> Result<()> {
        let sftp = self.connection.file_transfer().await?;

        // Open the remote side first so a missing source leaves no empty local file
        let mut reader = sftp.open(&result.remote).await?;
        let local = tokio::fs::File::create(&result.local)
            .await
            .map_err(|e| Error::transfer(result.local.display().to_string(), e))?;
        let mut writer: ByteWriter = Box::pin(local);

        copy_counted(&mut reader, &mut writer, &mut result.bytes)
            .await
            .map_err(|failure| match failure {
                CopyFailure::Read(e) => Error::transfer(result.remote.as_str(), e),
                CopyFailure::Write(e) => Error::transfer(result.local.display().to_string(), e),
            })
    }

    /// Release the SFTP sub-client and the transport. Safe to call repeatedly.
    pub async fn close(&self) -> Result<()> {
        let was_connected = self.connection.is_connected().await;
        self.connection.close().await?;
        if was_connected {
            tracing::info!("closed connection to {}:{}", self.host, self.dial_port());
        }
        Ok(())
    }
}

fn finish_transfer(
    result: TransferResult,
    outcome: Result<()>,
) -> std::result::Result<TransferResult, TransferFailure> {
    match outcome {
        Ok(()) => {
            tracing::info!("{}", result);
            Ok(result)
        }
        Err(source) => {
            tracing::warn!("{} failed: {}", result, source);
            Err(TransferFailure { result, source })
        }
    }
}

/// Which side of a copy failed.
#[derive(Debug)]
enum CopyFailure {
    Read(std::io::Error),
    Write(std::io::Error),
}

/// Copy until EOF. `written` grows with every accepted write, including the
/// partial writes that precede an error.
async fn copy_counted(
    reader: &mut ByteReader,
    writer: &mut ByteWriter,
    written: &mut u64,
) -> std::result::Result<(), CopyFailure> {
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await.map_err(CopyFailure::Read)?;
        if n == 0 {
            break;
        }
        let mut offset = 0;
        while offset < n {
            let accepted = writer
                .write(&buf[offset..n])
                .await
                .map_err(CopyFailure::Write)?;
            if accepted == 0 {
                return Err(CopyFailure::Write(std::io::ErrorKind::WriteZero.into()));
            }
            offset += accepted;
            *written += accepted as u64;
        }
    }
    writer.flush().await.map_err(CopyFailure::Write)?;
    writer.shutdown().await.map_err(CopyFailure::Write)
}
