// ABOUTME: Transport implementation backed by russh and russh-sftp.
// ABOUTME: Dials, authenticates, and maps channel messages onto exit statuses and pipes.

use super::auth::{AuthMethod, ClientConfig};
use super::error::{Error, Result};
use super::host_key::HostKeyPolicy;
use super::pty::PtyRequest;
use super::transport::{
    ByteReader, ByteWriter, ChannelStreams, CommandOutput, Dialer, ExitStatus, FileTransfer,
    SessionChannel, Transport,
};
use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::keys::{PrivateKeyWithHashAlg, ssh_key};
use russh::{Channel, ChannelMsg, Disconnect, Sig};
use russh_sftp::client::SftpSession;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Buffer size of each in-memory pipe between a channel and its relays.
const PIPE_CAPACITY: usize = 64 * 1024;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// russh handler that defers host key decisions to the configured policy.
pub(crate) struct TrustPolicyHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl client::Handler for TrustPolicyHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(self.policy.verify(&self.host, self.port, server_public_key))
    }
}

/// Dials real SSH servers.
#[derive(Debug, Default, Clone, Copy)]
pub struct RusshDialer;

#[async_trait]
impl Dialer for RusshDialer {
    async fn dial(
        &self,
        host: &str,
        port: u16,
        config: &ClientConfig,
    ) -> Result<Arc<dyn Transport>> {
        let addr = format!("{}:{}", host, port);

        let russh_config = client::Config {
            keepalive_interval: Some(KEEPALIVE_INTERVAL),
            ..Default::default()
        };
        let handler = TrustPolicyHandler {
            host: host.to_string(),
            port,
            policy: config.host_key_policy.clone(),
        };

        let connecting = client::connect(Arc::new(russh_config), (host, port), handler);
        let mut handle = match tokio::time::timeout(config.timeout, connecting).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(russh::Error::UnknownKey)) => return Err(Error::HostKeyRejected { host: addr }),
            Ok(Err(e)) => {
                return Err(Error::Connect {
                    addr,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(Error::Connect {
                    addr,
                    reason: format!("timed out after {:?}", config.timeout),
                });
            }
        };

        if !authenticate(&mut handle, config).await? {
            return Err(Error::Auth {
                user: config.user.clone(),
            });
        }

        tracing::debug!("authenticated to {} as {}", addr, config.user);
        Ok(Arc::new(RusshTransport { handle }))
    }
}

async fn authenticate(handle: &mut Handle<TrustPolicyHandler>, config: &ClientConfig) -> Result<bool> {
    let result = match &config.auth {
        AuthMethod::Password(password) => handle
            .authenticate_password(config.user.as_str(), password.as_str())
            .await
            .map_err(Error::Protocol)?,
        AuthMethod::PublicKey(key) => {
            let hash_alg = handle
                .best_supported_rsa_hash()
                .await
                .map_err(Error::Protocol)?
                .flatten();
            handle
                .authenticate_publickey(
                    config.user.as_str(),
                    PrivateKeyWithHashAlg::new(Arc::clone(key), hash_alg),
                )
                .await
                .map_err(Error::Protocol)?
        }
    };
    Ok(result.success())
}

/// An authenticated russh connection.
struct RusshTransport {
    handle: Handle<TrustPolicyHandler>,
}

impl RusshTransport {
    async fn open_channel(&self) -> Result<Channel<Msg>> {
        self.handle
            .channel_open_session()
            .await
            .map_err(|e| Error::Channel(format!("failed to open channel: {}", e)))
    }
}

#[async_trait]
impl Transport for RusshTransport {
    async fn open_session(&self) -> Result<Box<dyn SessionChannel>> {
        let channel = self.open_channel().await?;
        tracing::debug!("opened session channel {:?}", channel.id());
        Ok(Box::new(RusshSession {
            channel,
            pipes: None,
        }))
    }

    async fn open_file_transfer(&self) -> Result<Arc<dyn FileTransfer>> {
        let channel = self.open_channel().await?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| Error::Subsystem(e.to_string()))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| Error::Subsystem(e.to_string()))?;
        Ok(Arc::new(RusshFileTransfer { sftp }))
    }

    fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    async fn close(&self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(Error::Protocol)
    }
}

/// Channel-side ends of the in-memory pipes bound to a session.
struct SessionPipes {
    stdin_rx: DuplexStream,
    stdout_tx: DuplexStream,
    stderr_tx: DuplexStream,
}

impl SessionPipes {
    fn pair() -> (Self, ChannelStreams) {
        let (stdin_local, stdin_rx) = tokio::io::duplex(PIPE_CAPACITY);
        let (stdout_tx, stdout_local) = tokio::io::duplex(PIPE_CAPACITY);
        let (stderr_tx, stderr_local) = tokio::io::duplex(PIPE_CAPACITY);
        (
            Self {
                stdin_rx,
                stdout_tx,
                stderr_tx,
            },
            ChannelStreams {
                stdin: Box::pin(stdin_local),
                stdout: Box::pin(stdout_local),
                stderr: Box::pin(stderr_local),
            },
        )
    }

    /// Pipes with nobody on the far side: stdin reads EOF, output is discarded.
    fn detached() -> Self {
        Self::pair().0
    }
}

struct RusshSession {
    channel: Channel<Msg>,
    pipes: Option<SessionPipes>,
}

impl RusshSession {
    async fn wait_for_reply(&mut self, request: &str) -> Result<()> {
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Success) => return Ok(()),
                Some(ChannelMsg::Failure) => {
                    return Err(Error::Channel(format!("{} request refused by server", request)));
                }
                Some(ChannelMsg::Close) | None => return Err(Error::ChannelClosed),
                Some(_) => {}
            }
        }
    }
}

#[async_trait]
impl SessionChannel for RusshSession {
    async fn combined_output(mut self: Box<Self>, command: &str) -> Result<CommandOutput> {
        self.channel
            .exec(true, command)
            .await
            .map_err(|e| Error::Channel(format!("failed to exec command: {}", e)))?;

        let mut output = Vec::new();
        let mut status = None;

        // Eof may arrive before the last data or the exit status, so only
        // Close ends the loop.
        while let Some(msg) = self.channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, .. } => output.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => {
                    status = Some(ExitStatus::Exited(exit_status));
                }
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    status = Some(ExitStatus::Signaled(signal_to_string(&signal_name)));
                }
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        let _ = self.channel.close().await;

        // A channel that closes without exit status was torn down abnormally
        let status = status.ok_or(Error::ChannelClosed)?;
        Ok(CommandOutput { output, status })
    }

    async fn request_pty(&mut self, pty: &PtyRequest) -> Result<()> {
        self.channel
            .request_pty(true, &pty.term, pty.cols, pty.rows, 0, 0, &pty.modes)
            .await
            .map_err(|e| Error::Channel(format!("pty request failed: {}", e)))?;
        self.wait_for_reply("pty").await
    }

    fn attach_streams(&mut self) -> Result<ChannelStreams> {
        if self.pipes.is_some() {
            return Err(Error::Channel("streams already attached".to_string()));
        }
        let (pipes, streams) = SessionPipes::pair();
        self.pipes = Some(pipes);
        Ok(streams)
    }

    async fn run(self: Box<Self>, command: &str) -> Result<ExitStatus> {
        let RusshSession { mut channel, pipes } = *self;
        let SessionPipes {
            mut stdin_rx,
            mut stdout_tx,
            mut stderr_tx,
        } = pipes.unwrap_or_else(SessionPipes::detached);

        channel
            .exec(true, command)
            .await
            .map_err(|e| Error::Channel(format!("failed to exec command: {}", e)))?;

        let mut buf = vec![0u8; PIPE_CAPACITY];
        let mut stdin_open = true;
        let mut status = None;

        loop {
            tokio::select! {
                r = stdin_rx.read(&mut buf), if stdin_open => {
                    match r {
                        Ok(0) => {
                            stdin_open = false;
                            let _ = channel.eof().await;
                        }
                        Ok(n) => {
                            if let Err(e) = channel.data(&buf[..n]).await {
                                tracing::debug!("channel stdin error: {}", e);
                                stdin_open = false;
                            }
                        }
                        Err(e) => {
                            tracing::debug!("stdin pipe read error: {}", e);
                            stdin_open = false;
                            let _ = channel.eof().await;
                        }
                    }
                }

                msg = channel.wait() => {
                    match msg {
                        Some(ChannelMsg::Data { ref data }) => forward(&mut stdout_tx, data).await,
                        Some(ChannelMsg::ExtendedData { ref data, ext: 1 }) => {
                            forward(&mut stderr_tx, data).await
                        }
                        Some(ChannelMsg::ExitStatus { exit_status }) => {
                            status = Some(ExitStatus::Exited(exit_status));
                        }
                        Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                            status = Some(ExitStatus::Signaled(signal_to_string(&signal_name)));
                        }
                        Some(ChannelMsg::Close) | None => break,
                        Some(_) => {}
                    }
                }
            }
        }

        // Dropping the write ends lets the output relays see EOF
        drop(stdout_tx);
        drop(stderr_tx);
        let _ = channel.close().await;

        status.ok_or(Error::ChannelClosed)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.channel
            .close()
            .await
            .map_err(|e| Error::Channel(format!("failed to close channel: {}", e)))
    }
}

async fn forward(pipe: &mut DuplexStream, data: &[u8]) {
    if let Err(e) = pipe.write_all(data).await {
        tracing::debug!("output pipe closed, dropping {} bytes: {}", data.len(), e);
    }
}

fn signal_to_string(signal: &Sig) -> String {
    match signal {
        Sig::Custom(name) => name.clone(),
        other => format!("{:?}", other),
    }
}

/// SFTP sub-client running on its own channel.
struct RusshFileTransfer {
    sftp: SftpSession,
}

#[async_trait]
impl FileTransfer for RusshFileTransfer {
    async fn create(&self, path: &str) -> Result<ByteWriter> {
        let file = self
            .sftp
            .create(path)
            .await
            .map_err(|e| Error::transfer(path, std::io::Error::other(e.to_string())))?;
        Ok(Box::pin(file))
    }

    async fn open(&self, path: &str) -> Result<ByteReader> {
        let file = self
            .sftp
            .open(path)
            .await
            .map_err(|e| Error::transfer(path, std::io::Error::other(e.to_string())))?;
        Ok(Box::pin(file))
    }

    async fn close(&self) -> Result<()> {
        self.sftp
            .close()
            .await
            .map_err(|e| Error::Subsystem(e.to_string()))
    }
}
