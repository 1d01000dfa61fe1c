// ABOUTME: Interactive session: pty allocation plus live stdin/stdout/stderr relays.
// ABOUTME: Drives Created -> PtyRequested -> StreamsAttached -> Running -> Closed for one command.

use super::client::RemoteClient;
use super::error::{Error, Result};
use super::pty::PtyRequest;
use super::transport::{ByteReader, ByteWriter, ExitStatus, SessionChannel};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;

/// How long `close` waits for output relays to drain before aborting them.
const RELAY_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    PtyRequested,
    StreamsAttached,
    Running,
    Closed,
}

/// Local ends of the three relays.
pub struct LocalStreams {
    pub stdin: ByteReader,
    pub stdout: ByteWriter,
    pub stderr: ByteWriter,
}

impl LocalStreams {
    pub fn new(
        stdin: impl AsyncRead + Send + 'static,
        stdout: impl AsyncWrite + Send + 'static,
        stderr: impl AsyncWrite + Send + 'static,
    ) -> Self {
        Self {
            stdin: Box::pin(stdin),
            stdout: Box::pin(stdout),
            stderr: Box::pin(stderr),
        }
    }

    /// The process's own standard streams.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout(), tokio::io::stderr())
    }
}

/// One foreground command on its own channel, with relayed streams.
pub struct InteractiveSession {
    channel: Option<Box<dyn SessionChannel>>,
    state: SessionState,
    pty_allocated: bool,
    stdin_relay: Option<JoinHandle<()>>,
    output_relays: Vec<JoinHandle<()>>,
}

impl InteractiveSession {
    pub async fn open(client: &RemoteClient) -> Result<Self> {
        Ok(Self::from_channel(client.open_session().await?))
    }

    pub fn from_channel(channel: Box<dyn SessionChannel>) -> Self {
        Self {
            channel: Some(channel),
            state: SessionState::Created,
            pty_allocated: false,
            stdin_relay: None,
            output_relays: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn pty_allocated(&self) -> bool {
        self.pty_allocated
    }

    /// Ask for a pseudo-terminal. A refusal is logged and the session carries
    /// on without one; the return value says whether a pty was granted.
    pub async fn request_pty(&mut self, pty: &PtyRequest) -> bool {
        let Some(channel) = self.channel.as_mut() else {
            return false;
        };
        self.state = SessionState::PtyRequested;

        match channel.request_pty(pty).await {
            Ok(()) => {
                tracing::debug!("allocated {} pty {}x{}", pty.term, pty.cols, pty.rows);
                self.pty_allocated = true;
            }
            Err(e) => {
                tracing::warn!("request for pseudo terminal failed, continuing without: {}", e);
            }
        }
        self.pty_allocated
    }

    /// Start the stdin, stdout and stderr relays. On failure the session is
    /// closed and no command will run.
    pub async fn attach(&mut self, local: LocalStreams) -> Result<()> {
        let Some(channel) = self.channel.as_mut() else {
            return Err(Error::ChannelClosed);
        };

        let streams = match channel.attach_streams() {
            Ok(streams) => streams,
            Err(e) => {
                tracing::warn!("unable to set up session streams: {}", e);
                self.close().await;
                return Err(e);
            }
        };

        let LocalStreams {
            stdin,
            stdout,
            stderr,
        } = local;
        self.stdin_relay = Some(spawn_relay("stdin", stdin, streams.stdin));
        self.output_relays
            .push(spawn_relay("stdout", streams.stdout, stdout));
        self.output_relays
            .push(spawn_relay("stderr", streams.stderr, stderr));

        self.state = SessionState::StreamsAttached;
        Ok(())
    }

    /// Run the foreground command and block until it ends. The session is
    /// closed afterwards whatever the outcome.
    pub async fn run(&mut self, command: &str) -> Result<ExitStatus> {
        let Some(channel) = self.channel.take() else {
            return Err(Error::ChannelClosed);
        };
        self.state = SessionState::Running;
        tracing::debug!("running foreground command: {}", command);

        let outcome = channel.run(command).await;
        if let Err(e) = &outcome {
            tracing::warn!("unable to run command `{}`: {}", command, e);
        }

        self.close().await;
        outcome
    }

    /// Request a pty, attach the relays, and run `command`.
    pub async fn execute(
        &mut self,
        pty: &PtyRequest,
        local: LocalStreams,
        command: &str,
    ) -> Result<ExitStatus> {
        self.request_pty(pty).await;
        self.attach(local).await?;
        self.run(command).await
    }

    /// Close the channel if still held and stop the relays. Idempotent.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                tracing::debug!("channel close failed: {}", e);
            }
        }

        // Local stdin may never reach EOF
        if let Some(stdin) = self.stdin_relay.take() {
            stdin.abort();
        }

        let outputs: Vec<_> = self.output_relays.drain(..).collect();
        if !outputs.is_empty() {
            let aborts: Vec<_> = outputs.iter().map(JoinHandle::abort_handle).collect();
            let drained =
                tokio::time::timeout(RELAY_DRAIN_TIMEOUT, futures::future::join_all(outputs)).await;
            if drained.is_err() {
                tracing::debug!("output relays did not drain in time, aborting");
                aborts.iter().for_each(|handle| handle.abort());
            }
        }

        self.state = SessionState::Closed;
    }
}

impl Drop for InteractiveSession {
    fn drop(&mut self) {
        if let Some(stdin) = self.stdin_relay.take() {
            stdin.abort();
        }
        for relay in self.output_relays.drain(..) {
            relay.abort();
        }
    }
}

/// Open a session on `client` and run `command` in the foreground.
pub async fn run_interactive(
    client: &RemoteClient,
    command: &str,
    pty: &PtyRequest,
    local: LocalStreams,
) -> Result<ExitStatus> {
    let mut session = InteractiveSession::open(client).await?;
    session.execute(pty, local, command).await
}

fn spawn_relay(name: &'static str, mut reader: ByteReader, mut writer: ByteWriter) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::io::copy(&mut reader, &mut writer).await {
            Ok(bytes) => tracing::debug!("{} relay finished after {} bytes", name, bytes),
            Err(e) => tracing::debug!("{} relay stopped: {}", name, e),
        }
        let _ = writer.shutdown().await;
    })
}
