// ABOUTME: In-memory SSH server fakes implementing the transport traits.
// ABOUTME: Scriptable command results, SFTP file store, and fault injection for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use rexec::ssh::{
    AuthConfig, ByteReader, ByteWriter, ChannelStreams, ClientConfig, CommandOutput, Dialer,
    Error, ExitStatus, FileTransfer, PtyRequest, RemoteClient, Result, SessionChannel, Transport,
};
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};

const PIPE_CAPACITY: usize = 16 * 1024;

/// How a dial attempt fails.
#[derive(Debug, Clone, Copy)]
pub enum DialFailure {
    Auth,
    Connect,
}

#[derive(Debug, Clone)]
enum Script {
    Reply(Vec<u8>, ExitStatus),
    ChannelError(String),
}

/// Shared state of one fake server. Every fake handle points back here.
#[derive(Default)]
pub struct MockServer {
    dial_failure: Mutex<Option<DialFailure>>,
    refuse_sessions: AtomicBool,
    refuse_pty: AtomicBool,
    refuse_attach: AtomicBool,
    scripts: Mutex<HashMap<String, Script>>,
    exec_delay: Mutex<Duration>,
    sftp_delay: Mutex<Duration>,
    write_limit: Mutex<Option<usize>>,
    read_limit: Mutex<Option<usize>>,
    dropped_through: AtomicUsize,
    files: Mutex<HashMap<String, Vec<u8>>>,
    in_flight: AtomicUsize,

    pub dials: AtomicUsize,
    pub transport_closes: AtomicUsize,
    pub sessions_opened: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
    pub file_transfers_created: AtomicUsize,
    pub file_transfer_closes: AtomicUsize,
    pub commands_run: Mutex<Vec<String>>,
    pub pty_requests: Mutex<Vec<PtyRequest>>,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Client with password credentials wired to this server.
    pub fn client(self: &Arc<Self>, host: &str, port: i64) -> Result<RemoteClient> {
        let auth = AuthConfig::new().user("tester").password("secret");
        RemoteClient::with_dialer(host, port, auth, Arc::new(MockDialer::new(Arc::clone(self))))
    }

    pub fn fail_dial(&self, failure: DialFailure) {
        *self.dial_failure.lock() = Some(failure);
    }

    pub fn script(&self, command: &str, output: &[u8], status: ExitStatus) {
        self.scripts
            .lock()
            .insert(command.to_string(), Script::Reply(output.to_vec(), status));
    }

    /// Make `command` fail at the channel level instead of running.
    pub fn fail_command(&self, command: &str, reason: &str) {
        self.scripts
            .lock()
            .insert(command.to_string(), Script::ChannelError(reason.to_string()));
    }

    pub fn refuse_sessions(&self) {
        self.refuse_sessions.store(true, Ordering::SeqCst);
    }

    pub fn refuse_pty(&self) {
        self.refuse_pty.store(true, Ordering::SeqCst);
    }

    pub fn refuse_attach(&self) {
        self.refuse_attach.store(true, Ordering::SeqCst);
    }

    pub fn exec_delay(&self, delay: Duration) {
        *self.exec_delay.lock() = delay;
    }

    /// Slow down the SFTP handshake so concurrent first transfers overlap.
    pub fn sftp_delay(&self, delay: Duration) {
        *self.sftp_delay.lock() = delay;
    }

    /// Reject writes once a remote file reaches `limit` bytes.
    pub fn limit_writes(&self, limit: usize) {
        *self.write_limit.lock() = Some(limit);
    }

    /// Fail remote reads after `limit` bytes, as if the link went down mid-download.
    pub fn limit_reads(&self, limit: usize) {
        *self.read_limit.lock() = Some(limit);
    }

    /// Close every transport dialed so far from the server side.
    pub fn drop_connections(&self) {
        self.dropped_through
            .store(self.dials.load(Ordering::SeqCst), Ordering::SeqCst);
    }

    pub fn put_file(&self, path: &str, contents: &[u8]) {
        self.files.lock().insert(path.to_string(), contents.to_vec());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().get(path).cloned()
    }

    fn script_for(&self, command: &str) -> Script {
        self.scripts.lock().get(command).cloned().unwrap_or_else(|| {
            Script::Reply(format!("{command}\n").into_bytes(), ExitStatus::Exited(0))
        })
    }

    fn status_for(&self, command: &str) -> ExitStatus {
        match self.script_for(command) {
            Script::Reply(_, status) => status,
            Script::ChannelError(_) => ExitStatus::Exited(0),
        }
    }
}

/// Current value of one of the server's counters.
pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

pub struct MockDialer {
    server: Arc<MockServer>,
}

impl MockDialer {
    pub fn new(server: Arc<MockServer>) -> Self {
        Self { server }
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(
        &self,
        host: &str,
        port: u16,
        config: &ClientConfig,
    ) -> Result<Arc<dyn Transport>> {
        let id = self.server.dials.fetch_add(1, Ordering::SeqCst) + 1;
        match *self.server.dial_failure.lock() {
            Some(DialFailure::Auth) => {
                return Err(Error::Auth {
                    user: config.user.clone(),
                });
            }
            Some(DialFailure::Connect) => {
                return Err(Error::Connect {
                    addr: format!("{host}:{port}"),
                    reason: "connection refused".to_string(),
                });
            }
            None => {}
        }
        Ok(Arc::new(MockTransport {
            server: Arc::clone(&self.server),
            id,
        }))
    }
}

pub struct MockTransport {
    server: Arc<MockServer>,
    /// Dial sequence number, starting at 1.
    id: usize,
}

#[async_trait]
impl Transport for MockTransport {
    async fn open_session(&self) -> Result<Box<dyn SessionChannel>> {
        if self.is_closed() {
            return Err(Error::ChannelClosed);
        }
        if self.server.refuse_sessions.load(Ordering::SeqCst) {
            return Err(Error::Channel("administratively prohibited".to_string()));
        }
        self.server.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockChannel {
            server: Arc::clone(&self.server),
            pipes: None,
        }))
    }

    async fn open_file_transfer(&self) -> Result<Arc<dyn FileTransfer>> {
        let delay = *self.server.sftp_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.server.file_transfers_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockFileTransfer {
            server: Arc::clone(&self.server),
        }))
    }

    fn is_closed(&self) -> bool {
        self.id <= self.server.dropped_through.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.server.transport_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Remote ends of an attached session's pipes.
struct RemotePipes {
    stdin: DuplexStream,
    stdout: DuplexStream,
    stderr: DuplexStream,
}

pub struct MockChannel {
    server: Arc<MockServer>,
    pipes: Option<RemotePipes>,
}

#[async_trait]
impl SessionChannel for MockChannel {
    async fn combined_output(self: Box<Self>, command: &str) -> Result<CommandOutput> {
        let server = &self.server;
        let running = server.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        server.peak_in_flight.fetch_max(running, Ordering::SeqCst);

        let delay = *server.exec_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        server.in_flight.fetch_sub(1, Ordering::SeqCst);
        server.commands_run.lock().push(command.to_string());

        match server.script_for(command) {
            Script::Reply(output, status) => Ok(CommandOutput { output, status }),
            Script::ChannelError(reason) => Err(Error::Channel(reason)),
        }
    }

    async fn request_pty(&mut self, pty: &PtyRequest) -> Result<()> {
        if self.server.refuse_pty.load(Ordering::SeqCst) {
            return Err(Error::Channel("pty-req refused".to_string()));
        }
        self.server.pty_requests.lock().push(pty.clone());
        Ok(())
    }

    fn attach_streams(&mut self) -> Result<ChannelStreams> {
        if self.server.refuse_attach.load(Ordering::SeqCst) {
            return Err(Error::Channel("pipes unavailable".to_string()));
        }
        if self.pipes.is_some() {
            return Err(Error::Channel("streams already attached".to_string()));
        }

        let (stdin_local, stdin_remote) = tokio::io::duplex(PIPE_CAPACITY);
        let (stdout_local, stdout_remote) = tokio::io::duplex(PIPE_CAPACITY);
        let (stderr_local, stderr_remote) = tokio::io::duplex(PIPE_CAPACITY);
        self.pipes = Some(RemotePipes {
            stdin: stdin_remote,
            stdout: stdout_remote,
            stderr: stderr_remote,
        });

        Ok(ChannelStreams {
            stdin: Box::pin(stdin_local),
            stdout: Box::pin(stdout_local),
            stderr: Box::pin(stderr_local),
        })
    }

    /// Announces the command on stdout, echoes stdin back until EOF, then
    /// says goodbye on stderr.
    async fn run(self: Box<Self>, command: &str) -> Result<ExitStatus> {
        self.server.commands_run.lock().push(command.to_string());
        let status = self.server.status_for(command);

        if let Some(mut pipes) = self.pipes {
            pipes
                .stdout
                .write_all(format!("running {command}\n").as_bytes())
                .await?;
            let mut input = Vec::new();
            pipes.stdin.read_to_end(&mut input).await?;
            pipes.stdout.write_all(&input).await?;
            pipes.stdout.shutdown().await?;
            pipes.stderr.write_all(b"bye\n").await?;
            pipes.stderr.shutdown().await?;
        }
        Ok(status)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

pub struct MockFileTransfer {
    server: Arc<MockServer>,
}

#[async_trait]
impl FileTransfer for MockFileTransfer {
    async fn create(&self, path: &str) -> Result<ByteWriter> {
        self.server.files.lock().insert(path.to_string(), Vec::new());
        Ok(Box::pin(RemoteFileWriter {
            server: Arc::clone(&self.server),
            path: path.to_string(),
        }))
    }

    async fn open(&self, path: &str) -> Result<ByteReader> {
        match self.server.file(path) {
            Some(contents) => match *self.server.read_limit.lock() {
                Some(limit) if limit < contents.len() => {
                    let readable = io::Cursor::new(contents[..limit].to_vec());
                    Ok(Box::pin(readable.chain(BrokenRead)))
                }
                _ => Ok(Box::pin(io::Cursor::new(contents))),
            },
            None => Err(Error::Transfer {
                path: path.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
            }),
        }
    }

    async fn close(&self) -> Result<()> {
        self.server.file_transfer_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Appends straight into the server's file map, honouring the write limit.
struct RemoteFileWriter {
    server: Arc<MockServer>,
    path: String,
}

impl AsyncWrite for RemoteFileWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let limit = *self.server.write_limit.lock();
        let mut files = self.server.files.lock();
        let file = files.entry(self.path.clone()).or_default();

        let room = limit.map_or(usize::MAX, |l| l.saturating_sub(file.len()));
        if room == 0 && !buf.is_empty() {
            return Poll::Ready(Err(io::Error::other("disk full")));
        }
        let n = buf.len().min(room);
        file.extend_from_slice(&buf[..n]);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Reader that always fails, appended after the readable part of a file.
struct BrokenRead;

impl AsyncRead for BrokenRead {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset",
        )))
    }
}

/// Local sink that tests can inspect after the relays finish.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.0.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
