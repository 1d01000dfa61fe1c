// ABOUTME: In-process russh server on a loopback port for exercising the real backend.
// ABOUTME: Scripted exec replies, an echoing pty command, and an in-memory SFTP store.

use parking_lot::Mutex;
use rexec::ssh::{AuthConfig, HostKeyPolicy, RemoteClient};
use russh::keys::{Algorithm, PrivateKey};
use russh::server::{Auth, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, Disconnect, Pty, Sig};
use russh_sftp::protocol::{
    Data, FileAttributes, Handle as FileHandle, OpenFlags, Status, StatusCode, Version,
};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;

pub const USER: &str = "tester";
pub const PASSWORD: &str = "secret";

/// State shared by every connection the server accepts.
#[derive(Default)]
pub struct ServerState {
    pub files: Mutex<HashMap<String, Vec<u8>>>,
    pub connections: AtomicUsize,
    pub pty_terms: Mutex<Vec<String>>,
    sessions: Mutex<Vec<russh::server::Handle>>,
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
}

impl TestServer {
    /// Bind 127.0.0.1 on an ephemeral port and serve until the test ends.
    pub async fn start() -> Self {
        let key = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519)
            .expect("host key generation should succeed");
        let config = Arc::new(russh::server::Config {
            keys: vec![key],
            auth_rejection_time: Duration::from_millis(10),
            auth_rejection_time_initial: Some(Duration::ZERO),
            ..Default::default()
        });

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("loopback bind should succeed");
        let addr = listener.local_addr().expect("bound socket has an address");
        let state = Arc::new(ServerState::default());

        let shared = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                shared.connections.fetch_add(1, Ordering::SeqCst);
                let handler = ConnectionHandler {
                    state: Arc::clone(&shared),
                    channels: HashMap::new(),
                    echoing: HashSet::new(),
                };
                let config = Arc::clone(&config);
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    if let Ok(session) = russh::server::run_stream(config, stream, handler).await {
                        shared.sessions.lock().push(session.handle());
                        let _ = session.await;
                    }
                });
            }
        });

        Self { addr, state }
    }

    pub fn auth(&self) -> AuthConfig {
        AuthConfig::new()
            .user(USER)
            .password(PASSWORD)
            .timeout(Duration::from_secs(5))
            .host_key_policy(HostKeyPolicy::Insecure)
    }

    pub fn client(&self) -> RemoteClient {
        self.client_with(self.auth())
    }

    pub fn client_with(&self, auth: AuthConfig) -> RemoteClient {
        RemoteClient::new(self.addr.ip().to_string(), i64::from(self.addr.port()), auth)
            .expect("loopback address is valid")
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Disconnect every client from the server side.
    pub async fn drop_connections(&self) {
        let sessions: Vec<_> = self.state.sessions.lock().drain(..).collect();
        for session in sessions {
            let _ = session
                .disconnect(Disconnect::ByApplication, "going away".into(), "en".into())
                .await;
        }
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.files.lock().get(path).cloned()
    }

    pub fn put_file(&self, path: &str, contents: &[u8]) {
        self.state
            .files
            .lock()
            .insert(path.to_string(), contents.to_vec());
    }
}

/// Per-connection handler. Command replies:
///
/// - `exit 7` prints "seven" and exits 7
/// - `sleep 60` is killed with SIGKILL
/// - `both` writes "out" to stdout and "err" to stderr
/// - `vanish` closes the channel without an exit status
/// - `cat` echoes stdin until EOF, then says "bye" on stderr
/// - anything else echoes the command line and exits 0
struct ConnectionHandler {
    state: Arc<ServerState>,
    // Unread channel objects, kept only until they become an SFTP stream.
    channels: HashMap<ChannelId, Channel<Msg>>,
    echoing: HashSet<ChannelId>,
}

fn finish(session: &mut Session, channel: ChannelId, code: u32) -> Result<(), russh::Error> {
    session.exit_status_request(channel, code)?;
    session.eof(channel)?;
    session.close(channel)
}

impl russh::server::Handler for ConnectionHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if user == USER && password == PASSWORD {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::reject())
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.state.pty_terms.lock().push(term.to_string());
        session.channel_success(channel)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.channels.remove(&channel);
        session.channel_success(channel)?;

        let command = String::from_utf8_lossy(data).into_owned();
        match command.as_str() {
            "exit 7" => {
                session.data(channel, CryptoVec::from_slice(b"seven\n"))?;
                finish(session, channel, 7)
            }
            "sleep 60" => {
                session.exit_signal_request(channel, Sig::KILL, false, "killed", "en")?;
                session.eof(channel)?;
                session.close(channel)
            }
            "both" => {
                session.data(channel, CryptoVec::from_slice(b"out\n"))?;
                session.extended_data(channel, 1, CryptoVec::from_slice(b"err\n"))?;
                finish(session, channel, 0)
            }
            "vanish" => session.close(channel),
            "cat" => {
                self.echoing.insert(channel);
                Ok(())
            }
            other => {
                session.data(channel, CryptoVec::from_slice(format!("{other}\n").as_bytes()))?;
                finish(session, channel, 0)
            }
        }
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.echoing.contains(&channel) {
            session.data(channel, CryptoVec::from_slice(data))?;
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.echoing.remove(&channel) {
            session.extended_data(channel, 1, CryptoVec::from_slice(b"bye\n"))?;
            finish(session, channel, 0)?;
        }
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        match (name, self.channels.remove(&channel)) {
            ("sftp", Some(sftp_channel)) => {
                session.channel_success(channel)?;
                let store = MemoryStore {
                    state: Arc::clone(&self.state),
                    handles: HashMap::new(),
                    next_handle: 0,
                };
                russh_sftp::server::run(sftp_channel.into_stream(), store).await;
            }
            _ => session.channel_failure(channel)?,
        }
        Ok(())
    }
}

/// SFTP file store backed by `ServerState::files`.
struct MemoryStore {
    state: Arc<ServerState>,
    handles: HashMap<String, String>,
    next_handle: u64,
}

fn ok_status(id: u32) -> Status {
    Status {
        id,
        status_code: StatusCode::Ok,
        error_message: String::new(),
        language_tag: "en".to_string(),
    }
}

impl russh_sftp::server::Handler for MemoryStore {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn init(
        &mut self,
        _version: u32,
        _extensions: HashMap<String, String>,
    ) -> Result<Version, Self::Error> {
        Ok(Version::new())
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<FileHandle, Self::Error> {
        {
            let mut files = self.state.files.lock();
            if pflags.contains(OpenFlags::CREATE) {
                let file = files.entry(filename.clone()).or_default();
                if pflags.contains(OpenFlags::TRUNCATE) {
                    file.clear();
                }
            } else if !files.contains_key(&filename) {
                return Err(StatusCode::NoSuchFile);
            }
        }

        self.next_handle += 1;
        let handle = self.next_handle.to_string();
        self.handles.insert(handle.clone(), filename);
        Ok(FileHandle { id, handle })
    }

    async fn read(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        len: u32,
    ) -> Result<Data, Self::Error> {
        let path = self.handles.get(&handle).ok_or(StatusCode::Failure)?;
        let files = self.state.files.lock();
        let contents = files.get(path).ok_or(StatusCode::NoSuchFile)?;

        let start = usize::try_from(offset).map_err(|_| StatusCode::Failure)?;
        if start >= contents.len() {
            return Err(StatusCode::Eof);
        }
        let end = contents.len().min(start + len as usize);
        Ok(Data {
            id,
            data: contents[start..end].to_vec(),
        })
    }

    async fn write(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<Status, Self::Error> {
        let path = self.handles.get(&handle).ok_or(StatusCode::Failure)?;
        let mut files = self.state.files.lock();
        let file = files.entry(path.clone()).or_default();

        let start = usize::try_from(offset).map_err(|_| StatusCode::Failure)?;
        let end = start + data.len();
        if file.len() < end {
            file.resize(end, 0);
        }
        file[start..end].copy_from_slice(&data);
        Ok(ok_status(id))
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        self.handles.remove(&handle);
        Ok(ok_status(id))
    }
}
