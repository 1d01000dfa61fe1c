// ABOUTME: Credential and connection defaults for SSH authentication.
// ABOUTME: Resolves user, key path, and timeout, then builds the auth method and client config.

use super::error::{Error, Result};
use super::host_key::HostKeyPolicy;
use russh::keys::{load_secret_key, ssh_key};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default time allowed to establish the TCP connection and SSH handshake.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Key file tried when none is configured, relative to the home directory.
pub const DEFAULT_KEY_FILE: &str = ".ssh/id_rsa";

/// User-supplied authentication settings. Unset fields get defaults on resolve.
#[derive(Clone, Default)]
pub struct AuthConfig {
    /// Login user (default: the local OS user).
    pub user: Option<String>,
    /// Password. Takes precedence over the key file when non-empty.
    pub password: Option<String>,
    /// Private key file (default: ~/.ssh/id_rsa).
    pub key_path: Option<PathBuf>,
    /// Dial timeout (default: 10s).
    pub timeout: Option<Duration>,
    pub host_key_policy: HostKeyPolicy,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_path", &self.key_path)
            .field("timeout", &self.timeout)
            .field("host_key_policy", &self.host_key_policy)
            .finish()
    }
}

impl AuthConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    /// Return a fully-resolved copy with defaults filled in. `self` is untouched.
    pub fn resolve_defaults(&self) -> ResolvedAuth {
        let user = self
            .user
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(whoami::username);

        let key_path = self.key_path.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join(DEFAULT_KEY_FILE)
        });

        let timeout = self
            .timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(DEFAULT_TIMEOUT);

        ResolvedAuth {
            user,
            password: self.password.clone().filter(|p| !p.is_empty()),
            key_path,
            timeout,
            host_key_policy: self.host_key_policy.clone(),
        }
    }
}

/// Authentication settings with every default applied.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedAuth {
    pub user: String,
    pub password: Option<String>,
    pub key_path: PathBuf,
    pub timeout: Duration,
    pub host_key_policy: HostKeyPolicy,
}

impl fmt::Debug for ResolvedAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedAuth")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_path", &self.key_path)
            .field("timeout", &self.timeout)
            .field("host_key_policy", &self.host_key_policy)
            .finish()
    }
}

impl ResolvedAuth {
    /// Pick the single auth method to offer: password if set, else the key file.
    pub fn build_auth_method(&self) -> Result<AuthMethod> {
        if let Some(password) = &self.password {
            return Ok(AuthMethod::Password(password.clone()));
        }

        let key = load_secret_key(&self.key_path, None).map_err(|e| Error::Credential {
            path: self.key_path.clone(),
            reason: e.to_string(),
        })?;
        Ok(AuthMethod::PublicKey(Arc::new(key)))
    }

    pub fn build_client_config(&self) -> Result<ClientConfig> {
        Ok(ClientConfig {
            user: self.user.clone(),
            auth: self.build_auth_method()?,
            host_key_policy: self.host_key_policy.clone(),
            timeout: self.timeout,
        })
    }
}

/// The credential presented to the server.
#[derive(Clone)]
pub enum AuthMethod {
    Password(String),
    PublicKey(Arc<ssh_key::PrivateKey>),
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Password(_) => f.write_str("Password(<redacted>)"),
            AuthMethod::PublicKey(key) => f
                .debug_tuple("PublicKey")
                .field(&key.algorithm().as_str())
                .finish(),
        }
    }
}

/// Everything a dialer needs to establish an authenticated transport.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub user: String,
    pub auth: AuthMethod,
    pub host_key_policy: HostKeyPolicy,
    pub timeout: Duration,
}
