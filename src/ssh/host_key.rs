// ABOUTME: Host key trust policies for verifying the server during the handshake.
// ABOUTME: Supports known_hosts lookup with optional TOFU, pinned fingerprints, and explicit opt-out.

use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::ssh_key::{self, HashAlg};
use parking_lot::Mutex;
use serde::Deserialize;
use std::path::PathBuf;

// Held across check-then-learn so a new host is appended at most once per process.
static KNOWN_HOSTS_LOCK: Mutex<()> = Mutex::new(());

/// How the server's host key is verified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Look the key up in a known_hosts file.
    /// If `path` is None, uses the default ~/.ssh/known_hosts.
    KnownHosts {
        #[serde(default)]
        path: Option<PathBuf>,
        /// Accept and record keys for hosts not yet in the file.
        #[serde(default)]
        trust_on_first_use: bool,
    },
    /// Accept only a key whose SHA256 fingerprint matches, e.g. `SHA256:abc...`.
    Fingerprint { sha256: String },
    /// Accept any host key. Must be chosen explicitly.
    Insecure,
}

impl Default for HostKeyPolicy {
    fn default() -> Self {
        HostKeyPolicy::KnownHosts {
            path: None,
            trust_on_first_use: false,
        }
    }
}

impl HostKeyPolicy {
    /// Decide whether `key` presented by `host:port` is trusted.
    pub fn verify(&self, host: &str, port: u16, key: &ssh_key::PublicKey) -> bool {
        match self {
            HostKeyPolicy::Insecure => {
                tracing::warn!("host key verification disabled for {}:{}", host, port);
                true
            }
            HostKeyPolicy::Fingerprint { sha256: expected } => {
                let actual = key.fingerprint(HashAlg::Sha256).to_string();
                let matches = normalize_fingerprint(expected) == normalize_fingerprint(&actual);
                if !matches {
                    tracing::warn!(
                        "host key fingerprint mismatch for {}:{}: expected {}, got {}",
                        host,
                        port,
                        expected,
                        actual
                    );
                }
                matches
            }
            HostKeyPolicy::KnownHosts {
                path,
                trust_on_first_use,
            } => verify_known_hosts(host, port, key, path.as_ref(), *trust_on_first_use),
        }
    }
}

fn normalize_fingerprint(fingerprint: &str) -> &str {
    let fingerprint = fingerprint.trim();
    fingerprint.strip_prefix("SHA256:").unwrap_or(fingerprint)
}

fn verify_known_hosts(
    host: &str,
    port: u16,
    key: &ssh_key::PublicKey,
    path: Option<&PathBuf>,
    trust_on_first_use: bool,
) -> bool {
    let _guard = KNOWN_HOSTS_LOCK.lock();
    let check_result = match path {
        Some(path) => check_known_hosts_path(host, port, key, path),
        None => check_known_hosts(host, port, key),
    };

    match check_result {
        Ok(true) => true,
        Err(russh::keys::Error::KeyChanged { .. }) => {
            tracing::warn!("host key for {}:{} does not match known_hosts", host, port);
            false
        }
        // Unknown host, or a known_hosts file we could not read
        Ok(false) | Err(_) => {
            if !trust_on_first_use {
                return false;
            }
            tracing::warn!(
                "Trust-On-First-Use: accepting unknown host key for {}:{}",
                host,
                port
            );
            let learn_result = match path {
                Some(path) => learn_known_hosts_path(host, port, key, path),
                None => learn_known_hosts(host, port, key),
            };
            if let Err(e) = learn_result {
                tracing::warn!("Failed to save host key to known_hosts: {}", e);
            }
            true
        }
    }
}
