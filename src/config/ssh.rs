// ABOUTME: SSH connection settings from the config file or command line.
// ABOUTME: Parses "[user@]host[:port]", with IPv6 literals written as "[addr]" or "[addr]:port".

use crate::ssh::{self, AuthConfig, HostKeyPolicy, RemoteClient};
use serde::Deserialize;
use std::fmt;
use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Default, Deserialize)]
pub struct SshConfig {
    pub host: String,
    /// Zero means the default SSH port. Range is checked when the client is built.
    #[serde(default)]
    pub port: i64,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub host_key: HostKeyPolicy,
}

impl fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_file", &self.key_file)
            .field("timeout", &self.timeout)
            .field("host_key", &self.host_key)
            .finish()
    }
}

impl SshConfig {
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("server address cannot be empty".to_string());
        }

        // Parse format: [user@]host[:port]
        let (user_part, rest) = match s.split_once('@') {
            Some((user, rest)) => (Some(user), rest),
            None => (None, s),
        };

        let (host, port) = split_host_port(rest)?;

        if host.is_empty() {
            return Err("hostname cannot be empty".to_string());
        }

        Ok(SshConfig {
            host: host.to_string(),
            port,
            user: user_part.filter(|u| !u.is_empty()).map(str::to_string),
            ..Default::default()
        })
    }

    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            user: self.user.clone(),
            password: self.password.clone(),
            key_path: self.key_file.clone(),
            timeout: self.timeout,
            host_key_policy: self.host_key.clone(),
        }
    }

    /// Build an unconnected client from these settings.
    pub fn client(&self) -> ssh::Result<RemoteClient> {
        RemoteClient::new(&self.host, self.port, self.auth_config())
    }
}

/// Split "host", "host:port", "[v6]" or "[v6]:port". A bare IPv6 literal is
/// taken as a host with no port; any other host with several colons is ambiguous.
fn split_host_port(s: &str) -> Result<(&str, i64), String> {
    if let Some(bracketed) = s.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| format!("missing closing bracket in {}", s))?;
        let port = match after {
            "" => 0,
            _ => match after.strip_prefix(':') {
                Some(port_str) => parse_port(port_str)?,
                None => return Err(format!("unexpected text after bracketed host: {}", after)),
            },
        };
        return Ok((host, port));
    }

    if s.parse::<Ipv6Addr>().is_ok() {
        return Ok((s, 0));
    }
    match s.split_once(':') {
        None => Ok((s, 0)),
        Some((_, port_str)) if port_str.contains(':') => Err(format!(
            "ambiguous address {}: write IPv6 hosts as [addr]:port",
            s
        )),
        Some((host, port_str)) => Ok((host, parse_port(port_str)?)),
    }
}

fn parse_port(s: &str) -> Result<i64, String> {
    s.parse::<u16>()
        .map(i64::from)
        .map_err(|_| format!("invalid port: {}", s))
}
