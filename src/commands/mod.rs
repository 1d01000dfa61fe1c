// ABOUTME: Command module aggregator for the rexec CLI.
// ABOUTME: Holds the shared connect and disconnect helpers used by every remote command.

mod config;
mod exec;
mod shell;
mod transfer;

pub use config::show_config;
pub use exec::exec_command;
pub use shell::shell_command;
pub use transfer::{download_command, upload_command};

use crate::cli::ConnectionArgs;
use rexec::config::{Config, SshConfig};
use rexec::diagnostics::{Diagnostics, Warning};
use rexec::error::{Error, Result};
use rexec::output::Output;
use rexec::ssh::{HostKeyPolicy, RemoteClient};
use std::time::Duration;

/// Environment variable consulted for the login password.
pub const PASSWORD_ENV: &str = "REXEC_PASSWORD";

/// Merge the config file's ssh section with command-line overrides.
pub fn connection_settings(
    config: &Config,
    args: &ConnectionArgs,
    password: Option<String>,
) -> Result<SshConfig> {
    let mut settings = match &args.host {
        Some(address) => {
            let parsed = SshConfig::parse(address).map_err(Error::InvalidConfig)?;
            // Keep credentials from the file, take the address from the flag
            let base = config.ssh.clone().unwrap_or_default();
            SshConfig {
                host: parsed.host,
                port: if parsed.port != 0 { parsed.port } else { base.port },
                user: parsed.user.or(base.user),
                ..base
            }
        }
        None => config.ssh()?.clone(),
    };

    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(user) = &args.user {
        settings.user = Some(user.clone());
    }
    if let Some(key_file) = &args.key_file {
        settings.key_file = Some(key_file.clone());
    }
    if let Some(secs) = args.timeout {
        settings.timeout = Some(Duration::from_secs(secs));
    }
    if let Some(password) = password.filter(|p| !p.is_empty()) {
        settings.password = Some(password);
    }

    if args.insecure {
        settings.host_key = HostKeyPolicy::Insecure;
    } else if args.trust_on_first_use {
        settings.host_key = match settings.host_key {
            HostKeyPolicy::KnownHosts { path, .. } => HostKeyPolicy::KnownHosts {
                path,
                trust_on_first_use: true,
            },
            _ => HostKeyPolicy::KnownHosts {
                path: None,
                trust_on_first_use: true,
            },
        };
    }

    Ok(settings)
}

/// Build a client from `settings` and open its connection.
pub async fn connect(settings: &SshConfig, output: &Output) -> Result<RemoteClient> {
    let client = settings.client()?;
    output.progress(&format!("  → Connecting to {}:{}...", client.host(), client.port()));
    client.connect().await?;
    Ok(client)
}

/// Close the client, recording a failure as a warning.
pub async fn disconnect(client: &RemoteClient, diag: &mut Diagnostics) {
    if let Err(e) = client.close().await {
        diag.warn(Warning::disconnect(format!(
            "disconnect from {} failed: {}",
            client.host(),
            e
        )));
    }
}

/// Print collected warnings.
pub fn report_warnings(diag: &Diagnostics, output: &Output) {
    for warning in diag.warnings() {
        output.warning(&warning.message);
    }
}
