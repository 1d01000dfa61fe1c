// ABOUTME: Entry point for the rexec CLI application.
// ABOUTME: Parses arguments, loads configuration, and dispatches to command handlers.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands, ConnectionArgs};
use rexec::config::{Config, SshConfig};
use rexec::error::{Error, Result};
use rexec::output::{Output, OutputMode};
use rexec::ssh::PtyRequest;
use std::env;
use std::path::Path;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mode = if cli.json {
        OutputMode::Json
    } else if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Normal
    };
    let mut output = Output::new(mode);

    let code = match run(cli, &mut output).await {
        Ok(code) => code,
        Err(e) => {
            output.error(&e.to_string());
            1
        }
    };

    // A stdin relay may still be parked on a blocking read
    std::process::exit(code);
}

async fn run(cli: Cli, output: &mut Output) -> Result<i32> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Config => {
            let config = load_config(config_path, true)?;
            commands::show_config(&config, output)
        }
        Commands::Exec {
            commands: batch,
            parallel,
        } => {
            let settings = remote_settings(config_path, &cli.connection)?;
            commands::exec_command(&settings, batch, parallel, output).await
        }
        Commands::Upload { local, remote } => {
            let settings = remote_settings(config_path, &cli.connection)?;
            commands::upload_command(&settings, &local, &remote, output).await
        }
        Commands::Download { remote, local } => {
            let settings = remote_settings(config_path, &cli.connection)?;
            commands::download_command(&settings, &remote, &local, output).await
        }
        Commands::Shell {
            command,
            term,
            cols,
            rows,
        } => {
            let settings = remote_settings(config_path, &cli.connection)?;
            let pty = PtyRequest::default().term(term).size(cols, rows);
            commands::shell_command(&settings, &command, pty, output).await
        }
    }
}

fn remote_settings(config_path: Option<&Path>, args: &ConnectionArgs) -> Result<SshConfig> {
    let config = load_config(config_path, false)?;
    let password = env::var(commands::PASSWORD_ENV).ok();
    commands::connection_settings(&config, args, password)
}

/// Load the explicit config file, or discover one in the working directory.
/// Without `required`, a missing file yields an empty config so that
/// `--host` alone is enough to connect.
fn load_config(path: Option<&Path>, required: bool) -> Result<Config> {
    if let Some(path) = path {
        if !path.exists() {
            return Err(Error::ConfigNotFound(path.to_path_buf()));
        }
        return Config::load(path);
    }

    let cwd = env::current_dir()?;
    match Config::discover(&cwd) {
        Err(Error::ConfigNotFound(_)) if !required => Ok(Config::default()),
        other => other,
    }
}
