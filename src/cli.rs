// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands, connection overrides, and output flags.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rexec")]
#[command(about = "Run commands, transfer files, and open shells over one SSH connection")]
#[command(version)]
pub struct Cli {
    /// Configuration file (default: rexec.yml, rexec.yaml or config.yaml in the current directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit JSON lines instead of text
    #[arg(long, global = true, conflicts_with = "quiet")]
    pub json: bool,

    /// Print only command output and results
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Overrides for the config file's ssh section.
#[derive(Args, Debug, Default)]
pub struct ConnectionArgs {
    /// Remote host as [user@]host[:port]
    #[arg(short = 'H', long, global = true)]
    pub host: Option<String>,

    /// SSH port
    #[arg(short, long, global = true, allow_negative_numbers = true)]
    pub port: Option<i64>,

    /// Login user
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    /// Private key file
    #[arg(short = 'i', long = "identity", global = true)]
    pub key_file: Option<PathBuf>,

    /// Connection timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Accept any host key without verification
    #[arg(long, global = true, conflicts_with = "trust_on_first_use")]
    pub insecure: bool,

    /// Accept and remember host keys not yet in known_hosts
    #[arg(long, global = true)]
    pub trust_on_first_use: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run commands on the remote host; several commands run concurrently
    Exec {
        /// Commands to run, each as one argument
        #[arg(required = true)]
        commands: Vec<String>,

        /// Maximum number of commands in flight
        #[arg(short = 'j', long)]
        parallel: Option<usize>,
    },

    /// Upload a local file to the remote host
    Upload {
        local: PathBuf,
        remote: String,
    },

    /// Download a remote file to the local machine
    Download {
        remote: String,
        local: PathBuf,
    },

    /// Run a command in a pseudo-terminal with live input and output
    Shell {
        command: String,

        /// Terminal type
        #[arg(long, default_value = "xterm")]
        term: String,

        /// Terminal width in columns
        #[arg(long, default_value_t = 80)]
        cols: u32,

        /// Terminal height in rows
        #[arg(long, default_value_t = 40)]
        rows: u32,
    },

    /// Show the decoded configuration
    Config,
}
