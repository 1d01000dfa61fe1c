// ABOUTME: Output formatting for CLI feedback.
// ABOUTME: Supports normal, quiet (CI), and JSON output modes.

use crate::ssh::{BatchReport, ExecResult, TransferResult};
use serde::Serialize;
use std::io::Write;
use std::time::Instant;

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    Normal,
    /// Only command output and final results
    Quiet,
    /// JSON lines for scripting
    Json,
}

/// Handles CLI output based on the configured mode.
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Start timing an operation.
    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Get elapsed time since timer started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn duration(&self) -> Option<f64> {
        self.start_time.map(|_| self.elapsed_secs())
    }

    /// Print a progress message (suppressed in quiet/json mode).
    pub fn progress(&self, message: &str) {
        if self.mode == OutputMode::Normal {
            eprintln!("{message}");
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                eprintln!("Error: {message}");
            }
            OutputMode::Json => {
                let event = JsonEvent {
                    event: "error",
                    message,
                    duration_secs: self.duration(),
                };
                if let Ok(json) = serde_json::to_string(&event) {
                    eprintln!("{json}");
                }
            }
        }
    }

    /// Print a non-fatal warning.
    pub fn warning(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => eprintln!("Warning: {message}"),
            OutputMode::Quiet => {}
            OutputMode::Json => {
                let event = JsonEvent {
                    event: "warning",
                    message,
                    duration_secs: None,
                };
                if let Ok(json) = serde_json::to_string(&event) {
                    eprintln!("{json}");
                }
            }
        }
    }

    /// Print the captured output of one command.
    pub fn exec_result(&self, result: &ExecResult) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                let mut stdout = std::io::stdout().lock();
                let _ = stdout.write_all(&result.output);
                let _ = stdout.flush();
                if self.mode == OutputMode::Normal && !result.success() {
                    eprintln!("{}", exit_description(result));
                }
            }
            OutputMode::Json => {
                let event = JsonExec::from_result(result, self.duration());
                if let Ok(json) = serde_json::to_string(&event) {
                    println!("{json}");
                }
            }
        }
    }

    /// Print every report of a batch, in submission order.
    pub fn batch(&self, report: &BatchReport) {
        for entry in &report.reports {
            match (&entry.outcome, self.mode) {
                (Ok(result), OutputMode::Json) => {
                    let event = JsonExec::from_result(result, None);
                    if let Ok(json) = serde_json::to_string(&event) {
                        println!("{json}");
                    }
                }
                (Ok(result), _) => {
                    self.progress(&format!("executing: {}", entry.command));
                    self.exec_result(result);
                    self.progress(&format!("executing: {} - done", entry.command));
                }
                (Err(e), _) => self.error(&format!("{}: {}", entry.command, e)),
            }
        }
    }

    /// Print the outcome of a transfer.
    pub fn transfer(&self, result: &TransferResult) {
        match self.mode {
            OutputMode::Normal => match self.duration() {
                Some(secs) => println!("{result} ({secs:.1}s)"),
                None => println!("{result}"),
            },
            OutputMode::Quiet => println!("{}", result.bytes),
            OutputMode::Json => {
                let event = JsonTransfer {
                    event: "transfer",
                    kind: result.kind.to_string(),
                    local: result.local.display().to_string(),
                    remote: &result.remote,
                    bytes: result.bytes,
                    duration_secs: self.duration(),
                };
                if let Ok(json) = serde_json::to_string(&event) {
                    println!("{json}");
                }
            }
        }
    }
}

fn exit_description(result: &ExecResult) -> String {
    match &result.exit_signal {
        Some(signal) => format!("`{}` killed by signal {}", result.command, signal),
        None => format!("`{}` exited with status {}", result.command, result.exit_code),
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}

#[derive(Serialize)]
struct JsonExec<'a> {
    event: &'a str,
    command: &'a str,
    exit_code: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_signal: Option<&'a str>,
    output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}

impl<'a> JsonExec<'a> {
    fn from_result(result: &'a ExecResult, duration_secs: Option<f64>) -> Self {
        Self {
            event: "exec",
            command: &result.command,
            exit_code: result.exit_code,
            exit_signal: result.exit_signal.as_deref(),
            output: result.output_string().into_owned(),
            duration_secs,
        }
    }
}

#[derive(Serialize)]
struct JsonTransfer<'a> {
    event: &'a str,
    kind: String,
    local: String,
    remote: &'a str,
    bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}
