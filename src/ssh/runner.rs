// ABOUTME: Concurrent batch execution of commands over one client.
// ABOUTME: One task per command, joined before returning; cancellable and optionally bounded.

use super::client::{ExecResult, RemoteClient};
use super::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Anything that can run a single command and report its result.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn exec(&self, command: &str) -> Result<ExecResult>;
}

#[async_trait]
impl CommandExecutor for RemoteClient {
    async fn exec(&self, command: &str) -> Result<ExecResult> {
        RemoteClient::exec(self, command).await
    }
}

/// Result of one command in a batch.
#[derive(Debug)]
pub struct CommandReport {
    /// Position of the command in the submitted batch.
    pub index: usize,
    pub command: String,
    pub outcome: Result<ExecResult>,
}

impl CommandReport {
    /// True when the command ran and exited zero.
    pub fn succeeded(&self) -> bool {
        matches!(&self.outcome, Ok(result) if result.success())
    }
}

/// Every command's report, in submission order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub reports: Vec<CommandReport>,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn all_succeeded(&self) -> bool {
        self.reports.iter().all(CommandReport::succeeded)
    }

    /// Commands that could not be executed at all.
    pub fn errors(&self) -> impl Iterator<Item = &CommandReport> {
        self.reports.iter().filter(|r| r.outcome.is_err())
    }
}

/// Runs a batch of commands concurrently, one channel per command.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    max_concurrency: Option<usize>,
    cancel: CancellationToken,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of commands in flight at once.
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    /// Share an existing token, e.g. one tied to Ctrl-C.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that aborts the batch when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run every command and wait for all of them. A failing command never
    /// affects its siblings; completion order is whatever the remote produces.
    pub async fn run<E, I, S>(&self, executor: Arc<E>, commands: I) -> BatchReport
    where
        E: CommandExecutor + ?Sized + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let limiter = self.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));
        let mut tasks = JoinSet::new();
        let mut pending = HashMap::new();

        for (index, command) in commands.into_iter().enumerate() {
            let command: String = command.into();
            let executor = Arc::clone(&executor);
            let limiter = limiter.clone();
            let cancel = self.cancel.clone();
            let task_command = command.clone();

            let handle = tasks.spawn(async move {
                let outcome = run_one(executor.as_ref(), &task_command, limiter, cancel).await;
                CommandReport {
                    index,
                    command: task_command,
                    outcome,
                }
            });
            pending.insert(handle.id(), (index, command));
        }

        let mut reports = Vec::with_capacity(pending.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, report)) => {
                    pending.remove(&id);
                    reports.push(report);
                }
                Err(e) => {
                    tracing::error!("command task failed: {}", e);
                    if let Some((index, command)) = pending.remove(&e.id()) {
                        reports.push(CommandReport {
                            index,
                            command,
                            outcome: Err(Error::Channel(format!("command task failed: {}", e))),
                        });
                    }
                }
            }
        }

        reports.sort_by_key(|r| r.index);
        BatchReport { reports }
    }
}

async fn run_one<E>(
    executor: &E,
    command: &str,
    limiter: Option<Arc<Semaphore>>,
    cancel: CancellationToken,
) -> Result<ExecResult>
where
    E: CommandExecutor + ?Sized,
{
    let _permit = match limiter {
        Some(limiter) => tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            permit = limiter.acquire_owned() => {
                Some(permit.map_err(|_| Error::Cancelled)?)
            }
        },
        None => None,
    };

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    tracing::info!("executing: {}", command);
    let outcome = tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        outcome = executor.exec(command) => outcome,
    };

    match &outcome {
        Ok(result) => tracing::info!("executing: {} - done ({})", command, result.exit_code),
        Err(e) => tracing::warn!("executing: {} - failed: {}", command, e),
    }
    outcome
}
