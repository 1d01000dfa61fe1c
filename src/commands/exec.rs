// ABOUTME: Exec command implementation.
// ABOUTME: Runs one command directly or several concurrently over a single connection.

use super::{connect, disconnect, report_warnings};
use rexec::config::SshConfig;
use rexec::diagnostics::Diagnostics;
use rexec::error::Result;
use rexec::output::Output;
use rexec::ssh::{CommandRunner, RemoteClient};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Run `commands` on the remote host and return the process exit code.
///
/// A single command exits with the remote exit code. A batch exits 0 only
/// when every command succeeded.
pub async fn exec_command(
    settings: &SshConfig,
    commands: Vec<String>,
    parallel: Option<usize>,
    output: &mut Output,
) -> Result<i32> {
    let mut diag = Diagnostics::default();
    let client = Arc::new(connect(settings, output).await?);
    output.start_timer();

    let result = match commands.as_slice() {
        [command] => exec_single(&client, command, output).await,
        _ => Ok(exec_batch(Arc::clone(&client), commands, parallel, output).await),
    };

    disconnect(&client, &mut diag).await;
    report_warnings(&diag, output);
    result
}

async fn exec_single(client: &RemoteClient, command: &str, output: &Output) -> Result<i32> {
    let result = client.exec(command).await?;
    output.exec_result(&result);
    Ok(i32::try_from(result.exit_code).unwrap_or(i32::MAX))
}

async fn exec_batch(
    client: Arc<RemoteClient>,
    commands: Vec<String>,
    parallel: Option<usize>,
    output: &Output,
) -> i32 {
    let cancel = CancellationToken::new();
    let mut runner = CommandRunner::new().with_cancellation(cancel.clone());
    if let Some(limit) = parallel {
        runner = runner.max_concurrency(limit);
    }

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling pending commands");
            cancel.cancel();
        }
    });

    let report = runner.run(client, commands).await;
    interrupt.abort();

    output.batch(&report);
    if report.all_succeeded() { 0 } else { 1 }
}
