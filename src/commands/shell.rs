// ABOUTME: Shell command implementation.
// ABOUTME: Runs a command in a remote pty with the local terminal attached.

use super::{connect, disconnect, report_warnings};
use rexec::config::SshConfig;
use rexec::diagnostics::{Diagnostics, Warning};
use rexec::error::Result;
use rexec::output::Output;
use rexec::ssh::{InteractiveSession, LocalStreams, PtyRequest};

/// Run `command` interactively and return its exit code.
pub async fn shell_command(
    settings: &SshConfig,
    command: &str,
    pty: PtyRequest,
    output: &mut Output,
) -> Result<i32> {
    let mut diag = Diagnostics::default();
    let client = connect(settings, output).await?;

    let outcome = async {
        let mut session = InteractiveSession::open(&client).await?;
        if !session.request_pty(&pty).await {
            diag.warn(Warning::pty_unavailable(format!(
                "no {} terminal on {}, running without one",
                pty.term,
                client.host()
            )));
        }
        session.attach(LocalStreams::stdio()).await?;
        session.run(command).await
    }
    .await;

    disconnect(&client, &mut diag).await;
    report_warnings(&diag, output);

    let status = outcome?;
    if !status.success() {
        tracing::debug!("`{}` ended with {}", command, status);
    }
    Ok(i32::try_from(status.code()).unwrap_or(i32::MAX))
}
