// ABOUTME: Upload and download command implementations.
// ABOUTME: Reports the byte count even when a transfer stops partway.

use super::{connect, disconnect, report_warnings};
use rexec::config::SshConfig;
use rexec::diagnostics::Diagnostics;
use rexec::error::Result;
use rexec::output::Output;
use rexec::ssh::{TransferFailure, TransferResult};
use std::path::Path;

pub async fn upload_command(
    settings: &SshConfig,
    local: &Path,
    remote: &str,
    output: &mut Output,
) -> Result<i32> {
    let mut diag = Diagnostics::default();
    let client = connect(settings, output).await?;

    output.progress(&format!("  → Uploading {} to {}...", local.display(), remote));
    output.start_timer();
    let outcome = client.upload(local, remote).await;

    disconnect(&client, &mut diag).await;
    report_warnings(&diag, output);
    finish(outcome, output)
}

pub async fn download_command(
    settings: &SshConfig,
    remote: &str,
    local: &Path,
    output: &mut Output,
) -> Result<i32> {
    let mut diag = Diagnostics::default();
    let client = connect(settings, output).await?;

    output.progress(&format!("  → Downloading {} to {}...", remote, local.display()));
    output.start_timer();
    let outcome = client.download(remote, local).await;

    disconnect(&client, &mut diag).await;
    report_warnings(&diag, output);
    finish(outcome, output)
}

fn finish(
    outcome: std::result::Result<TransferResult, TransferFailure>,
    output: &Output,
) -> Result<i32> {
    match outcome {
        Ok(result) => {
            output.transfer(&result);
            Ok(0)
        }
        Err(failure) => {
            if failure.result.bytes > 0 {
                output.transfer(&failure.result);
            }
            Err(failure.into())
        }
    }
}
