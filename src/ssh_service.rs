use crate::resolver::ConnectionSpec;
use anyhow::{Context, Result};
use std::process::{Command, ExitStatus, Stdio};

/// Render the interactive command line, for logs and `--dry-run` style output.
pub fn command_line(spec: &ConnectionSpec) -> String {
    let mut parts = vec!["ssh".to_string()];
    parts.extend(spec.ssh_args_interactive());
    parts.join(" ")
}

/// Run an interactive `ssh` for `spec` in the current terminal and wait for
/// it to exit. The caller must have released the terminal first.
pub fn connect_interactive(spec: &ConnectionSpec) -> Result<ExitStatus> {
    tracing::info!("Attempting to connect: {}", command_line(spec));

    let mut cmd = Command::new("ssh");
    cmd.args(spec.ssh_args_interactive());

    // ssh inherits stdio for an interactive session
    cmd.stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    let status = cmd
        .status()
        .with_context(|| format!("Failed to execute SSH command for {}", spec))?;

    if status.success() {
        tracing::info!("SSH session to {} ended", spec);
    } else {
        // ssh has already printed its own error to the terminal
        tracing::error!("SSH command finished with a non-zero status: {}", status);
    }

    Ok(status)
}

/// ssh reserves 255 for its own failures; anything else came from the remote shell.
pub fn is_connection_failure(status: &ExitStatus) -> bool {
    status.code() == Some(255)
}
