// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote skill-install execution (`spec.md` §4.12).
//!
//! Allowlist/reject-all policy decisions live in `wm-engine` (they consult
//! workspace and local config); this module only shells the validated
//! installer command, same pattern as `git.rs`'s short-timeout commands.

use std::time::Duration;

const INSTALLER_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_OUTPUT_BYTES: usize = 4096;

pub struct InstallerOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run `command` via the shell from the user's home directory, truncating
/// captured output to a manageable size for reporting back over the push
/// channel's response path.
pub async fn run_installer_command(command: &str, home_dir: &std::path::Path) -> InstallerOutcome {
    let fut = tokio::process::Command::new("sh").arg("-c").arg(command).current_dir(home_dir).output();

    match tokio::time::timeout(INSTALLER_TIMEOUT, fut).await {
        Ok(Ok(output)) => InstallerOutcome {
            success: output.status.success(),
            stdout: truncate(&String::from_utf8_lossy(&output.stdout)),
            stderr: truncate(&String::from_utf8_lossy(&output.stderr)),
        },
        Ok(Err(e)) => InstallerOutcome { success: false, stdout: String::new(), stderr: e.to_string() },
        Err(_) => InstallerOutcome {
            success: false,
            stdout: String::new(),
            stderr: format!("installer command timed out after {}s", INSTALLER_TIMEOUT.as_secs()),
        },
    }
}

fn truncate(s: &str) -> String {
    if s.len() <= MAX_OUTPUT_BYTES {
        return s.to_string();
    }
    s.chars().take(MAX_OUTPUT_BYTES).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_installer_command("echo hello", dir.path()).await;
        assert!(outcome.success);
        assert_eq!(outcome.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn failing_command_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_installer_command("exit 1", dir.path()).await;
        assert!(!outcome.success);
    }
}
