// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Git worktree shelling and stats collection (`spec.md` §4.10, §4.11).
//!
//! Same shape as the teacher's `detect_git_branch_async` /
//! `detect_git_remote` helpers: short-timeout `tokio::process::Command`
//! calls, failures folded into `None`/non-fatal rather than propagated.

use std::path::Path;
use std::time::Duration;
use wm_wire::GitStats;

const SHORT_TIMEOUT: Duration = Duration::from_secs(5);
const LONG_TIMEOUT: Duration = Duration::from_secs(30);

async fn run_git(cwd: &Path, args: &[&str], timeout: Duration) -> Option<String> {
    let fut = tokio::process::Command::new("git").args(args).current_dir(cwd).output();
    let output = match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(output)) => output,
        _ => return None,
    };
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Ensure `.buildd-worktrees` is excluded from the repo's git status.
async fn ensure_worktrees_excluded(repo_path: &Path) {
    let exclude_path = repo_path.join(".git/info/exclude");
    let Ok(existing) = tokio::fs::read_to_string(&exclude_path).await else { return };
    if existing.contains(".buildd-worktrees") {
        return;
    }
    let mut updated = existing;
    if !updated.ends_with('\n') && !updated.is_empty() {
        updated.push('\n');
    }
    updated.push_str(".buildd-worktrees/\n");
    let _ = tokio::fs::write(&exclude_path, updated).await;
}

/// Create a worktree for `branch` under `<repo>/.buildd-worktrees/<branch>`,
/// returning its path on success. Falls back to `None` on any failure; the
/// caller falls back to the main repo path and emits a milestone
/// (`spec.md` §4.11).
pub async fn setup_worktree(repo_path: &Path, branch: &str, default_branch: &str) -> Option<std::path::PathBuf> {
    ensure_worktrees_excluded(repo_path).await;
    let _ = run_git(repo_path, &["fetch", "origin"], LONG_TIMEOUT).await;

    let worktree_path = repo_path.join(".buildd-worktrees").join(branch);
    if worktree_path.exists() {
        let _ = run_git(repo_path, &["worktree", "remove", "--force", worktree_path.to_str()?], SHORT_TIMEOUT).await;
        let _ = tokio::fs::remove_dir_all(&worktree_path).await;
    }
    let _ = run_git(repo_path, &["branch", "-D", branch], SHORT_TIMEOUT).await;

    let upstream = format!("origin/{default_branch}");
    let result = run_git(
        repo_path,
        &["worktree", "add", "-b", branch, worktree_path.to_str()?, &upstream],
        LONG_TIMEOUT,
    )
    .await;
    result.map(|_| worktree_path)
}

/// Remove a worktree created by [`setup_worktree`], best-effort.
pub async fn teardown_worktree(repo_path: &Path, worktree_path: &Path) {
    let Some(path_str) = worktree_path.to_str() else { return };
    let removed = run_git(repo_path, &["worktree", "remove", "--force", path_str], SHORT_TIMEOUT).await;
    if removed.is_none() {
        let _ = tokio::fs::remove_dir_all(worktree_path).await;
    }
    let _ = run_git(repo_path, &["worktree", "prune"], SHORT_TIMEOUT).await;
}

/// Collect git stats after a successful session (`spec.md` §4.10).
pub async fn collect_git_stats(cwd: &Path, default_branch: &str, fallback_commit_count: u32) -> GitStats {
    let last_commit_sha = run_git(cwd, &["rev-parse", "HEAD"], SHORT_TIMEOUT).await;

    let commit_count = run_git(
        cwd,
        &["rev-list", "--count", "HEAD", &format!("^origin/{default_branch}")],
        SHORT_TIMEOUT,
    )
    .await
    .and_then(|s| s.parse::<u32>().ok())
    .unwrap_or(fallback_commit_count);

    let (files_changed, lines_added, lines_removed) = match run_git(cwd, &["diff", "--numstat", "HEAD~1"], SHORT_TIMEOUT).await {
        Some(output) => parse_numstat(&output),
        None => (0, 0, 0),
    };

    GitStats {
        commit_count,
        files_changed,
        lines_added,
        lines_removed,
        last_commit_sha,
    }
}

fn parse_numstat(output: &str) -> (u32, u32, u32) {
    let mut files = 0u32;
    let mut added = 0u32;
    let mut removed = 0u32;
    for line in output.lines() {
        let mut parts = line.split_whitespace();
        let (Some(a), Some(r)) = (parts.next(), parts.next()) else { continue };
        files += 1;
        added += a.parse::<u32>().unwrap_or(0);
        removed += r.parse::<u32>().unwrap_or(0);
    }
    (files, added, removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numstat_sums_adds_removes_and_files() {
        let output = "3\t1\tsrc/lib.rs\n10\t0\tsrc/new.rs\n";
        assert_eq!(parse_numstat(output), (2, 13, 1));
    }

    #[test]
    fn numstat_ignores_binary_dash_entries() {
        let output = "-\t-\tassets/logo.png\n5\t2\tsrc/lib.rs\n";
        assert_eq!(parse_numstat(output), (2, 5, 2));
    }

    #[test]
    fn numstat_empty_output_yields_zeros() {
        assert_eq!(parse_numstat(""), (0, 0, 0));
    }
}
