// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `Session`: per-worker handle to a live engine interaction (`spec.md` §3).

use crate::message_stream::MessageStream;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Lifetime bounded to a worker's `working|waiting|stale` phase
/// (`spec.md` §3 invariant 1).
pub struct Session {
    pub input: MessageStream,
    pub cancel: CancellationToken,
    /// The directory the engine actually runs in (worktree, if one was set
    /// up for this session).
    pub cwd: PathBuf,
    /// The original repository checkout, independent of any worktree.
    pub original_path: PathBuf,
    /// Set if a worktree was created for this session, for teardown.
    pub worktree_path: Option<PathBuf>,
}

impl Session {
    pub fn new(cwd: PathBuf, original_path: PathBuf, worktree_path: Option<PathBuf>) -> Self {
        Self { input: MessageStream::new(), cancel: CancellationToken::new(), cwd, original_path, worktree_path }
    }

    pub fn abort(&self) {
        self.cancel.cancel();
        self.input.end();
    }
}
