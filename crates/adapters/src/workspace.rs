// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace resolution: workspace name/URL → local checkout directory.
//!
//! Out of scope per `spec.md` §1 beyond the seam the core consumes; this is
//! a minimal filesystem-backed implementation good enough for a single-user
//! runner, grounded in the teacher's `workspace_path` / `project_path`
//! fields on `AgentConfig` (`crates/daemon/src/adapters/agent/mod.rs`).

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use wm_core::WorkspaceId;

#[derive(Debug, Error)]
pub enum WorkspaceResolveError {
    #[error("unknown workspace: {0}")]
    Unknown(WorkspaceId),
    #[error("resolved path does not exist: {0}")]
    MissingPath(PathBuf),
}

#[async_trait]
pub trait WorkspaceResolver: Send + Sync + 'static {
    async fn resolve(&self, id: &WorkspaceId) -> Result<PathBuf, WorkspaceResolveError>;
}

/// Resolves workspaces from a static id → path map, loaded from the daemon's
/// config file at startup. Good enough for a single machine's set of
/// checked-out repos; a server-driven resolver is a natural follow-up.
pub struct StaticWorkspaceResolver {
    paths: HashMap<WorkspaceId, PathBuf>,
}

impl StaticWorkspaceResolver {
    pub fn new(paths: HashMap<WorkspaceId, PathBuf>) -> Self {
        Self { paths }
    }
}

#[async_trait]
impl WorkspaceResolver for StaticWorkspaceResolver {
    async fn resolve(&self, id: &WorkspaceId) -> Result<PathBuf, WorkspaceResolveError> {
        let path = self.paths.get(id).cloned().ok_or_else(|| WorkspaceResolveError::Unknown(id.clone()))?;
        if !path.exists() {
            return Err(WorkspaceResolveError::MissingPath(path));
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_workspace_errors() {
        let resolver = StaticWorkspaceResolver::new(HashMap::new());
        let err = resolver.resolve(&WorkspaceId::new()).await.unwrap_err();
        assert!(matches!(err, WorkspaceResolveError::Unknown(_)));
    }

    #[tokio::test]
    async fn resolves_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        let id = WorkspaceId::new();
        let mut paths = HashMap::new();
        paths.insert(id.clone(), dir.path().to_path_buf());
        let resolver = StaticWorkspaceResolver::new(paths);
        let resolved = resolver.resolve(&id).await.unwrap();
        assert_eq!(resolved, dir.path());
    }
}
