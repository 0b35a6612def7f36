// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifier newtypes used throughout the supervisor.

crate::define_id! {
    /// Opaque worker identifier, stable for the lifetime of the worker record.
    pub struct WorkerId("wkr-");
}

crate::define_id! {
    /// Identifier of the task claimed from BuilddServer.
    pub struct TaskId("tsk-");
}

crate::define_id! {
    /// Identifier of the workspace (repo) a worker operates in.
    pub struct WorkspaceId("wsp-");
}

/// Opaque resume token returned by the agent engine on session init.
///
/// Distinct from [`WorkerId`]: a worker may go through several engine
/// sessions (retry, follow-up) and each gets its own `EngineSessionId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct EngineSessionId(pub String);

impl EngineSessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EngineSessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
