// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request/response shapes exchanged with BuilddServer (`spec.md` §6).

use serde::{Deserialize, Serialize};
use wm_core::{TaskId, WaitingFor, WorkerId, WorkspaceId};

#[derive(Debug, Clone, Serialize)]
pub struct ClaimRequest {
    pub max_tasks: u32,
    pub workspace_id: WorkspaceId,
    pub local_ui_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaimResponse {
    pub workers: Vec<ClaimedWorker>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaimedWorker {
    pub id: WorkerId,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub task: Option<TaskRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub workspace_id: WorkspaceId,
    pub workspace_name: String,
    #[serde(default)]
    pub context: TaskContext,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskContext {
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub media_type: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub base64: Option<String>,
}

/// Server-facing status value, distinct from `wm_core::WorkerStatus`: the
/// server only tracks four coarse states (`spec.md` §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Running,
    WaitingInput,
    Completed,
    Failed,
}

/// Partial update sent via `PATCH /api/workers/{id}`.
///
/// All fields optional; only set ones are included. `waiting_for` uses a
/// bare `Option` (not `skip_serializing_if`) because sending an explicit
/// `null` is how the server clears a previously-set waiting state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ServerStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestones: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting_for: Option<Option<WaitingFor>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_ui_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_changed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines_added: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines_removed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_commit_sha: Option<String>,
}

impl WorkerPatch {
    pub fn status(mut self, status: ServerStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn current_action(mut self, action: impl Into<String>) -> Self {
        self.current_action = Some(action.into());
        self
    }

    pub fn clear_waiting_for(mut self) -> Self {
        self.waiting_for = Some(None);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn git_stats(mut self, stats: &GitStats) -> Self {
        self.commit_count = Some(stats.commit_count);
        self.files_changed = Some(stats.files_changed);
        self.lines_added = Some(stats.lines_added);
        self.lines_removed = Some(stats.lines_removed);
        self.last_commit_sha = stats.last_commit_sha.clone();
        self
    }
}

/// Git stats collected after a session ends (`spec.md` §4.10).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitStats {
    pub commit_count: u32,
    pub files_changed: u32,
    pub lines_added: u32,
    pub lines_removed: u32,
    #[serde(default)]
    pub last_commit_sha: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatRequest {
    pub local_ui_url: String,
    pub active_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeartbeatResponse {
    #[serde(default)]
    pub viewer_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservationDigest {
    pub digest: String,
    #[serde(default)]
    pub task_matched: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSummaryRequest {
    pub worker_id: WorkerId,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceMemoryRequest {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SkillBundle {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub content: String,
}
