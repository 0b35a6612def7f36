// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `Worker` record: the central, bounded, disk-persisted state of one
//! claimed task's agent session.

use crate::events::PromptOption;
use crate::ids::{EngineSessionId, TaskId, WorkerId, WorkspaceId};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;

/// Bound on `messages` and `tool_calls` (`spec.md` §3 invariant 4).
pub const MAX_MESSAGES: usize = 200;
pub const MAX_TOOL_CALLS: usize = 200;
pub const MAX_MILESTONES: usize = 30;
pub const MAX_COMMITS: usize = 50;
pub const MAX_OUTPUT_LINES: usize = 100;
pub const MAX_TEAM_MESSAGES: usize = 200;

/// Append to a bounded FIFO, dropping the oldest entry on overflow.
pub fn push_bounded<T>(deque: &mut VecDeque<T>, item: T, max_len: usize) {
    deque.push_back(item);
    while deque.len() > max_len {
        deque.pop_front();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Working,
    Waiting,
    Stale,
    Done,
    Error,
}

impl WorkerStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerStatus::Done | WorkerStatus::Error)
    }

    pub fn has_active_session(self) -> bool {
        matches!(self, WorkerStatus::Working | WorkerStatus::Waiting | WorkerStatus::Stale)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitingKind {
    Question,
    PlanApproval,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitingFor {
    #[serde(rename = "type")]
    pub kind: WaitingKind,
    pub prompt: String,
    #[serde(default)]
    pub options: Option<Vec<PromptOption>>,
    #[serde(default)]
    pub tool_use_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEntry {
    Text { text: String, timestamp: u64 },
    ToolUse { id: String, name: String, timestamp: u64 },
    User { text: String, timestamp: u64 },
}

impl MessageEntry {
    pub fn timestamp(&self) -> u64 {
        match self {
            MessageEntry::Text { timestamp, .. }
            | MessageEntry::ToolUse { timestamp, .. }
            | MessageEntry::User { timestamp, .. } => *timestamp,
        }
    }
}

/// Recorded tool invocation. `input` is bounded to 500 bytes of JSON when
/// persisted (see `wm-storage::worker_store`); in memory it is kept whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallEntry {
    pub name: String,
    pub timestamp: u64,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Milestone {
    Phase { text: String, timestamp: u64 },
    Status { text: String, timestamp: u64 },
    Checkpoint { event: String, timestamp: u64 },
}

impl Milestone {
    pub fn status(text: impl Into<String>, timestamp: u64) -> Self {
        Milestone::Status { text: text.into(), timestamp }
    }

    pub fn phase(text: impl Into<String>, timestamp: u64) -> Self {
        Milestone::Phase { text: text.into(), timestamp }
    }

    pub fn text(&self) -> &str {
        match self {
            Milestone::Phase { text, .. } | Milestone::Status { text, .. } => text,
            Milestone::Checkpoint { event, .. } => event,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitEntry {
    pub sha: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
    pub name: String,
    pub role: String,
    pub status: String,
    pub spawned_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMessage {
    pub from: String,
    pub to: String,
    pub content: String,
    #[serde(default)]
    pub summary: Option<String>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamState {
    pub team_name: String,
    #[serde(default)]
    pub members: Vec<TeamMember>,
    #[serde(default)]
    pub messages: VecDeque<TeamMessage>,
    pub created_at: u64,
}

/// Transient, in-process-only tracking of the currently open reasoning
/// phase. Never survives a disk round-trip (`spec.md` §4.3 reconstruction
/// rule): `wm-storage` resets these fields to their defaults on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseTracker {
    pub phase_text: Option<String>,
    pub phase_start: Option<u64>,
    pub phase_tool_count: u32,
    pub phase_tools: Vec<String>,
}

impl PhaseTracker {
    pub const MAX_TRACKED_TOOLS: usize = 5;

    pub fn is_active(&self) -> bool {
        self.phase_text.is_some()
    }

    pub fn open(&mut self, text: String, now_ms: u64) {
        self.phase_text = Some(text);
        self.phase_start = Some(now_ms);
        self.phase_tool_count = 0;
        self.phase_tools.clear();
    }

    pub fn close(&mut self) -> Option<(String, u64)> {
        let text = self.phase_text.take()?;
        let start = self.phase_start.take().unwrap_or(0);
        self.phase_tool_count = 0;
        self.phase_tools.clear();
        Some((text, start))
    }

    pub fn record_tool(&mut self, name: &str, is_labeled_kind: bool) {
        self.phase_tool_count += 1;
        if is_labeled_kind && self.phase_tools.len() < Self::MAX_TRACKED_TOOLS {
            self.phase_tools.push(name.to_string());
        }
    }
}

/// The central worker record (`spec.md` §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub task_id: TaskId,
    pub task_title: String,
    pub task_description: String,
    pub workspace_id: WorkspaceId,
    pub workspace_name: String,
    #[serde(default)]
    pub branch: Option<String>,

    pub status: WorkerStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub current_action: String,
    #[serde(default)]
    pub has_new_activity: bool,

    pub last_activity: u64,
    #[serde(default)]
    pub completed_at: Option<u64>,

    #[serde(default)]
    pub session_id: Option<EngineSessionId>,

    #[serde(default)]
    pub waiting_for: Option<WaitingFor>,
    #[serde(default)]
    pub plan_content: Option<String>,

    #[serde(default)]
    pub messages: VecDeque<MessageEntry>,
    #[serde(default)]
    pub tool_calls: VecDeque<ToolCallEntry>,
    #[serde(default)]
    pub milestones: VecDeque<Milestone>,
    #[serde(default)]
    pub commits: VecDeque<CommitEntry>,
    #[serde(default)]
    pub output: VecDeque<String>,

    #[serde(default)]
    pub team_state: Option<TeamState>,
    #[serde(default)]
    pub worktree_path: Option<PathBuf>,

    #[serde(default)]
    pub phase: PhaseTracker,
    /// Rebuilt on load as the set of `event` values from loaded `checkpoint`
    /// milestones — never written to disk directly.
    #[serde(default, skip_serializing)]
    pub checkpoint_events: HashSet<String>,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        task_id: TaskId,
        task_title: String,
        task_description: String,
        workspace_id: WorkspaceId,
        workspace_name: String,
        now_ms: u64,
    ) -> Self {
        Self {
            id,
            task_id,
            task_title,
            task_description,
            workspace_id,
            workspace_name,
            branch: None,
            status: WorkerStatus::Working,
            error: None,
            current_action: String::new(),
            has_new_activity: false,
            last_activity: now_ms,
            completed_at: None,
            session_id: None,
            waiting_for: None,
            plan_content: None,
            messages: VecDeque::new(),
            tool_calls: VecDeque::new(),
            milestones: VecDeque::new(),
            commits: VecDeque::new(),
            output: VecDeque::new(),
            team_state: None,
            worktree_path: None,
            phase: PhaseTracker::default(),
            checkpoint_events: HashSet::new(),
        }
    }

    pub fn push_message(&mut self, entry: MessageEntry) {
        push_bounded(&mut self.messages, entry, MAX_MESSAGES);
    }

    pub fn push_tool_call(&mut self, entry: ToolCallEntry) {
        push_bounded(&mut self.tool_calls, entry, MAX_TOOL_CALLS);
    }

    pub fn push_milestone(&mut self, milestone: Milestone) {
        if let Milestone::Checkpoint { ref event, .. } = milestone {
            self.checkpoint_events.insert(event.clone());
        }
        push_bounded(&mut self.milestones, milestone, MAX_MILESTONES);
    }

    pub fn push_commit(&mut self, entry: CommitEntry) {
        push_bounded(&mut self.commits, entry, MAX_COMMITS);
    }

    pub fn push_output_line(&mut self, line: String) {
        push_bounded(&mut self.output, line, MAX_OUTPUT_LINES);
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.last_activity = now_ms;
        self.has_new_activity = true;
        if self.status == WorkerStatus::Stale {
            self.status = WorkerStatus::Working;
        }
    }

    /// Rebuild `checkpoint_events` from loaded milestones (`spec.md` §4.3).
    pub fn rebuild_checkpoint_events(&mut self) {
        self.checkpoint_events = self
            .milestones
            .iter()
            .filter_map(|m| match m {
                Milestone::Checkpoint { event, .. } => Some(event.clone()),
                _ => None,
            })
            .collect();
    }

    /// Reset the transient fields a disk round-trip does not preserve.
    pub fn reset_transient(&mut self) {
        self.has_new_activity = false;
        self.current_action = String::new();
        self.phase = PhaseTracker::default();
        self.rebuild_checkpoint_events();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker() -> Worker {
        Worker::new(
            WorkerId::new(),
            TaskId::new(),
            "title".into(),
            "desc".into(),
            WorkspaceId::new(),
            "ws".into(),
            1_000,
        )
    }

    #[test]
    fn bounded_push_evicts_oldest() {
        let mut w = worker();
        for i in 0..(MAX_MILESTONES + 5) {
            w.push_milestone(Milestone::status(format!("m{i}"), i as u64));
        }
        assert_eq!(w.milestones.len(), MAX_MILESTONES);
        assert_eq!(w.milestones.front().unwrap().text(), "m5");
        assert_eq!(w.milestones.back().unwrap().text(), format!("m{}", MAX_MILESTONES + 4));
    }

    #[test]
    fn checkpoint_events_rebuilt_from_milestones() {
        let mut w = worker();
        w.push_milestone(Milestone::Checkpoint { event: "ckpt-a".into(), timestamp: 1 });
        w.push_milestone(Milestone::status("not a checkpoint", 2));
        w.checkpoint_events.clear();
        w.rebuild_checkpoint_events();
        assert!(w.checkpoint_events.contains("ckpt-a"));
        assert_eq!(w.checkpoint_events.len(), 1);
    }

    #[test]
    fn touch_promotes_stale_to_working() {
        let mut w = worker();
        w.status = WorkerStatus::Stale;
        w.touch(2_000);
        assert_eq!(w.status, WorkerStatus::Working);
        assert!(w.has_new_activity);
        assert_eq!(w.last_activity, 2_000);
    }
}
