// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pre-tool permission gate (`spec.md` §4.7) and post-tool team tracker
//! (`spec.md` §4.8). Both are synchronous-style decision functions; the
//! caller wires them into the engine's hook callbacks.

use wm_core::{TeamMember, TeamMessage, TeamState, Worker};
use wm_adapters::HookDecision;

const DANGEROUS_BASH_PATTERNS: &[&str] =
    &["rm -rf /", ":(){ :|:& };:", "mkfs", "> /dev/sda", "dd if=/dev/zero", "chmod -R 777 /"];

const SENSITIVE_PATH_FRAGMENTS: &[&str] =
    &[".env", "id_rsa", ".ssh/", ".aws/credentials", ".netrc", ".npmrc"];

/// `spec.md` §4.7.
pub fn pre_tool_permission_hook(tool_name: &str, tool_input: &serde_json::Value) -> HookDecision {
    match tool_name {
        "Bash" => {
            let command = tool_input.get("command").and_then(|v| v.as_str()).unwrap_or("");
            if DANGEROUS_BASH_PATTERNS.iter().any(|p| command.contains(p)) {
                HookDecision::deny("Dangerous command blocked by safety policy")
            } else {
                HookDecision::allow("Allowed by buildd permission hook")
            }
        }
        "Write" | "Edit" | "MultiEdit" => {
            let file_path = tool_input.get("file_path").and_then(|v| v.as_str()).unwrap_or("");
            if SENSITIVE_PATH_FRAGMENTS.iter().any(|p| file_path.contains(p)) {
                HookDecision::deny(format!("Cannot write to sensitive path: {file_path}"))
            } else {
                HookDecision::allow("Allowed by buildd permission hook")
            }
        }
        _ => HookDecision::allow("Allowed by buildd permission hook"),
    }
}

/// `spec.md` §4.8. Never denies; mutates `worker.team_state` and appends
/// milestones as a side effect of observing `TeamCreate`/`Task`/`SendMessage`
/// tool calls.
pub fn post_tool_team_tracker_hook(worker: &mut Worker, tool_name: &str, tool_input: &serde_json::Value, now_ms: u64) {
    match tool_name {
        "TeamCreate" => {
            let team_name = tool_input.get("team_name").and_then(|v| v.as_str()).unwrap_or("unnamed").to_string();
            worker.team_state =
                Some(TeamState { team_name: team_name.clone(), members: Vec::new(), messages: Default::default(), created_at: now_ms });
            worker.push_milestone(wm_core::Milestone::status(format!("Team created: {team_name}"), now_ms));
        }
        "Task" => {
            let Some(team) = worker.team_state.as_mut() else { return };
            let name = tool_input.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let role = tool_input.get("subagent_type").and_then(|v| v.as_str()).unwrap_or("").to_string();
            team.members.push(TeamMember { name: name.clone(), role, status: "active".into(), spawned_at: now_ms });
            worker.push_milestone(wm_core::Milestone::status(format!("Subagent: {name}"), now_ms));
        }
        "SendMessage" => {
            let is_broadcast = tool_input.get("type").and_then(|v| v.as_str()) == Some("broadcast");
            let from = tool_input.get("sender").and_then(|v| v.as_str()).unwrap_or("leader").to_string();
            let to = if is_broadcast {
                "broadcast".to_string()
            } else {
                tool_input.get("recipient").and_then(|v| v.as_str()).unwrap_or("unknown").to_string()
            };
            let content = tool_input.get("content").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let summary = tool_input.get("summary").and_then(|v| v.as_str()).map(String::from);
            let Some(team) = worker.team_state.as_mut() else { return };
            wm_core::push_bounded(
                &mut team.messages,
                TeamMessage { from, to, content, summary, timestamp: now_ms },
                wm_core::MAX_TEAM_MESSAGES,
            );
            if is_broadcast {
                worker.push_milestone(wm_core::Milestone::status("Team broadcast sent", now_ms));
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dangerous_bash_command_denied() {
        let decision = pre_tool_permission_hook("Bash", &serde_json::json!({"command": "rm -rf /"}));
        assert!(!decision.allow);
    }

    #[test]
    fn benign_bash_command_allowed() {
        let decision = pre_tool_permission_hook("Bash", &serde_json::json!({"command": "ls -la"}));
        assert!(decision.allow);
    }

    #[test]
    fn write_to_sensitive_path_denied() {
        let decision = pre_tool_permission_hook("Write", &serde_json::json!({"file_path": "/home/u/.ssh/id_rsa"}));
        assert!(!decision.allow);
    }

    #[test]
    fn other_tools_allowed_by_default() {
        let decision = pre_tool_permission_hook("Grep", &serde_json::json!({}));
        assert!(decision.allow);
    }

    fn worker() -> Worker {
        Worker::new(
            wm_core::WorkerId::new(),
            wm_core::TaskId::new(),
            "t".into(),
            "d".into(),
            wm_core::WorkspaceId::new(),
            "ws".into(),
            0,
        )
    }

    #[test]
    fn team_create_initializes_team_state() {
        let mut w = worker();
        post_tool_team_tracker_hook(&mut w, "TeamCreate", &serde_json::json!({"team_name": "alpha"}), 1);
        assert_eq!(w.team_state.as_ref().unwrap().team_name, "alpha");
    }

    #[test]
    fn broadcast_message_emits_milestone_dm_does_not() {
        let mut w = worker();
        post_tool_team_tracker_hook(&mut w, "TeamCreate", &serde_json::json!({}), 1);
        post_tool_team_tracker_hook(
            &mut w,
            "SendMessage",
            &serde_json::json!({"type": "direct", "recipient": "bob", "content": "hi"}),
            2,
        );
        assert_eq!(w.milestones.len(), 1);
        post_tool_team_tracker_hook(
            &mut w,
            "SendMessage",
            &serde_json::json!({"type": "broadcast", "content": "all hands"}),
            3,
        );
        assert_eq!(w.milestones.len(), 2);
        assert_eq!(w.team_state.as_ref().unwrap().messages.len(), 2);
    }
}
