// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prompt-part assembly (`spec.md` §4.5 step 4) and the follow-up
//! reconstruction prompt (`spec.md` §4.9 "Reconstructed context").

use wm_core::{GitConfig, Milestone, Worker};

const MAX_WORKSPACE_MEMORY_BYTES: usize = 4096;

/// Strip a trailing `\n---…` suffix from a task description, per `spec.md`
/// §4.5 step 4.
pub fn strip_trailing_separator(description: &str) -> &str {
    match description.find("\n---") {
        Some(idx) => &description[..idx],
        None => description,
    }
}

fn truncate_bytes(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

pub struct PromptInputs<'a> {
    pub admin_confirmed: bool,
    pub git_config: Option<&'a GitConfig>,
    pub workspace_memory_digest: Option<&'a str>,
    pub task_matched_observations: &'a [String],
    pub skills_preamble: Option<&'a str>,
    pub task_description: &'a str,
}

/// Assemble the fixed-order prompt parts for a new session (`spec.md` §4.5
/// step 4).
pub fn assemble_prompt(inputs: &PromptInputs<'_>) -> String {
    let mut parts = Vec::new();

    if inputs.admin_confirmed {
        if let Some(git_config) = inputs.git_config {
            if let Some(instructions) = &git_config.agent_instructions {
                parts.push(instructions.clone());
            }
            if git_config.branching_strategy != wm_core::BranchingStrategy::None {
                parts.push(format!(
                    "Git workflow: branch strategy {:?}, commit style {}, requires PR: {}",
                    git_config.branching_strategy, git_config.commit_style, git_config.requires_pr
                ));
            }
        }
    }

    if let Some(digest) = inputs.workspace_memory_digest {
        let mut section = truncate_bytes(digest, MAX_WORKSPACE_MEMORY_BYTES);
        if !inputs.task_matched_observations.is_empty() {
            section.push_str("\n\nRelevant prior observations:\n");
            for obs in inputs.task_matched_observations.iter().take(5) {
                section.push_str("- ");
                section.push_str(obs);
                section.push('\n');
            }
        }
        parts.push(section);
    }

    if let Some(skills) = inputs.skills_preamble {
        parts.push(skills.to_string());
    }

    parts.push(strip_trailing_separator(inputs.task_description).to_string());

    parts.push(
        "When you need clarification, prefer the question tool over asking in free text."
            .to_string(),
    );

    parts.push("--- end of prompt parts ---".to_string());

    parts.join("\n\n")
}

/// Render the last 30 timeline messages as `**Agent:** …` / `**User:** …`,
/// tool calls omitted (`spec.md` §4.9 step 4).
fn render_conversation(worker: &Worker) -> (String, Option<String>) {
    let recent: Vec<&wm_core::MessageEntry> = worker.messages.iter().rev().take(30).collect();
    let mut lines = Vec::new();
    let mut last_agent_text = None;
    for entry in recent.iter().rev() {
        match entry {
            wm_core::MessageEntry::Text { text, .. } => {
                lines.push(format!("**Agent:** {text}"));
                last_agent_text = Some(text.clone());
            }
            wm_core::MessageEntry::User { text, .. } => {
                lines.push(format!("**User:** {text}"));
            }
            wm_core::MessageEntry::ToolUse { .. } => {}
        }
    }
    (lines.join("\n\n"), last_agent_text)
}

/// Collapse last-20-read / all-edited-or-written files context from a
/// worker's tool-call history (`spec.md` §4.9 step 3).
fn collapse_files_context(worker: &Worker) -> String {
    let mut read_files = Vec::new();
    let mut written_files = std::collections::BTreeSet::new();
    for call in &worker.tool_calls {
        let Some(path) = call.input.as_ref().and_then(|v| v.get("file_path")).and_then(|v| v.as_str()) else {
            continue;
        };
        match call.name.as_str() {
            "Read" => read_files.push(path.to_string()),
            "Edit" | "Write" | "MultiEdit" => {
                written_files.insert(path.to_string());
            }
            _ => {}
        }
    }
    read_files.truncate(20);
    let mut lines = Vec::new();
    if !read_files.is_empty() {
        lines.push(format!("Files read: {}", read_files.join(", ")));
    }
    if !written_files.is_empty() {
        lines.push(format!("Files edited/written: {}", written_files.into_iter().collect::<Vec<_>>().join(", ")));
    }
    lines.join("\n")
}

/// Filter milestones to a "work completed" summary (`spec.md` §4.9 step 5):
/// status and checkpoint milestones, skipping transient phase chatter.
fn work_completed_summary(worker: &Worker) -> String {
    worker
        .milestones
        .iter()
        .filter_map(|m| match m {
            Milestone::Status { text, .. } => Some(text.clone()),
            Milestone::Checkpoint { event, .. } => Some(format!("Checkpoint: {event}")),
            Milestone::Phase { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the Layer 2 reconstructed-context prompt for a follow-up message to
/// a worker with no usable resume token (`spec.md` §4.9 "Reconstructed
/// context").
pub fn reconstruct_context_prompt(worker: &Worker, follow_up_message: &str) -> String {
    let mut sections = Vec::new();
    sections.push(
        "Continuing a previous conversation — do not re-read files unless the user asks about something new."
            .to_string(),
    );
    sections.push(worker.task_description.clone());

    let files = collapse_files_context(worker);
    if !files.is_empty() {
        sections.push(files);
    }

    let (conversation, last_agent_text) = render_conversation(worker);
    if !conversation.is_empty() {
        sections.push(conversation);
    }
    if let Some(last) = last_agent_text {
        sections.push(format!("Your Last Response:\n{last}"));
    }

    let summary = work_completed_summary(worker);
    if !summary.is_empty() {
        sections.push(format!("Work completed so far:\n{summary}"));
    }

    sections.push(follow_up_message.to_string());

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_separator() {
        assert_eq!(strip_trailing_separator("do the thing\n--- metadata ---"), "do the thing");
        assert_eq!(strip_trailing_separator("no separator here"), "no separator here");
    }

    #[test]
    fn truncates_workspace_memory_digest_to_byte_budget() {
        let digest = "x".repeat(5000);
        let inputs = PromptInputs {
            admin_confirmed: false,
            git_config: None,
            workspace_memory_digest: Some(&digest),
            task_matched_observations: &[],
            skills_preamble: None,
            task_description: "task",
        };
        let prompt = assemble_prompt(&inputs);
        assert!(prompt.len() < 5000 + 200);
    }

    #[test]
    fn reconstruction_includes_follow_up_and_task_description() {
        let worker = wm_core::Worker::new(
            wm_core::WorkerId::new(),
            wm_core::TaskId::new(),
            "title".into(),
            "original task".into(),
            wm_core::WorkspaceId::new(),
            "ws".into(),
            0,
        );
        let prompt = reconstruct_context_prompt(&worker, "please continue");
        assert!(prompt.contains("original task"));
        assert!(prompt.contains("please continue"));
    }
}
