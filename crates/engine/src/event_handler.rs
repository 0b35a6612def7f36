// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The engine-event handler (`spec.md` §4.6): the single place every
//! engine-yielded event mutates worker state.
//!
//! Mutation and side effects (abort, enqueue-on-session, mark dirty) are
//! separated: this function only mutates the `Worker` and returns a list of
//! [`EngineEffect`]s for the caller (`WorkerManager`) to carry out, mirroring
//! the teacher's effect/event split in `runtime::agent_run`.

use crate::hooks::post_tool_team_tracker_hook;
use crate::loop_detector::{self, LoopVerdict};
use wm_core::{
    AssistantEvent, CommitEntry, ContentBlock, EngineEvent, EngineInputMessage, Milestone,
    ToolCallEntry, WaitingFor, WaitingKind, Worker, WorkerStatus,
};

/// A side effect the engine-event handler decided is needed, for the caller
/// to carry out outside the pure mutation step.
pub enum EngineEffect {
    /// Abort the worker's session with the given reason (loop detected).
    Abort { reason: String },
    /// Enqueue a message on the *current* session's input stream (plan
    /// auto-approval).
    EnqueueOnSession { message: EngineInputMessage },
    /// Send a `waiting_input` status update to the server immediately.
    ReportWaitingToServer,
    /// Persist this worker to disk immediately (critical state, e.g.
    /// `sessionId`, must survive a crash).
    PersistNow,
}

/// Result type: the caller always re-emits a `worker_update` after calling
/// this (`spec.md` §4.6, "After every event, emit a worker_update").
pub struct HandleOutcome {
    pub effects: Vec<EngineEffect>,
    /// Set when the `result` event closes the stream; the caller breaks out
    /// of the event loop after this.
    pub stream_done: bool,
}

impl HandleOutcome {
    fn none() -> Self {
        Self { effects: Vec::new(), stream_done: false }
    }
}

/// Handle one engine event, mutating `worker` in place.
pub fn handle_event(worker: &mut Worker, event: &EngineEvent, now_ms: u64) -> HandleOutcome {
    worker.last_activity = now_ms;
    worker.has_new_activity = true;
    if worker.status == WorkerStatus::Stale {
        worker.status = WorkerStatus::Working;
    }

    match event {
        EngineEvent::System(system) if system.subtype == "init" => {
            if let Some(session_id) = &system.session_id {
                worker.session_id = Some(wm_core::EngineSessionId::new(session_id.clone()));
            }
            let mut outcome = HandleOutcome::none();
            outcome.effects.push(EngineEffect::PersistNow);
            outcome
        }
        EngineEvent::System(_) => HandleOutcome::none(),
        EngineEvent::Assistant(assistant) => handle_assistant_event(worker, assistant, now_ms),
        EngineEvent::Result(result) => {
            close_open_phase(worker, now_ms);
            if result.is_budget_exceeded() {
                let cost = result.total_cost_usd.unwrap_or(0.0);
                let reason = format!("Budget limit exceeded: ${cost:.2}");
                worker.push_milestone(Milestone::status(reason, now_ms));
                worker.error = Some("Budget limit exceeded".to_string());
            } else if !result.is_success() {
                worker.push_milestone(Milestone::status(format!("Error: {}", result.subtype), now_ms));
            }
            HandleOutcome { effects: Vec::new(), stream_done: true }
        }
        EngineEvent::Unknown => HandleOutcome::none(),
    }
}

fn close_open_phase(worker: &mut Worker, now_ms: u64) {
    if let Some((text, start)) = worker.phase.close() {
        worker.push_milestone(Milestone::Phase { text, timestamp: start });
    }
    let _ = now_ms;
}

fn handle_assistant_event(worker: &mut Worker, assistant: &AssistantEvent, now_ms: u64) -> HandleOutcome {
    let mut outcome = HandleOutcome::none();
    for block in &assistant.message.content {
        match block {
            ContentBlock::Text { text } => handle_text_block(worker, text, now_ms),
            ContentBlock::ToolUse { id, name, input } => {
                if handle_tool_use_block(worker, id, name, input, now_ms, &mut outcome) {
                    return outcome;
                }
            }
            ContentBlock::Unknown => {}
        }
    }
    outcome
}

fn handle_text_block(worker: &mut Worker, text: &str, now_ms: u64) {
    worker.push_message(wm_core::MessageEntry::Text { text: text.to_string(), timestamp: now_ms });

    if worker.phase.is_active() && worker.phase.phase_tool_count > 0 {
        if let Some((old_text, start)) = worker.phase.close() {
            worker.push_milestone(Milestone::Phase { text: old_text, timestamp: start });
        }
    }
    worker.phase.open(text.to_string(), now_ms);

    for line in text.lines() {
        if !line.trim().is_empty() {
            worker.push_output_line(line.to_string());
        }
    }
}

const LABELED_TOOL_KINDS: &[&str] = &["Edit", "Write", "Bash"];

/// Returns `true` if the caller should stop processing further blocks (loop
/// detected and an abort was requested).
fn handle_tool_use_block(
    worker: &mut Worker,
    id: &str,
    name: &str,
    input: &serde_json::Value,
    now_ms: u64,
    outcome: &mut HandleOutcome,
) -> bool {
    worker.push_message(wm_core::MessageEntry::ToolUse { id: id.to_string(), name: name.to_string(), timestamp: now_ms });
    worker.push_tool_call(ToolCallEntry { name: name.to_string(), timestamp: now_ms, input: Some(input.clone()) });

    if let LoopVerdict::Stuck { reason } = loop_detector::detect(worker.tool_calls.make_contiguous()) {
        worker.push_milestone(Milestone::status(reason.clone(), now_ms));
        worker.error = Some(reason.clone());
        outcome.effects.push(EngineEffect::Abort { reason });
        return true;
    }

    worker.phase.record_tool(name, LABELED_TOOL_KINDS.contains(&name));
    worker.current_action = describe_action(name, input);
    post_tool_team_tracker_hook(worker, name, input, now_ms);

    match name {
        "Bash" => handle_bash_tool(worker, input, now_ms),
        "AskUserQuestion" => handle_ask_user_question(worker, id, input, now_ms, outcome),
        "EnterPlanMode" => handle_enter_plan_mode(worker, id, outcome),
        "ExitPlanMode" => handle_exit_plan_mode(worker, id, now_ms, outcome),
        _ => {}
    }

    false
}

fn describe_action(name: &str, input: &serde_json::Value) -> String {
    match name {
        "Bash" => {
            let command = input.get("command").and_then(|v| v.as_str()).unwrap_or("");
            format!("Running: {}", command.chars().take(60).collect::<String>())
        }
        "Edit" | "Write" | "MultiEdit" => {
            let path = input.get("file_path").and_then(|v| v.as_str()).unwrap_or("a file");
            format!("Editing {path}")
        }
        "Read" => {
            let path = input.get("file_path").and_then(|v| v.as_str()).unwrap_or("a file");
            format!("Reading {path}")
        }
        other => format!("Using {other}"),
    }
}

fn handle_bash_tool(worker: &mut Worker, input: &serde_json::Value, now_ms: u64) {
    let command = input.get("command").and_then(|v| v.as_str()).unwrap_or("");
    if !is_git_commit_command(command) {
        return;
    }
    let message = extract_commit_message(command);
    worker.push_commit(CommitEntry { sha: "pending".into(), message: message.clone() });
    worker.push_milestone(Milestone::status(format!("Commit: {message}"), now_ms));
}

fn is_git_commit_command(command: &str) -> bool {
    command.contains("git commit")
}

/// Extract the commit message from a `git commit` invocation (`spec.md`
/// §4.6): prefer a heredoc body's first line, else a `-m` argument, else the
/// literal `"commit"`.
pub fn extract_commit_message(command: &str) -> String {
    if let Some(heredoc_start) = command.find("<<") {
        let after = &command[heredoc_start..];
        if let Some(newline) = after.find('\n') {
            let body = &after[newline + 1..];
            if let Some(first_line) = body.lines().next() {
                if !first_line.trim().is_empty() && first_line.trim() != "EOF" {
                    return first_line.trim().to_string();
                }
            }
        }
    }
    for quote in ['"', '\''] {
        let marker = format!("-m {quote}");
        if let Some(start) = command.find(&marker) {
            let after = &command[start + marker.len()..];
            if let Some(end) = after.find(quote) {
                return after[..end].to_string();
            }
        }
    }
    "commit".to_string()
}

fn handle_ask_user_question(
    worker: &mut Worker,
    tool_use_id: &str,
    input: &serde_json::Value,
    now_ms: u64,
    outcome: &mut HandleOutcome,
) {
    let Ok(parsed) = serde_json::from_value::<wm_core::AskUserQuestionInput>(input.clone()) else { return };
    let Some(first) = parsed.questions.into_iter().next() else { return };

    worker.status = WorkerStatus::Waiting;
    worker.waiting_for = Some(WaitingFor {
        kind: WaitingKind::Question,
        prompt: first.question.clone(),
        options: first.options,
        tool_use_id: Some(tool_use_id.to_string()),
    });
    worker.current_action = format!("Waiting: {}", first.question);
    worker.push_milestone(Milestone::status(format!("Question: {}", first.question), now_ms));
    outcome.effects.push(EngineEffect::ReportWaitingToServer);
    outcome.effects.push(EngineEffect::PersistNow);
}

fn handle_enter_plan_mode(worker: &Worker, tool_use_id: &str, outcome: &mut HandleOutcome) {
    outcome.effects.push(EngineEffect::EnqueueOnSession {
        message: EngineInputMessage {
            text: "Approved. Proceed with the plan.".to_string(),
            parent_tool_use_id: Some(tool_use_id.to_string()),
            session_id: worker.session_id.as_ref().map(|s| s.as_str().to_string()),
        },
    });
}

fn handle_exit_plan_mode(worker: &mut Worker, tool_use_id: &str, now_ms: u64, outcome: &mut HandleOutcome) {
    let plan = worker
        .messages
        .iter()
        .rev()
        .find_map(|m| match m {
            wm_core::MessageEntry::Text { text, .. } => Some(text.clone()),
            _ => None,
        })
        .unwrap_or_default();

    worker.plan_content = Some(plan.clone());
    worker.status = WorkerStatus::Waiting;
    worker.waiting_for = Some(WaitingFor {
        kind: WaitingKind::PlanApproval,
        prompt: plan,
        options: Some(vec![
            wm_core::PromptOption { label: "Approve & implement".into() },
            wm_core::PromptOption { label: "Request changes".into() },
        ]),
        tool_use_id: Some(tool_use_id.to_string()),
    });
    worker.push_milestone(Milestone::status("Plan ready for approval", now_ms));
    outcome.effects.push(EngineEffect::ReportWaitingToServer);
    outcome.effects.push(EngineEffect::PersistNow);
}

#[cfg(test)]
mod tests {
    use super::*;
    use wm_core::{AssistantMessage, ResultEvent, SystemEvent};

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
    fn init_event_records_session_id_and_persists() {
        let mut w = worker();
        let event = EngineEvent::System(SystemEvent { subtype: "init".into(), session_id: Some("s-1".into()) });
        let outcome = handle_event(&mut w, &event, 100);
        assert_eq!(w.session_id.as_ref().unwrap().as_str(), "s-1");
        assert!(outcome.effects.iter().any(|e| matches!(e, EngineEffect::PersistNow)));
    }

    #[test]
    fn text_then_result_success_marks_done_path_signals() {
        let mut w = worker();
        let text_event = EngineEvent::Assistant(AssistantEvent {
            message: AssistantMessage { content: vec![ContentBlock::Text { text: "All done!".into() }] },
        });
        handle_event(&mut w, &text_event, 10);
        assert_eq!(w.messages.len(), 1);

        let result_event = EngineEvent::Result(ResultEvent {
            subtype: "success".into(),
            session_id: None,
            stop_reason: None,
            duration_ms: None,
            duration_api_ms: None,
            num_turns: None,
            usage: None,
            total_cost_usd: None,
        });
        let outcome = handle_event(&mut w, &result_event, 20);
        assert!(outcome.stream_done);
    }

    #[test]
    fn ask_user_question_transitions_to_waiting() {
        let mut w = worker();
        let event = EngineEvent::Assistant(AssistantEvent {
            message: AssistantMessage {
                content: vec![ContentBlock::ToolUse {
                    id: "q1".into(),
                    name: "AskUserQuestion".into(),
                    input: serde_json::json!({"questions": [{"question": "Which format?", "options": [{"label": "JSON"}, {"label": "YAML"}]}]}),
                }],
            },
        });
        let outcome = handle_event(&mut w, &event, 5);
        assert_eq!(w.status, WorkerStatus::Waiting);
        let waiting = w.waiting_for.as_ref().unwrap();
        assert_eq!(waiting.prompt, "Which format?");
        assert_eq!(waiting.tool_use_id.as_deref(), Some("q1"));
        assert!(outcome.effects.iter().any(|e| matches!(e, EngineEffect::ReportWaitingToServer)));
    }

    #[test]
    fn exit_plan_mode_captures_last_text_as_plan_content() {
        let mut w = worker();
        w.push_message(wm_core::MessageEntry::Text { text: "# Plan\n1. Step".into(), timestamp: 1 });
        let event = EngineEvent::Assistant(AssistantEvent {
            message: AssistantMessage {
                content: vec![ContentBlock::ToolUse { id: "p1".into(), name: "ExitPlanMode".into(), input: serde_json::json!({}) }],
            },
        });
        handle_event(&mut w, &event, 5);
        assert_eq!(w.plan_content.as_deref(), Some("# Plan\n1. Step"));
        assert_eq!(w.waiting_for.as_ref().unwrap().tool_use_id.as_deref(), Some("p1"));
    }

    #[test]
    fn loop_detected_sets_error_and_requests_abort() {
        let mut w = worker();
        for _ in 0..4 {
            let event = EngineEvent::Assistant(AssistantEvent {
                message: AssistantMessage {
                    content: vec![ContentBlock::ToolUse {
                        id: "x".into(),
                        name: "Read".into(),
                        input: serde_json::json!({"file_path": "/a"}),
                    }],
                },
            });
            handle_event(&mut w, &event, 1);
        }
        let event = EngineEvent::Assistant(AssistantEvent {
            message: AssistantMessage {
                content: vec![ContentBlock::ToolUse {
                    id: "x".into(),
                    name: "Read".into(),
                    input: serde_json::json!({"file_path": "/a"}),
                }],
            },
        });
        let outcome = handle_event(&mut w, &event, 1);
        assert!(w.error.as_deref().unwrap().contains("Agent stuck"));
        assert!(outcome.effects.iter().any(|e| matches!(e, EngineEffect::Abort { .. })));
    }

    #[test]
    fn budget_exceeded_result_sets_error_and_cost_milestone() {
        let mut w = worker();
        let event = EngineEvent::Result(ResultEvent {
            subtype: "error_max_budget_usd".into(),
            session_id: None,
            stop_reason: None,
            duration_ms: None,
            duration_api_ms: None,
            num_turns: None,
            usage: None,
            total_cost_usd: Some(10.25),
        });
        let outcome = handle_event(&mut w, &event, 20);
        assert!(outcome.stream_done);
        assert_eq!(w.error.as_deref(), Some("Budget limit exceeded"));
        assert!(matches!(w.milestones.back(), Some(Milestone::Status { text, .. }) if text.contains("Budget limit exceeded") && text.contains("$10.25")));
    }

    #[test]
    fn commit_message_extracted_from_dash_m_argument() {
        assert_eq!(extract_commit_message("git commit -m \"fix thing\""), "fix thing");
    }

    #[test]
    fn commit_message_extracted_from_heredoc() {
        let command = "git commit -F - <<'EOF'\nfix the widget\n\nlonger body\nEOF";
        assert_eq!(extract_commit_message(command), "fix the widget");
    }

    #[test]
    fn commit_message_falls_back_to_literal() {
        assert_eq!(extract_commit_message("git commit"), "commit");
    }
}
