// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `retry` description rebuilding and the `sendMessage` resume cascade
//! (`spec.md` §4.5 "Retry", §4.9).

use wm_core::{Clock, Milestone, WaitingKind, Worker, WorkerId, WorkerStatus};
use wm_wire::ServerStatus;

use super::WorkerManager;
use crate::prompt::reconstruct_context_prompt;

const PLAN_APPROVAL_MESSAGE: &str = "Approve & implement";

/// Rebuild a context-preserving description for a retried worker
/// (`spec.md` §4.5 "Retry"): original task plus a summary of non-terminal
/// milestones plus a stalled-session preamble.
pub fn build_retry_description(worker: &Worker) -> String {
    let milestone_summary: String = worker
        .milestones
        .iter()
        .filter_map(|m| match m {
            Milestone::Status { text, .. } => Some(text.clone()),
            Milestone::Checkpoint { event, .. } => Some(format!("Checkpoint: {event}")),
            Milestone::Phase { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut parts = vec![worker.task_description.clone()];
    if !milestone_summary.is_empty() {
        parts.push(format!("Progress so far:\n{milestone_summary}"));
    }
    parts.push("The previous session stalled; continue from where it left off.".to_string());
    parts.join("\n\n")
}

/// `spec.md` §4.9: return `false` if no such worker.
pub async fn send_message<C: Clock>(manager: &WorkerManager<C>, id: &WorkerId, message: &str) -> bool {
    let Some(worker) = manager.get_worker(id) else { return false };

    let has_active_session = manager.sessions.lock().contains_key(id);

    if !has_active_session && matches!(worker.status, WorkerStatus::Done | WorkerStatus::Error | WorkerStatus::Stale) {
        reactivate_and_resume(manager, id, &worker, message).await;
        return true;
    }

    if worker.status == WorkerStatus::Waiting
        && worker.waiting_for.as_ref().map(|w| w.kind) == Some(WaitingKind::PlanApproval)
        && worker.plan_content.is_some()
        && message == PLAN_APPROVAL_MESSAGE
    {
        execute_approved_plan(manager, id, &worker).await;
        return true;
    }

    enqueue_on_active_session(manager, id, &worker, message).await;
    true
}

async fn reactivate_and_resume<C: Clock>(manager: &WorkerManager<C>, id: &WorkerId, worker: &Worker, message: &str) {
    let now = manager.clock.epoch_ms();
    let reactivated = manager.with_worker_mut(id, |w| {
        w.status = WorkerStatus::Working;
        w.error = None;
        w.completed_at = None;
        w.push_message(wm_core::MessageEntry::User { text: message.to_string(), timestamp: now });
        w.push_milestone(Milestone::status("Resuming from previous session", now));
        w.clone()
    });
    let Some(worker) = reactivated else { return };
    manager.emit_worker_update(&worker);
    let _ = manager.store.save_worker(&worker);

    tracing::info!(worker_id = %id, "resume_requested");

    if let Err(e) = manager.resolver.resolve(&worker.workspace_id).await {
        manager.with_worker_mut(id, |w| {
            w.status = WorkerStatus::Error;
            w.error = Some(e.to_string());
        });
        return;
    }

    let session_id = worker.session_id.as_ref().map(|s| s.as_str().to_string());
    let layer1_result = match &session_id {
        Some(sid) => {
            tracing::info!(worker_id = %id, "resume_layer1_attempt");
            manager.start_session_for(&worker, Some(sid.clone()), Some(message.to_string()), &[]).await
        }
        None => {
            tracing::info!(worker_id = %id, "resume_layer1_skipped");
            Err("no session id to resume".to_string())
        }
    };

    if layer1_result.is_err() {
        tracing::info!(worker_id = %id, "resume_layer2_attempt");
        let reconstructed = reconstruct_context_prompt(&worker, message);
        if let Err(e) = manager.start_session_for(&worker, None, Some(reconstructed), &[]).await {
            manager.with_worker_mut(id, |w| {
                w.status = WorkerStatus::Error;
                w.error = Some(e);
            });
        }
    }
}

async fn execute_approved_plan<C: Clock>(manager: &WorkerManager<C>, id: &WorkerId, worker: &Worker) {
    if let Some(session) = manager.sessions.lock().remove(id) {
        session.abort();
    }
    let now = manager.clock.epoch_ms();
    let plan = worker.plan_content.clone().unwrap_or_default();

    let updated = manager.with_worker_mut(id, |w| {
        w.waiting_for = None;
        w.plan_content = None;
        w.current_action = "Executing plan...".to_string();
        w.status = WorkerStatus::Working;
        w.push_milestone(Milestone::status("Plan approved — executing with fresh context", now));
        w.clone()
    });
    let Some(updated) = updated else { return };
    manager.emit_worker_update(&updated);

    let prompt = format!("Execute this plan:\n\n{plan}");
    if let Err(e) = manager.start_session_for(&updated, None, Some(prompt), &[]).await {
        manager.with_worker_mut(id, |w| {
            w.status = WorkerStatus::Error;
            w.error = Some(e);
        });
    }
}

async fn enqueue_on_active_session<C: Clock>(manager: &WorkerManager<C>, id: &WorkerId, worker: &Worker, message: &str) {
    let now = manager.clock.epoch_ms();
    let parent_tool_use_id = worker.waiting_for.as_ref().and_then(|w| w.tool_use_id.clone());
    let session_id = worker.session_id.as_ref().map(|s| s.as_str().to_string());

    let was_waiting_or_stale = matches!(worker.status, WorkerStatus::Waiting | WorkerStatus::Stale);
    let preview: String = message.chars().take(30).collect();

    let updated = manager.with_worker_mut(id, |w| {
        if was_waiting_or_stale {
            w.status = WorkerStatus::Working;
            w.waiting_for = None;
            w.current_action = "Processing message...".to_string();
        }
        w.push_message(wm_core::MessageEntry::User { text: message.to_string(), timestamp: now });
        w.push_milestone(Milestone::status(format!("User: {preview}…"), now));
        w.clone()
    });
    let Some(updated) = updated else { return };
    manager.emit_worker_update(&updated);

    if let Some(session) = manager.sessions.lock().get(id).cloned() {
        session.input.enqueue(wm_core::EngineInputMessage { text: message.to_string(), parent_tool_use_id, session_id });
    }

    if was_waiting_or_stale {
        let patch = WorkerManager::<C>::build_patch(&updated).status(ServerStatus::Running).clear_waiting_for();
        let _ = manager.server.patch_worker(id, &patch).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker() -> Worker {
        Worker::new(
            wm_core::WorkerId::new(),
            wm_core::TaskId::new(),
            "t".into(),
            "original task".into(),
            wm_core::WorkspaceId::new(),
            "ws".into(),
            0,
        )
    }

    #[test]
    fn retry_description_includes_original_task_and_stall_preamble() {
        let mut w = worker();
        w.push_milestone(Milestone::status("step one done", 1));
        let description = build_retry_description(&w);
        assert!(description.contains("original task"));
        assert!(description.contains("step one done"));
        assert!(description.contains("previous session stalled"));
    }

    #[test]
    fn retry_description_without_milestones_still_has_preamble() {
        let w = worker();
        let description = build_retry_description(&w);
        assert!(description.contains("previous session stalled"));
    }
}
