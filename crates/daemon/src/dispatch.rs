// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Push-frame routing (`spec.md` §6): decode a raw [`PushFrame`] by topic and
//! kind, and dispatch it to the worker-scoped handler in `wm-engine` or, for
//! the workspace-scoped `skill:install` event (no worker to target), to the
//! standalone handler below.

use std::sync::Arc;

use serde::Deserialize;
use wm_adapters::{BuilddServerClient, PushFrame};
use wm_core::{Clock, WorkspaceId};
use wm_engine::{dispatch_push_command, ManagerConfig, WorkerManager};
use wm_wire::{SkillBundle, TaskRecord, WorkerCommandEvent};

#[derive(Debug, Deserialize)]
struct TaskAssignedBody {
    task: TaskRecord,
}

#[derive(Debug, Default, Deserialize)]
struct SkillInstallBody {
    #[serde(default)]
    bundle: Option<SkillBundle>,
    #[serde(default)]
    installer_command: Option<String>,
}

/// Route one frame off the push channel. Unrecognized topics/kinds are
/// logged and dropped rather than panicking the dispatch loop.
pub async fn route_frame<C: Clock>(manager: &WorkerManager<C>, server: &Arc<dyn BuilddServerClient>, config: &ManagerConfig, frame: PushFrame) {
    if let Some(id) = frame.topic.strip_prefix("worker-") {
        return route_worker_frame(manager, id, frame).await;
    }
    if let Some(id) = frame.topic.strip_prefix("workspace-") {
        return route_workspace_frame(manager, server, config, id, frame).await;
    }
    tracing::warn!(topic = %frame.topic, "push frame on unrecognized topic");
}

async fn route_worker_frame<C: Clock>(manager: &WorkerManager<C>, worker_id: &str, frame: PushFrame) {
    let worker_id = worker_id.into();
    match serde_json::from_value::<WorkerCommandEvent>(frame.body) {
        Ok(event) => dispatch_push_command(manager, &worker_id, event.command).await,
        Err(e) => tracing::warn!(%worker_id, error = %e, "unparsable worker push frame"),
    }
}

async fn route_workspace_frame<C: Clock>(
    manager: &WorkerManager<C>,
    server: &Arc<dyn BuilddServerClient>,
    config: &ManagerConfig,
    workspace_id: &str,
    frame: PushFrame,
) {
    let workspace_id: WorkspaceId = workspace_id.into();
    match frame.kind.as_str() {
        "task:assigned" => match serde_json::from_value::<TaskAssignedBody>(frame.body) {
            Ok(body) => manager.claim_and_start(&workspace_id, Some(&body.task.id)).await,
            Err(e) => tracing::warn!(%workspace_id, error = %e, "unparsable task:assigned frame"),
        },
        "skill:install" => match serde_json::from_value::<SkillInstallBody>(frame.body) {
            Ok(body) => handle_skill_install(server, config, &workspace_id, body.bundle, body.installer_command).await,
            Err(e) => tracing::warn!(%workspace_id, error = %e, "unparsable skill:install frame"),
        },
        other => tracing::warn!(%workspace_id, kind = other, "unrecognized workspace push frame kind"),
    }
}

/// `spec.md` §4.12: sync a bundle to the server, or validate and run an
/// installer command under a 120s timeout. There is no worker to attach a
/// milestone to here, so outcomes are reported via logging instead.
async fn handle_skill_install(
    server: &Arc<dyn BuilddServerClient>,
    config: &ManagerConfig,
    workspace_id: &WorkspaceId,
    bundle: Option<SkillBundle>,
    installer_command: Option<String>,
) {
    if let Some(bundle) = bundle {
        let slug = bundle.slug.clone();
        match server.sync_skill(workspace_id, &bundle).await {
            Ok(()) => tracing::info!(%workspace_id, skill = %slug, "skill installed"),
            Err(e) => tracing::warn!(%workspace_id, skill = %slug, error = %e, "skill install failed"),
        }
        return;
    }

    let Some(command) = installer_command else { return };

    if config.skill_install_reject_all {
        tracing::info!(%workspace_id, "installer command rejected: local reject-all policy");
        return;
    }

    if config.local_installer_allowlist.iter().any(|allowed| allowed == &command) {
        run_installer(config, workspace_id, &command).await;
        return;
    }

    match server.workspace_config(workspace_id).await {
        Ok(workspace_config) if workspace_config.installer_allowlist.iter().any(|allowed| allowed == &command) => {
            run_installer(config, workspace_id, &command).await;
        }
        Ok(_) => tracing::info!(%workspace_id, "installer command rejected: not on any allowlist"),
        Err(e) => tracing::warn!(%workspace_id, error = %e, "failed to fetch workspace allowlist for skill_install"),
    }
}

async fn run_installer(config: &ManagerConfig, workspace_id: &WorkspaceId, command: &str) {
    let outcome = wm_adapters::skill::run_installer_command(command, &config.home_dir).await;
    if outcome.success {
        tracing::info!(%workspace_id, "installer command succeeded");
    } else {
        tracing::warn!(%workspace_id, stderr = %outcome.stderr, "installer command failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_assigned_body_parses_bare_task() {
        let value = serde_json::json!({
            "task": {
                "id": "tsk_1",
                "title": "Fix bug",
                "description": "details",
                "workspace_id": "wsp_1",
                "workspace_name": "my-repo"
            }
        });
        let body: TaskAssignedBody = serde_json::from_value(value).unwrap();
        assert_eq!(body.task.title, "Fix bug");
    }

    #[test]
    fn skill_install_body_defaults_when_only_command_given() {
        let value = serde_json::json!({ "installer_command": "pip install foo" });
        let body: SkillInstallBody = serde_json::from_value(value).unwrap();
        assert!(body.bundle.is_none());
        assert_eq!(body.installer_command.as_deref(), Some("pip install foo"));
    }

    #[test]
    fn skill_install_body_accepts_empty_object() {
        let body: SkillInstallBody = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(body.bundle.is_none());
        assert!(body.installer_command.is_none());
    }
}
