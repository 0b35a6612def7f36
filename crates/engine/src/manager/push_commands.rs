// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Push-channel command dispatch (`spec.md` §4.12, §6): `pause`, `resume`,
//! `abort`, `message`, `skill_install`, `rollback`.

use wm_core::{Clock, Milestone, WorkerId};
use wm_wire::{PushCommand, SkillBundle};

use super::WorkerManager;

/// Route one decoded `worker-<id>` push command to its handler.
pub async fn dispatch_push_command<C: Clock>(manager: &WorkerManager<C>, id: &WorkerId, command: PushCommand) {
    match command {
        PushCommand::Pause => mark_milestone(manager, id, "Pause requested").await,
        PushCommand::Resume => mark_milestone(manager, id, "Resume requested").await,
        PushCommand::Abort { text } => manager.abort(id, text).await,
        PushCommand::Message { text } => {
            manager.send_message(id, &text).await;
        }
        PushCommand::SkillInstall { bundle, installer_command, skill_slug } => {
            skill_install(manager, id, bundle, installer_command, skill_slug).await
        }
        PushCommand::Rollback { checkpoint_uuid } => rollback(manager, id, checkpoint_uuid).await,
    }
}

async fn mark_milestone<C: Clock>(manager: &WorkerManager<C>, id: &WorkerId, text: &str) {
    let now = manager.clock.epoch_ms();
    let updated = manager.with_worker_mut(id, |w| {
        w.push_milestone(Milestone::status(text, now));
        w.clone()
    });
    if let Some(worker) = updated {
        manager.emit_worker_update(&worker);
    }
}

async fn rollback<C: Clock>(manager: &WorkerManager<C>, id: &WorkerId, checkpoint_uuid: Option<String>) {
    let label = checkpoint_uuid.unwrap_or_else(|| "latest checkpoint".to_string());
    mark_milestone(manager, id, &format!("Rollback requested: {label}")).await;
}

/// `spec.md` §4.12: sync a bundle to the server, or validate and run an
/// installer command under a 120s timeout, reporting the outcome as a
/// milestone since there's no dedicated push-response channel back to the
/// UI beyond worker state.
async fn skill_install<C: Clock>(
    manager: &WorkerManager<C>,
    id: &WorkerId,
    bundle: Option<SkillBundle>,
    installer_command: Option<String>,
    skill_slug: Option<String>,
) {
    let Some(worker) = manager.get_worker(id) else { return };

    if let Some(bundle) = bundle {
        let slug = bundle.slug.clone();
        match manager.server.sync_skill(&worker.workspace_id, &bundle).await {
            Ok(()) => mark_milestone(manager, id, &format!("Skill '{slug}' installed")).await,
            Err(e) => mark_milestone(manager, id, &format!("Skill '{slug}' install failed: {e}")).await,
        }
        return;
    }

    let Some(command) = installer_command else { return };

    if manager.config.skill_install_reject_all {
        mark_milestone(manager, id, "Installer command rejected: local reject-all policy").await;
        return;
    }

    if manager.config.local_installer_allowlist.iter().any(|allowed| allowed == &command) {
        run_installer(manager, id, &command).await;
        return;
    }

    match manager.server.workspace_config(&worker.workspace_id).await {
        Ok(config) if config.installer_allowlist.iter().any(|allowed| allowed == &command) => {
            run_installer(manager, id, &command).await;
        }
        Ok(_) => {
            mark_milestone(manager, id, "Installer command rejected: not on any allowlist").await;
        }
        Err(e) => {
            tracing::warn!(worker_id = %id, error = %e, "failed to fetch workspace allowlist for skill_install");
            mark_milestone(manager, id, "Installer command rejected: allowlist unavailable").await;
        }
    }

    let _ = skill_slug;
}

async fn run_installer<C: Clock>(manager: &WorkerManager<C>, id: &WorkerId, command: &str) {
    let outcome = wm_adapters::skill::run_installer_command(command, &manager.config.home_dir).await;
    let summary = if outcome.success {
        format!("Installer command succeeded: {}", truncate_for_milestone(&outcome.stdout))
    } else {
        format!("Installer command failed: {}", truncate_for_milestone(&outcome.stderr))
    };
    mark_milestone(manager, id, &summary).await;
}

fn truncate_for_milestone(s: &str) -> String {
    const MAX: usize = 200;
    if s.len() <= MAX {
        s.trim().to_string()
    } else {
        format!("{}…", s.chars().take(MAX).collect::<String>())
    }
}
