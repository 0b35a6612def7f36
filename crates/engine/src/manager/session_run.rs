// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle: claim, start, stream events, finish
//! (`spec.md` §4.5, §4.10, §4.11).

use std::path::PathBuf;
use std::sync::Arc;

use wm_adapters::{attachment, git, EngineOptions, SubagentDefinition};
use wm_core::{Clock, Worker, WorkerId, WorkerStatus};
use wm_wire::{Attachment, ClaimRequest, ClaimedWorker, ServerStatus};

use super::WorkerManager;
use crate::event_handler::{self, EngineEffect};
use crate::session::Session;

const AUTH_FAILURE_MARKERS: &[&str] =
    &["invalid api key", "please run /login", "api key is required", "401 unauthorized"];
const SKILL_AGENT_TOOLS: &[&str] = &["Read", "Grep", "Glob", "Bash", "Edit", "Write"];

impl<C: Clock> WorkerManager<C> {
    /// Confirm a claim with BuilddServer and start a session for every
    /// newly-claimed worker (`spec.md` §2 "claimAndStart").
    pub async fn claim_and_start(&self, workspace_id: &wm_core::WorkspaceId, task_id: Option<&wm_core::TaskId>) {
        let request = ClaimRequest {
            max_tasks: self.config.max_tasks,
            workspace_id: workspace_id.clone(),
            local_ui_url: self.config.local_ui_url.clone(),
            task_id: task_id.cloned(),
            environment: self.config.environment.clone(),
        };
        let response = match self.server.claim(request).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "claim request failed");
                return;
            }
        };
        for claimed in response.workers {
            self.materialize_and_start(claimed).await;
        }
    }

    async fn materialize_and_start(&self, claimed: ClaimedWorker) {
        let Some(task) = claimed.task else { return };
        let now = self.clock.epoch_ms();
        let mut worker = Worker::new(
            claimed.id,
            task.id.clone(),
            task.title.clone(),
            task.description.clone(),
            task.workspace_id.clone(),
            task.workspace_name.clone(),
            now,
        );
        worker.branch = claimed.branch;

        // Worker is recorded and marked dirty before the session exists,
        // so visibility is atomic from the caller's viewpoint (`spec.md`
        // §3 invariant 6).
        self.workers.lock().insert(worker.id.clone(), worker.clone());
        self.emit_worker_update(&worker);

        if let Err(e) = self.start_session_for(&worker, None, None, &task.context.attachments).await {
            tracing::warn!(worker_id = %worker.id, error = %e, "session start failed");
            self.with_worker_mut(&worker.id, |w| {
                w.status = WorkerStatus::Error;
                w.error = Some(e);
                w.completed_at = Some(self.clock.epoch_ms());
            });
        }
    }

    /// Start (or restart) a session for `worker`. `resume_session_id`
    /// overrides the worker's own `session_id`; `prompt_override` replaces
    /// the task description as the initial prompt (used by the resume
    /// layers, `spec.md` §4.9).
    pub(crate) async fn start_session_for(
        &self,
        worker: &Worker,
        resume_session_id: Option<String>,
        prompt_override: Option<String>,
        attachments: &[Attachment],
    ) -> Result<(), String> {
        let repo_path = self.resolver.resolve(&worker.workspace_id).await.map_err(|e| e.to_string())?;

        let config = self.server.workspace_config(&worker.workspace_id).await.ok();
        let admin_confirmed = config.as_ref().map(|c| c.config_status.is_admin_confirmed()).unwrap_or(false);
        let git_config = config.as_ref().and_then(|c| c.git_config.clone());

        let (cwd, worktree_path) = if let (Some(branch), Some(git_config)) = (&worker.branch, &git_config) {
            if git_config.branching_strategy != wm_core::BranchingStrategy::None {
                match git::setup_worktree(&repo_path, branch, &git_config.default_branch).await {
                    Some(path) => (path.clone(), Some(path)),
                    None => {
                        self.with_worker_mut(&worker.id, |w| {
                            w.push_milestone(wm_core::Milestone::status("Worktree failed, using repo", self.clock.epoch_ms()));
                        });
                        (repo_path.clone(), None)
                    }
                }
            } else {
                (repo_path.clone(), None)
            }
        } else {
            (repo_path.clone(), None)
        };

        let permission_mode = wm_core::PermissionMode::resolve(
            false,
            git_config.as_ref().and_then(|g| g.bypass_permissions),
            false,
        );

        let use_skill_agents = config.as_ref().map(|c| c.use_skill_agents).unwrap_or(false);
        let bundles = self.server.list_skills(&worker.workspace_id).await.unwrap_or_default();
        let (agents, allowed_tools, skills_preamble) = materialize_skills(&bundles, use_skill_agents);

        let observation_digest = match self.server.observation_digest(&worker.workspace_id, &worker.task_id).await {
            Ok(digest) => Some(digest),
            Err(e) => {
                tracing::debug!(worker_id = %worker.id, error = %e, "observation digest fetch failed, non-fatal");
                None
            }
        };
        let workspace_memory_digest = observation_digest.as_ref().map(|d| d.digest.as_str());
        let task_matched_observations = observation_digest.as_ref().map(|d| d.task_matched.as_slice()).unwrap_or(&[]);

        let system_prompt = crate::prompt::assemble_prompt(&crate::prompt::PromptInputs {
            admin_confirmed,
            git_config: git_config.as_ref(),
            workspace_memory_digest,
            task_matched_observations,
            skills_preamble: skills_preamble.as_deref(),
            task_description: &worker.task_description,
        });

        let use_claude_md = git_config.as_ref().map(|g| g.use_claude_md).unwrap_or(false);
        let setting_sources = if use_claude_md {
            vec!["user".to_string(), "project".to_string()]
        } else {
            vec!["user".to_string()]
        };

        let images = self.resolve_attachments(&worker.id, attachments).await;

        let options = EngineOptions {
            cwd: cwd.clone(),
            model: None,
            env: synthesize_env(&self.config),
            setting_sources,
            permission_mode,
            system_prompt,
            allowed_tools,
            agents,
            resume_session_id: resume_session_id.or_else(|| worker.session_id.as_ref().map(|s| s.as_str().to_string())),
            images,
        };

        let session = Arc::new(Session::new(cwd.clone(), repo_path.clone(), worktree_path.clone()));
        self.sessions.lock().insert(worker.id.clone(), session.clone());
        let _ = self.push.subscribe(&format!("worker-{}", worker.id)).await;

        let prompt = prompt_override.unwrap_or_else(|| worker.task_description.clone());
        let manager = self.clone_handles();
        let worker_id = worker.id.clone();
        let default_branch = git_config.as_ref().map(|g| g.default_branch.clone()).unwrap_or_else(|| "main".to_string());
        let fallback_commit_count = worker.commits.len() as u32;

        tokio::spawn(async move {
            manager.run_session(worker_id, session, prompt, options, repo_path, worktree_path, default_branch, fallback_commit_count).await;
        });

        Ok(())
    }

    /// Resolve each attachment to inline image data, milestoning successes
    /// and failures without aborting the session (`spec.md` §4.5 step 6).
    async fn resolve_attachments(&self, worker_id: &WorkerId, attachments: &[Attachment]) -> Vec<wm_adapters::PromptImage> {
        let mut images = Vec::new();
        for item in attachments {
            let now = self.clock.epoch_ms();
            let milestone = match attachment::resolve_attachment(item).await {
                Ok(image) => {
                    let text = format!("Image: {}", image.filename);
                    images.push(image);
                    text
                }
                Err(e) => format!("Failed to fetch image: {e}"),
            };
            let updated = self.with_worker_mut(worker_id, |w| {
                w.push_milestone(wm_core::Milestone::status(milestone, now));
                w.clone()
            });
            if let Some(worker) = updated {
                self.emit_worker_update(&worker);
            }
        }
        images
    }

    /// The streaming event loop for one session, run as its own task
    /// (`spec.md` §5, "each session runs as its own concurrent task").
    async fn run_session(
        &self,
        worker_id: WorkerId,
        session: Arc<Session>,
        prompt: String,
        options: EngineOptions,
        repo_path: PathBuf,
        worktree_path: Option<PathBuf>,
        default_branch: String,
        fallback_commit_count: u32,
    ) {
        let engine_session = match self.engine.query(prompt, options).await {
            Ok(s) => s,
            Err(e) => {
                self.finish_with_error(&worker_id, format!("Engine failed to start: {e}")).await;
                self.cleanup_session(&worker_id, &repo_path, worktree_path.as_deref()).await;
                return;
            }
        };

        let mut events_rx = engine_session.events_rx;
        let input_tx = engine_session.input_tx;
        let engine_cancel = engine_session.cancel;
        let input_stream = session.input.clone();
        let forward_cancel = session.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = forward_cancel.cancelled() => break,
                    msg = input_stream.next() => {
                        match msg {
                            Some(msg) => { if input_tx.send(msg).await.is_err() { break; } }
                            None => break,
                        }
                    }
                }
            }
        });

        loop {
            tokio::select! {
                _ = session.cancel.cancelled() => {
                    engine_cancel.cancel();
                    break;
                }
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    if self.apply_event(&worker_id, &event, &session).await {
                        break;
                    }
                }
            }
        }

        if !session.cancel.is_cancelled() {
            self.finish_session(&worker_id, &session.cwd, &default_branch, fallback_commit_count).await;
        }
        self.cleanup_session(&worker_id, &repo_path, worktree_path.as_deref()).await;
    }

    /// Returns `true` if the caller should stop the streaming loop.
    async fn apply_event(&self, worker_id: &WorkerId, event: &wm_core::EngineEvent, session: &Arc<Session>) -> bool {
        let now = self.clock.epoch_ms();
        let outcome = self.with_worker_mut(worker_id, |worker| event_handler::handle_event(worker, event, now));
        let Some(outcome) = outcome else { return true };

        for effect in outcome.effects {
            match effect {
                EngineEffect::Abort { reason } => {
                    self.abort(worker_id, Some(reason)).await;
                    return true;
                }
                EngineEffect::EnqueueOnSession { message } => session.input.enqueue(message),
                EngineEffect::ReportWaitingToServer => {
                    if let Some(worker) = self.get_worker(worker_id) {
                        let patch = Self::build_patch(&worker);
                        let _ = self.server.patch_worker(worker_id, &patch).await;
                    }
                }
                EngineEffect::PersistNow => {
                    if let Some(worker) = self.get_worker(worker_id) {
                        let _ = self.store.save_worker(&worker);
                    }
                }
            }
        }

        if let Some(worker) = self.get_worker(worker_id) {
            self.emit_worker_update(&worker);
        }

        outcome.stream_done
    }

    async fn finish_session(&self, worker_id: &WorkerId, cwd: &std::path::Path, default_branch: &str, fallback_commit_count: u32) {
        let existing_error = self.get_worker(worker_id).and_then(|w| w.error.clone());
        if let Some(error) = existing_error {
            self.finish_with_error(worker_id, error).await;
            return;
        }

        let first_lines: Vec<String> = self
            .get_worker(worker_id)
            .map(|w| w.output.iter().take(3).map(|l| l.to_lowercase()).collect())
            .unwrap_or_default();
        let auth_failed = first_lines.iter().any(|line| AUTH_FAILURE_MARKERS.iter().any(|m| line.contains(m)));

        if auth_failed {
            self.finish_with_error(worker_id, "Agent authentication failed".to_string()).await;
            return;
        }

        let stats = git::collect_git_stats(cwd, default_branch, fallback_commit_count).await;
        let now = self.clock.epoch_ms();
        let resolved = self.with_worker_mut(worker_id, |w| {
            w.push_milestone(wm_core::Milestone::status("Task completed", now));
            w.status = WorkerStatus::Done;
            w.current_action = "Completed".to_string();
            w.completed_at = Some(now);
            w.clone()
        });
        let Some(worker) = resolved else { return };
        self.emit_worker_update(&worker);
        let _ = self.store.save_worker(&worker);

        let patch = Self::build_patch(&worker).status(ServerStatus::Completed).git_stats(&stats);
        let _ = self.server.patch_worker(worker_id, &patch).await;

        let _ = self
            .server
            .create_summary(wm_wire::CreateSummaryRequest {
                worker_id: worker_id.clone(),
                summary: format!("{}: {}", worker.task_title, worker.current_action),
            })
            .await;
    }

    async fn finish_with_error(&self, worker_id: &WorkerId, error: String) {
        let now = self.clock.epoch_ms();
        let resolved = self.with_worker_mut(worker_id, |w| {
            w.status = WorkerStatus::Error;
            w.error = Some(error.clone());
            w.completed_at = Some(now);
            w.clone()
        });
        let Some(worker) = resolved else { return };
        self.emit_worker_update(&worker);
        let _ = self.store.save_worker(&worker);
        let patch = Self::build_patch(&worker).status(ServerStatus::Failed);
        let _ = self.server.patch_worker(worker_id, &patch).await;
    }

    async fn cleanup_session(&self, worker_id: &WorkerId, repo_path: &std::path::Path, worktree_path: Option<&std::path::Path>) {
        if let Some(session) = self.sessions.lock().remove(worker_id) {
            session.input.end();
        }
        if let Some(worktree_path) = worktree_path {
            git::teardown_worktree(repo_path, worktree_path).await;
        }
    }

    pub(crate) fn clone_handles(&self) -> Self {
        Self {
            workers: self.workers.clone(),
            sessions: self.sessions.clone(),
            dirty_server: self.dirty_server.clone(),
            dirty_disk: self.dirty_disk.clone(),
            store: self.store.clone(),
            outbox: self.outbox.clone(),
            engine: self.engine.clone(),
            server: self.server.clone(),
            push: self.push.clone(),
            resolver: self.resolver.clone(),
            clock: self.clock.clone(),
            events_tx: self.events_tx.clone(),
            config: self.config.clone(),
        }
    }
}

/// `spec.md` §4.5 step 5: either materialize skill bundles as subagents, or
/// add them to `allowed_tools` with a system-prompt usage directive.
fn materialize_skills(bundles: &[wm_wire::SkillBundle], use_skill_agents: bool) -> (Vec<SubagentDefinition>, Option<Vec<String>>, Option<String>) {
    if bundles.is_empty() {
        return (Vec::new(), None, None);
    }

    if use_skill_agents {
        let agents = bundles
            .iter()
            .map(|b| SubagentDefinition {
                description: b.description.clone().unwrap_or_else(|| b.name.clone()),
                prompt: b.content.clone(),
                tools: SKILL_AGENT_TOOLS.iter().map(|t| t.to_string()).collect(),
                model: "inherit".to_string(),
            })
            .collect();
        return (agents, None, None);
    }

    let allowed_tools = bundles.iter().map(|b| format!("Skill({})", b.slug)).collect();
    let preamble = format!(
        "Skills available: {}.",
        bundles.iter().map(|b| format!("`Skill({})` for {}", b.slug, b.name)).collect::<Vec<_>>().join(", ")
    );
    (Vec::new(), Some(allowed_tools), Some(preamble))
}

/// `spec.md` §4.5 step 5: filter OAuth tokens, route through OpenRouter when
/// configured, always flag agent-teams support.
fn synthesize_env(config: &super::ManagerConfig) -> std::collections::HashMap<String, String> {
    let mut env = std::collections::HashMap::new();
    for (key, value) in std::env::vars() {
        if key.contains("CLAUDE_CODE_OAUTH_TOKEN") {
            continue;
        }
        env.insert(key, value);
    }

    if config.provider.as_deref() == Some("openrouter") {
        if let Some(base_url) = &config.openrouter_base_url {
            env.insert("ANTHROPIC_BASE_URL".to_string(), base_url.clone());
        }
        if let Some(auth_token) = &config.openrouter_auth_token {
            env.insert("ANTHROPIC_AUTH_TOKEN".to_string(), auth_token.clone());
        }
        env.remove("ANTHROPIC_API_KEY");
    }

    env.insert("CLAUDE_CODE_EXPERIMENTAL_AGENT_TEAMS".to_string(), "1".to_string());
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks;
    use serial_test::serial;

    fn config() -> super::super::ManagerConfig {
        super::super::ManagerConfig {
            local_ui_url: "http://localhost:4000".into(),
            max_tasks: 4,
            environment: None,
            home_dir: std::path::PathBuf::from("/home/test"),
            local_installer_allowlist: Vec::new(),
            skill_install_reject_all: false,
            provider: None,
            openrouter_base_url: None,
            openrouter_auth_token: None,
        }
    }

    #[test]
    fn synthesize_env_always_sets_agent_teams_flag() {
        let env = synthesize_env(&config());
        assert_eq!(env.get("CLAUDE_CODE_EXPERIMENTAL_AGENT_TEAMS").map(String::as_str), Some("1"));
    }

    #[test]
    #[serial]
    fn synthesize_env_filters_oauth_token_var() {
        std::env::set_var("CLAUDE_CODE_OAUTH_TOKEN_TEST", "secret");
        let env = synthesize_env(&config());
        assert!(!env.contains_key("CLAUDE_CODE_OAUTH_TOKEN_TEST"));
        std::env::remove_var("CLAUDE_CODE_OAUTH_TOKEN_TEST");
    }

    #[test]
    #[serial]
    fn synthesize_env_routes_through_openrouter_when_configured() {
        let mut cfg = config();
        cfg.provider = Some("openrouter".to_string());
        cfg.openrouter_base_url = Some("https://openrouter.ai/api/v1".to_string());
        cfg.openrouter_auth_token = Some("or-token".to_string());
        std::env::set_var("ANTHROPIC_API_KEY", "direct-key");
        let env = synthesize_env(&cfg);
        assert_eq!(env.get("ANTHROPIC_BASE_URL").map(String::as_str), Some("https://openrouter.ai/api/v1"));
        assert_eq!(env.get("ANTHROPIC_AUTH_TOKEN").map(String::as_str), Some("or-token"));
        assert!(!env.contains_key("ANTHROPIC_API_KEY"));
        std::env::remove_var("ANTHROPIC_API_KEY");
    }

    #[test]
    fn hooks_module_is_reachable_from_session_run() {
        let decision = hooks::pre_tool_permission_hook("Grep", &serde_json::json!({}));
        assert!(decision.allow);
    }

    fn bundle(slug: &str, description: Option<&str>) -> wm_wire::SkillBundle {
        wm_wire::SkillBundle {
            slug: slug.to_string(),
            name: format!("{slug} skill"),
            description: description.map(str::to_string),
            content: format!("Instructions for {slug}"),
        }
    }

    #[test]
    fn materialize_skills_no_bundles_is_a_no_op() {
        let (agents, allowed_tools, preamble) = materialize_skills(&[], false);
        assert!(agents.is_empty());
        assert!(allowed_tools.is_none());
        assert!(preamble.is_none());
    }

    #[test]
    fn materialize_skills_as_subagents_uses_fixed_tool_set() {
        let bundles = vec![bundle("deploy", Some("Deploys the service"))];
        let (agents, allowed_tools, preamble) = materialize_skills(&bundles, true);
        assert!(allowed_tools.is_none());
        assert!(preamble.is_none());
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].description, "Deploys the service");
        assert_eq!(agents[0].model, "inherit");
        assert_eq!(agents[0].tools, vec!["Read", "Grep", "Glob", "Bash", "Edit", "Write"]);
    }

    #[test]
    fn materialize_skills_as_subagents_falls_back_to_bundle_name() {
        let bundles = vec![bundle("deploy", None)];
        let (agents, _, _) = materialize_skills(&bundles, true);
        assert_eq!(agents[0].description, "deploy skill");
    }

    #[test]
    fn materialize_skills_without_skill_agents_adds_allowed_tool() {
        let bundles = vec![bundle("deploy", Some("Deploys the service"))];
        let (agents, allowed_tools, preamble) = materialize_skills(&bundles, false);
        assert!(agents.is_empty());
        assert_eq!(allowed_tools, Some(vec!["Skill(deploy)".to_string()]));
        assert!(preamble.unwrap().contains("Skill(deploy)"));
    }
}
