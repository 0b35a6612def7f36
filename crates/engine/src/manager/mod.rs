// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `WorkerManager`: owns workers and sessions, orchestrates claim, session
//! start, message fan-in, resume, abort, retry, timers, dirty sync, and
//! push-channel dispatch (`spec.md` §2, §4.5–§4.11).

mod push_commands;
mod resume;
mod session_run;
mod timers;

pub use push_commands::dispatch_push_command;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use wm_adapters::{AgentEngine, BuilddServerClient, PushChannelClient, WorkspaceResolver};
use wm_core::{Clock, Worker, WorkerId, WorkerStatus};
use wm_storage::{Outbox, WorkerStore};
use wm_wire::{ManagerEvent, ServerStatus, WorkerPatch};

use crate::session::Session;

pub const STALE_THRESHOLD_MS: u64 = 300_000;
pub const EVICTION_AFTER_MS: u64 = 10 * 60 * 1000;
const EVENT_BUS_CAPACITY: usize = 1024;

#[derive(Clone, Debug)]
pub struct ManagerConfig {
    pub local_ui_url: String,
    pub max_tasks: u32,
    pub environment: Option<String>,
    pub home_dir: PathBuf,
    /// Installer commands this runner trusts regardless of workspace config
    /// (`spec.md` §4.12 check (b)).
    pub local_installer_allowlist: Vec<String>,
    /// If set, every `installerCommand` is rejected outright
    /// (`spec.md` §4.12 check (c)).
    pub skill_install_reject_all: bool,
    /// Which credential provider this runner is configured for
    /// (`spec.md` §4.5 step 5); `"openrouter"` routes the engine through an
    /// OpenRouter-compatible endpoint instead of the Anthropic API directly.
    pub provider: Option<String>,
    pub openrouter_base_url: Option<String>,
    pub openrouter_auth_token: Option<String>,
}

/// All the pieces the manager needs to operate, handed in at construction
/// so tests can substitute fakes for every collaborator (`spec.md` §5
/// "shared resources").
pub struct WorkerManager<C: Clock> {
    pub(crate) workers: Arc<Mutex<HashMap<WorkerId, Worker>>>,
    pub(crate) sessions: Arc<Mutex<HashMap<WorkerId, Arc<Session>>>>,
    pub(crate) dirty_server: Arc<Mutex<HashSet<WorkerId>>>,
    pub(crate) dirty_disk: Arc<Mutex<HashSet<WorkerId>>>,
    pub(crate) store: Arc<WorkerStore>,
    pub(crate) outbox: Arc<Mutex<Outbox>>,
    pub(crate) engine: Arc<dyn AgentEngine>,
    pub(crate) server: Arc<dyn BuilddServerClient>,
    pub(crate) push: Arc<dyn PushChannelClient>,
    pub(crate) resolver: Arc<dyn WorkspaceResolver>,
    pub(crate) clock: C,
    pub(crate) events_tx: broadcast::Sender<ManagerEvent>,
    pub(crate) config: ManagerConfig,
}

impl<C: Clock> WorkerManager<C> {
    pub fn new(
        store: WorkerStore,
        outbox: Outbox,
        engine: Arc<dyn AgentEngine>,
        server: Arc<dyn BuilddServerClient>,
        push: Arc<dyn PushChannelClient>,
        resolver: Arc<dyn WorkspaceResolver>,
        clock: C,
        config: ManagerConfig,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let manager = Self {
            workers: Arc::new(Mutex::new(HashMap::new())),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            dirty_server: Arc::new(Mutex::new(HashSet::new())),
            dirty_disk: Arc::new(Mutex::new(HashSet::new())),
            store: Arc::new(store),
            outbox: Arc::new(Mutex::new(outbox)),
            engine,
            server,
            push,
            resolver,
            clock,
            events_tx,
            config,
        };
        manager.load_from_disk();
        manager
    }

    /// Load persisted workers at startup, applying the crash-recovery rule
    /// (`spec.md` §8 scenario 6): any `working` record with no live session
    /// is rewritten to `error`/"Process restarted".
    fn load_from_disk(&self) {
        let mut workers = self.workers.lock();
        for mut worker in self.store.load_all() {
            if worker.status == WorkerStatus::Working || worker.status == WorkerStatus::Waiting || worker.status == WorkerStatus::Stale {
                worker.status = WorkerStatus::Error;
                worker.error = Some("Process restarted".to_string());
                worker.current_action = "Process restarted".to_string();
                let _ = self.store.save_worker(&worker);
            }
            workers.insert(worker.id.clone(), worker);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events_tx.subscribe()
    }

    /// Resolve a worker by id: in-memory first, then the disk fallback
    /// (`spec.md` §3 invariant 7).
    pub fn get_worker(&self, id: &WorkerId) -> Option<Worker> {
        if let Some(worker) = self.workers.lock().get(id) {
            return Some(worker.clone());
        }
        self.store.load_worker(id)
    }

    pub(crate) fn mark_dirty(&self, id: &WorkerId) {
        self.dirty_server.lock().insert(id.clone());
        self.dirty_disk.lock().insert(id.clone());
    }

    pub(crate) fn emit(&self, event: ManagerEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Snapshot-emit a worker update and mark it dirty (`spec.md` §4.6,
    /// "After every event, emit a worker_update").
    pub(crate) fn emit_worker_update(&self, worker: &Worker) {
        self.mark_dirty(&worker.id);
        self.emit(ManagerEvent::WorkerUpdate { worker: Box::new(worker.clone()) });
    }

    pub(crate) fn with_worker_mut<R>(&self, id: &WorkerId, f: impl FnOnce(&mut Worker) -> R) -> Option<R> {
        let mut workers = self.workers.lock();
        let worker = workers.get_mut(id)?;
        Some(f(worker))
    }

    fn server_status_for(status: WorkerStatus) -> ServerStatus {
        match status {
            WorkerStatus::Waiting => ServerStatus::WaitingInput,
            WorkerStatus::Done => ServerStatus::Completed,
            WorkerStatus::Error => ServerStatus::Failed,
            WorkerStatus::Idle | WorkerStatus::Working | WorkerStatus::Stale => ServerStatus::Running,
        }
    }

    pub(crate) fn build_patch(worker: &Worker) -> WorkerPatch {
        let mut patch = WorkerPatch::default()
            .status(Self::server_status_for(worker.status))
            .current_action(worker.current_action.clone());
        patch.milestones = Some(worker.milestones.iter().map(|m| m.text().to_string()).collect());
        patch.waiting_for = Some(worker.waiting_for.clone());
        if let Some(error) = &worker.error {
            patch = patch.error(error.clone());
        }
        patch
    }

    /// Abort a worker's active session (`spec.md` §4.5 "Abort").
    pub async fn abort(&self, id: &WorkerId, reason: Option<String>) {
        let session = self.sessions.lock().remove(id);
        if let Some(session) = &session {
            session.abort();
        }
        let _ = self.push.unsubscribe(&format!("worker-{id}")).await;

        let patched = self.with_worker_mut(id, |worker| {
            let final_reason = worker.error.clone().or(reason).unwrap_or_else(|| "Aborted by user".to_string());
            worker.status = WorkerStatus::Error;
            worker.error = Some(final_reason);
            worker.current_action = "Aborted".to_string();
            worker.completed_at = Some(self.clock.epoch_ms());
            worker.clone()
        });

        if let Some(worker) = patched {
            self.emit_worker_update(&worker);
            let patch = Self::build_patch(&worker).status(ServerStatus::Failed);
            let _ = self.server.patch_worker(id, &patch).await;
        }
    }

    /// Retry a terminal worker with a context-preserving description
    /// (`spec.md` §4.5 "Retry").
    pub async fn retry(&self, id: &WorkerId) {
        let Some(worker) = self.get_worker(id) else { return };
        if !worker.status.is_terminal() {
            return;
        }
        if let Some(session) = self.sessions.lock().remove(id) {
            session.abort();
        }

        let now = self.clock.epoch_ms();
        let description = resume::build_retry_description(&worker);
        let resolved = self.with_worker_mut(id, |w| {
            w.status = WorkerStatus::Working;
            w.error = None;
            w.completed_at = None;
            w.task_description = description.clone();
            w.push_milestone(wm_core::Milestone::status("Retry requested", now));
            w.clone()
        });
        let Some(worker) = resolved else { return };
        self.emit_worker_update(&worker);

        if let Err(e) = self.start_session_for(&worker, None, None, &[]).await {
            tracing::warn!(worker_id = %id, error = %e, "retry failed to start session");
            self.with_worker_mut(id, |w| {
                w.status = WorkerStatus::Error;
                w.error = Some(e);
            });
        }
    }

    /// Send a user message to a worker (`spec.md` §4.9).
    pub async fn send_message(&self, id: &WorkerId, message: &str) -> bool {
        resume::send_message(self, id, message).await
    }
}
