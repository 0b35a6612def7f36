// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The seven periodic timers the manager drives (`spec.md` §5): stale
//! check, server sync, disk persist, eviction, heartbeat, operational
//! cleanup, env scan.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use wm_core::{Clock, WorkerStatus};
use wm_wire::HeartbeatRequest;

use super::{WorkerManager, EVICTION_AFTER_MS, STALE_THRESHOLD_MS};

const SERVER_SYNC_INTERVAL: Duration = Duration::from_secs(10);
const DISK_PERSIST_INTERVAL: Duration = Duration::from_secs(5);
const STALE_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const EVICTION_INTERVAL: Duration = Duration::from_secs(5 * 60);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5 * 60);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(30 * 60);
const ENV_SCAN_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Known agent-credential env vars; env scan only checks for presence, never
/// reads or logs values (`spec.md` §1 Non-goals: "no authentication logic
/// beyond detecting whether credentials exist for a gating warning").
const CREDENTIAL_ENV_VARS: &[&str] = &["ANTHROPIC_API_KEY", "CLAUDE_CODE_OAUTH_TOKEN"];

impl<C: Clock> WorkerManager<C> {
    /// Spawn all seven timers as cancellable background tasks. Returns their
    /// join handles so the caller (the daemon binary) can await a clean
    /// shutdown.
    pub fn spawn_timers(&self, shutdown: CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            spawn_tick(self.clone_handles(), shutdown.clone(), STALE_CHECK_INTERVAL, |m| Box::pin(m.stale_check_tick())),
            spawn_tick(self.clone_handles(), shutdown.clone(), SERVER_SYNC_INTERVAL, |m| Box::pin(m.server_sync_tick())),
            spawn_tick(self.clone_handles(), shutdown.clone(), DISK_PERSIST_INTERVAL, |m| Box::pin(m.disk_persist_tick())),
            spawn_tick(self.clone_handles(), shutdown.clone(), EVICTION_INTERVAL, |m| Box::pin(m.eviction_tick())),
            spawn_tick(self.clone_handles(), shutdown.clone(), HEARTBEAT_INTERVAL, |m| Box::pin(m.heartbeat_tick())),
            spawn_tick(self.clone_handles(), shutdown.clone(), CLEANUP_INTERVAL, |m| Box::pin(m.cleanup_tick())),
            spawn_tick(self.clone_handles(), shutdown, ENV_SCAN_INTERVAL, |m| Box::pin(m.env_scan_tick())),
        ]
    }

    /// `spec.md` §8 "Staleness": a `working` worker idle past 300s becomes
    /// `stale` on the next tick.
    async fn stale_check_tick(&self) {
        let now = self.clock.epoch_ms();
        let ids: Vec<_> = self.workers.lock().keys().cloned().collect();
        for id in ids {
            let went_stale = self.with_worker_mut(&id, |w| {
                if w.status == WorkerStatus::Working && now.saturating_sub(w.last_activity) > STALE_THRESHOLD_MS {
                    w.status = WorkerStatus::Stale;
                    w.current_action = "Stalled".to_string();
                    true
                } else {
                    false
                }
            });
            if went_stale == Some(true) {
                if let Some(worker) = self.get_worker(&id) {
                    self.emit_worker_update(&worker);
                }
            }
        }
    }

    /// Flush the outbox, then push every dirty worker's patch to the server,
    /// re-queueing failures in the outbox (`spec.md` §4.2, §7).
    async fn server_sync_tick(&self) {
        let now = self.clock.epoch_ms();
        let ids: Vec<_> = self.dirty_server.lock().drain().collect();
        for id in &ids {
            let Some(worker) = self.get_worker(id) else { continue };
            let patch = Self::build_patch(&worker);
            match self.server.patch_worker(id, &patch).await {
                Ok(()) => {}
                Err(e) => {
                    tracing::warn!(worker_id = %id, error = %e, "server sync failed, queuing in outbox");
                    let endpoint = format!("/api/workers/{id}");
                    let body = serde_json::to_value(&patch).unwrap_or(serde_json::Value::Null);
                    let _ = self.outbox.lock().enqueue("PATCH", endpoint, Some(body), now);
                }
            }
        }

        // Resolve delivery outcomes for due entries asynchronously first,
        // then hand the results to the synchronous `Outbox::flush` so the
        // backoff/retry bookkeeping stays free of any blocking-on-async
        // hazards.
        let due = self.outbox.lock().due_entries(now);
        let mut outcomes = std::collections::HashMap::with_capacity(due.len());
        for entry in &due {
            let body = entry.body.clone().unwrap_or(serde_json::Value::Null);
            let delivered = match serde_json::from_value::<wm_wire::WorkerPatch>(body) {
                Ok(patch) => {
                    let worker_id = wm_core::WorkerId::from_string(entry.endpoint.rsplit('/').next().unwrap_or(""));
                    self.server.patch_worker(&worker_id, &patch).await.is_ok()
                }
                Err(_) => true,
            };
            outcomes.insert(entry.endpoint.clone(), delivered);
        }
        let _ = self.outbox.lock().flush(now, |entry| {
            if outcomes.get(&entry.endpoint).copied().unwrap_or(false) {
                wm_storage::FlushOutcome::Delivered
            } else {
                wm_storage::FlushOutcome::Failed
            }
        });
    }

    async fn disk_persist_tick(&self) {
        let ids: Vec<_> = self.dirty_disk.lock().drain().collect();
        for id in ids {
            if let Some(worker) = self.get_worker(&id) {
                let _ = self.store.save_worker(&worker);
            }
        }
    }

    /// `spec.md` §8 "Eviction": terminal workers idle past 10 minutes are
    /// dropped from memory and disk. `working` workers are never evicted.
    async fn eviction_tick(&self) {
        let now = self.clock.epoch_ms();
        let to_evict: Vec<_> = self
            .workers
            .lock()
            .values()
            .filter(|w| w.status.is_terminal() && now.saturating_sub(w.completed_at.unwrap_or(w.last_activity)) > EVICTION_AFTER_MS)
            .map(|w| w.id.clone())
            .collect();
        for id in to_evict {
            self.workers.lock().remove(&id);
            let _ = self.store.delete_worker(&id);
        }
    }

    async fn heartbeat_tick(&self) {
        let active_count = self.workers.lock().values().filter(|w| w.status.has_active_session()).count() as u32;
        let request = HeartbeatRequest {
            local_ui_url: self.config.local_ui_url.clone(),
            active_count,
            environment: self.config.environment.clone(),
        };
        if let Err(e) = self.server.heartbeat(request).await {
            tracing::debug!(error = %e, "heartbeat failed, non-fatal");
        }
    }

    async fn cleanup_tick(&self) {
        if let Err(e) = self.server.cleanup().await {
            tracing::debug!(error = %e, "operational cleanup failed, non-fatal");
        }
    }

    async fn env_scan_tick(&self) {
        let missing: Vec<&str> = CREDENTIAL_ENV_VARS.iter().copied().filter(|var| std::env::var(var).is_err()).collect();
        if missing.len() == CREDENTIAL_ENV_VARS.len() {
            tracing::warn!(vars = ?CREDENTIAL_ENV_VARS, "no agent engine credentials found in environment");
        }
    }
}

/// Drive one timer's periodic tick until `shutdown` fires. The tick future
/// borrows `manager` for each call, so it's boxed to erase the per-call
/// lifetime rather than fixed as a single associated type.
fn spawn_tick<C, F>(manager: WorkerManager<C>, shutdown: CancellationToken, interval: Duration, tick: F) -> tokio::task::JoinHandle<()>
where
    C: Clock,
    F: for<'a> Fn(&'a WorkerManager<C>) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => tick(&manager).await,
            }
        }
    })
}
