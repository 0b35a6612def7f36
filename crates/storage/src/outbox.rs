// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable queue of mutating BuilddServer requests that survives a crash
//! between "we changed local state" and "the server heard about it"
//! (`spec.md` §4.2).
//!
//! A single full-snapshot file (`outbox.json`), rewritten atomically after
//! every mutation, same write protocol as `worker_store` — the teacher's
//! `oj-daemon::storage::snapshot` rotates `.bak` files for the same reason:
//! never leave the on-disk file half-written.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const INITIAL_BACKOFF_MS: u64 = 30_000;
const MAX_BACKOFF_MS: u64 = 300_000;
const MAX_RETRIES: u32 = 10;

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{method} {endpoint} is not queueable")]
    NotQueueable { method: String, endpoint: String },
}

/// A queued mutating request, dedup'd by endpoint only for worker-update
/// PATCHes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: String,
    pub method: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    pub timestamp: u64,
    #[serde(default)]
    pub retries: u32,
}

impl OutboxEntry {
    fn new(method: String, endpoint: String, body: Option<serde_json::Value>, now_ms: u64) -> Self {
        Self { id: format!("obx_{}", nanoid::nanoid!(19)), method, endpoint, body, timestamp: now_ms, retries: 0 }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    entries: Vec<OutboxEntry>,
    #[serde(rename = "updatedAt", default)]
    updated_at_ms: u64,
}

/// Outcome of attempting to deliver one outbox entry.
#[derive(Debug, Clone, Copy)]
pub enum FlushOutcome {
    Delivered,
    Failed,
}

/// `spec.md` §4.2: the only endpoint whose entries dedup by endpoint.
fn is_worker_update_endpoint(endpoint: &str) -> bool {
    let Some(rest) = endpoint.strip_prefix("/api/workers/") else { return false };
    !rest.is_empty() && !rest.contains('/')
}

fn is_worker_plan_endpoint(endpoint: &str) -> bool {
    let Some(rest) = endpoint.strip_prefix("/api/workers/") else { return false };
    rest.ends_with("/plan") && rest.matches('/').count() == 1
}

fn is_workspace_memory_endpoint(endpoint: &str) -> bool {
    let Some(rest) = endpoint.strip_prefix("/api/workspaces/") else { return false };
    rest.ends_with("/memory") && rest.matches('/').count() == 1
}

/// `spec.md` §4.2: queueable = worker-update PATCH, workspace-memory POST,
/// worker-plan POST. Everything else (GET, claim, any other `/workers/{id}/…`
/// suffix) is refused outright rather than queued.
fn is_queueable(method: &str, endpoint: &str) -> bool {
    match method {
        "PATCH" => is_worker_update_endpoint(endpoint),
        "POST" => is_workspace_memory_endpoint(endpoint) || is_worker_plan_endpoint(endpoint),
        _ => false,
    }
}

/// Durable retry queue for PATCH-worker (and similar) server calls that must
/// not be lost if the daemon restarts before the server acknowledges them.
///
/// Backoff is a single interval shared by the whole queue, not tracked per
/// entry: it doubles after any failed flush and resets to
/// [`INITIAL_BACKOFF_MS`] after any successful one (`spec.md` §4.2, §8
/// "Outbox backoff").
pub struct Outbox {
    path: PathBuf,
    entries: Vec<OutboxEntry>,
    backoff_ms: u64,
    next_attempt_at_ms: u64,
}

impl Outbox {
    /// Load from `path`, starting empty if the file is missing or corrupt.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Snapshot>(&bytes) {
                Ok(snapshot) => snapshot.entries,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "outbox snapshot unparsable, starting empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        Self { path, entries, backoff_ms: INITIAL_BACKOFF_MS, next_attempt_at_ms: 0 }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries due for a delivery attempt as of `now_ms`, without mutating
    /// state. Lets an async caller resolve delivery outcomes before handing
    /// them back to the synchronous [`Outbox::flush`]. All entries share one
    /// due time, so this is either empty or the full queue.
    pub fn due_entries(&self, now_ms: u64) -> Vec<OutboxEntry> {
        if now_ms < self.next_attempt_at_ms {
            return Vec::new();
        }
        self.entries.clone()
    }

    /// Enqueue a mutating request. Refuses endpoints that aren't queueable
    /// (`spec.md` §4.2). A worker-update PATCH replaces any pending entry for
    /// the same endpoint; every other queueable request gets a distinct
    /// entry.
    pub fn enqueue(
        &mut self,
        method: impl Into<String>,
        endpoint: String,
        body: Option<serde_json::Value>,
        now_ms: u64,
    ) -> Result<(), OutboxError> {
        let method = method.into();
        if !is_queueable(&method, &endpoint) {
            return Err(OutboxError::NotQueueable { method, endpoint });
        }

        if method == "PATCH" && is_worker_update_endpoint(&endpoint) {
            if let Some(existing) = self.entries.iter_mut().find(|e| e.method == method && e.endpoint == endpoint) {
                existing.body = body;
                existing.timestamp = now_ms;
                existing.retries = 0;
                return self.persist(now_ms);
            }
        }

        self.entries.push(OutboxEntry::new(method, endpoint, body, now_ms));
        self.persist(now_ms)
    }

    /// Attempt delivery of every due entry via `send`. Entries that succeed
    /// are removed; entries that fail have `retries` incremented and are
    /// dropped entirely once `retries` reaches 10. The shared backoff
    /// interval doubles (capped at 300s) if any entry in this flush failed,
    /// and resets to 30s if any entry in this flush delivered.
    pub fn flush<F>(&mut self, now_ms: u64, mut send: F) -> Result<(), OutboxError>
    where
        F: FnMut(&OutboxEntry) -> FlushOutcome,
    {
        if self.entries.is_empty() || now_ms < self.next_attempt_at_ms {
            return Ok(());
        }

        let mut any_delivered = false;
        let mut any_failed = false;
        let mut remaining = Vec::with_capacity(self.entries.len());
        for mut entry in std::mem::take(&mut self.entries) {
            match send(&entry) {
                FlushOutcome::Delivered => any_delivered = true,
                FlushOutcome::Failed => {
                    any_failed = true;
                    entry.retries += 1;
                    if entry.retries >= MAX_RETRIES {
                        tracing::warn!(endpoint = %entry.endpoint, "dropping outbox entry after max retries");
                        continue;
                    }
                    remaining.push(entry);
                }
            }
        }
        self.entries = remaining;

        if any_delivered {
            self.backoff_ms = INITIAL_BACKOFF_MS;
        } else if any_failed {
            self.backoff_ms = (self.backoff_ms.saturating_mul(2)).min(MAX_BACKOFF_MS);
        }
        self.next_attempt_at_ms = now_ms + self.backoff_ms;

        self.persist(now_ms)
    }

    fn persist(&self, now_ms: u64) -> Result<(), OutboxError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let snapshot = Snapshot { entries: self.entries.clone(), updated_at_ms: now_ms };
        let json = serde_json::to_vec_pretty(&snapshot)?;
        let tmp = tmp_path(&self.path);
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(dir: &tempfile::TempDir) -> Outbox {
        Outbox::load(dir.path().join("outbox.json"))
    }

    #[test]
    fn enqueue_replaces_pending_entry_for_same_worker_patch_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut outbox = patch(&dir);
        outbox.enqueue("PATCH", "/api/workers/w1".into(), Some(serde_json::json!({"status": "working"})), 1_000).unwrap();
        outbox.enqueue("PATCH", "/api/workers/w1".into(), Some(serde_json::json!({"status": "done"})), 1_001).unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox.entries[0].body.as_ref().unwrap()["status"], "done");
        assert_eq!(outbox.entries[0].method, "PATCH");
    }

    #[test]
    fn enqueue_keeps_distinct_entries_for_non_patch_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let mut outbox = patch(&dir);
        outbox.enqueue("POST", "/api/workspaces/ws1/memory".into(), Some(serde_json::json!({"text": "a"})), 0).unwrap();
        outbox.enqueue("POST", "/api/workspaces/ws1/memory".into(), Some(serde_json::json!({"text": "b"})), 1).unwrap();
        assert_eq!(outbox.len(), 2);
    }

    #[test]
    fn enqueue_resets_retries_when_replacing_an_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut outbox = patch(&dir);
        outbox.enqueue("PATCH", "/api/workers/w1".into(), Some(serde_json::json!({"status": "working"})), 0).unwrap();
        outbox.flush(0, |_| FlushOutcome::Failed).unwrap();
        assert_eq!(outbox.entries[0].retries, 1);

        outbox.enqueue("PATCH", "/api/workers/w1".into(), Some(serde_json::json!({"status": "done"})), 60_000).unwrap();
        assert_eq!(outbox.entries[0].retries, 0);
    }

    #[test]
    fn enqueue_refuses_non_queueable_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let mut outbox = patch(&dir);
        assert!(outbox.enqueue("GET", "/api/workers/w1".into(), None, 0).is_err());
        assert!(outbox.enqueue("POST", "/api/workers/claim".into(), None, 0).is_err());
        assert!(outbox.enqueue("POST", "/api/workers/w1/heartbeat".into(), None, 0).is_err());
        assert!(outbox.is_empty());
    }

    #[test]
    fn enqueue_accepts_worker_plan_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut outbox = patch(&dir);
        outbox.enqueue("POST", "/api/workers/w1/plan".into(), None, 0).unwrap();
        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn failed_flush_doubles_shared_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let mut outbox = patch(&dir);
        outbox.enqueue("PATCH", "/api/workers/w1".into(), Some(serde_json::json!({})), 0).unwrap();
        outbox.flush(0, |_| FlushOutcome::Failed).unwrap();
        assert_eq!(outbox.backoff_ms, 60_000);
        outbox.flush(60_000, |_| FlushOutcome::Failed).unwrap();
        assert_eq!(outbox.backoff_ms, 120_000);
    }

    #[test]
    fn backoff_caps_at_300s() {
        let dir = tempfile::tempdir().unwrap();
        let mut outbox = patch(&dir);
        outbox.enqueue("PATCH", "/api/workers/w1".into(), Some(serde_json::json!({})), 0).unwrap();
        let mut now = 0u64;
        for _ in 0..10 {
            outbox.flush(now, |_| FlushOutcome::Failed).unwrap();
            if outbox.is_empty() {
                break;
            }
            now = outbox.next_attempt_at_ms;
        }
        assert!(outbox.backoff_ms <= MAX_BACKOFF_MS);
    }

    #[test]
    fn entry_dropped_after_max_retries() {
        let dir = tempfile::tempdir().unwrap();
        let mut outbox = patch(&dir);
        outbox.enqueue("PATCH", "/api/workers/w1".into(), Some(serde_json::json!({})), 0).unwrap();
        let mut now = 0u64;
        for _ in 0..MAX_RETRIES {
            outbox.flush(now, |_| FlushOutcome::Failed).unwrap();
            now += MAX_BACKOFF_MS;
        }
        assert!(outbox.is_empty());
    }

    #[test]
    fn successful_flush_removes_entry_and_resets_shared_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let mut outbox = patch(&dir);
        outbox.enqueue("PATCH", "/api/workers/w1".into(), Some(serde_json::json!({})), 0).unwrap();
        outbox.flush(0, |_| FlushOutcome::Failed).unwrap();
        assert_eq!(outbox.backoff_ms, 60_000);

        outbox.enqueue("PATCH", "/api/workers/w2".into(), Some(serde_json::json!({})), 60_000).unwrap();
        outbox.flush(60_000, |entry| if entry.endpoint.ends_with("w1") { FlushOutcome::Delivered } else { FlushOutcome::Failed }).unwrap();
        assert_eq!(outbox.backoff_ms, INITIAL_BACKOFF_MS);
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox.entries[0].endpoint, "/api/workers/w2");
    }

    #[test]
    fn corrupt_snapshot_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.json");
        fs::write(&path, b"{not json").unwrap();
        let outbox = Outbox::load(&path);
        assert!(outbox.is_empty());
    }

    #[test]
    fn persists_and_reloads_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.json");
        let mut outbox = Outbox::load(&path);
        outbox.enqueue("PATCH", "/api/workers/w1".into(), Some(serde_json::json!({"x": 1})), 0).unwrap();
        drop(outbox);

        let reloaded = Outbox::load(&path);
        assert_eq!(reloaded.len(), 1);
    }
}
