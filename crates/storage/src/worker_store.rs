// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic disk persistence of worker state (`spec.md` §4.3).
//!
//! Write protocol: serialize to a sibling `.tmp` file, `fsync`, then
//! `rename` into place — the rename is the atomicity boundary, same pattern
//! as the teacher's snapshot `.bak` rotation
//! (`oj-daemon::storage::snapshot::rotate_bak_path`), adapted to one file
//! per worker instead of one snapshot file for the whole daemon.

use std::collections::VecDeque;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wm_core::{Worker, WorkerId};

/// Worker records older than this are considered stale and discarded on
/// load, regardless of whether they parse (`spec.md` §3 invariant 5).
pub const MAX_RECORD_AGE_MS: u64 = 24 * 60 * 60 * 1000;

const CURRENT_VERSION: u32 = 1;
const MAX_TOOL_CALL_INPUT_BYTES: usize = 500;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "_version")]
    version: u32,
    #[serde(rename = "_savedAt")]
    saved_at_ms: u64,
    #[serde(flatten)]
    worker: Worker,
}

/// Disk-backed store of worker records under `~/.buildd/workers/`.
pub struct WorkerStore {
    dir: PathBuf,
}

impl WorkerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &WorkerId) -> PathBuf {
        self.dir.join(format!("{}.json", id.as_str()))
    }

    fn tmp_path_for(&self, id: &WorkerId) -> PathBuf {
        self.dir.join(format!("{}.json.tmp", id.as_str()))
    }

    /// Persist one worker atomically. Bounds and truncates before writing.
    pub fn save_worker(&self, worker: &Worker) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let bounded = bound_for_persist(worker);
        let envelope = Envelope { version: CURRENT_VERSION, saved_at_ms: now_ms(), worker: bounded };
        let json = serde_json::to_vec_pretty(&envelope)?;

        let tmp = self.tmp_path_for(&worker.id);
        let final_path = self.path_for(&worker.id);
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &final_path)?;
        Ok(())
    }

    pub fn delete_worker(&self, id: &WorkerId) -> Result<(), StoreError> {
        let path = self.path_for(id);
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Load a single worker by id, applying the age/parse discard rules.
    pub fn load_worker(&self, id: &WorkerId) -> Option<Worker> {
        let path = self.path_for(id);
        self.load_path(&path)
    }

    fn load_path(&self, path: &Path) -> Option<Worker> {
        let bytes = fs::read(path).ok()?;
        let envelope: Envelope = match serde_json::from_slice(&bytes) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "discarding unparsable worker record");
                let _ = fs::remove_file(path);
                return None;
            }
        };
        if now_ms().saturating_sub(envelope.saved_at_ms) > MAX_RECORD_AGE_MS {
            tracing::info!(path = %path.display(), "discarding worker record older than 24h");
            let _ = fs::remove_file(path);
            return None;
        }
        let mut worker = envelope.worker;
        worker.reset_transient();
        Some(worker)
    }

    /// Scan the directory, delete orphan `.tmp` files, and load every valid
    /// `.json` record (`spec.md` §4.3 load protocol).
    pub fn load_all(&self) -> Vec<Worker> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(_) => return Vec::new(),
        };
        let mut workers = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            if name.ends_with(".tmp") {
                let _ = fs::remove_file(&path);
                continue;
            }
            if !name.ends_with(".json") {
                continue;
            }
            if let Some(worker) = self.load_path(&path) {
                workers.push(worker);
            }
        }
        workers
    }
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Clone a worker into persistable form: bounded lists (defense in depth —
/// `Worker::push_*` already enforces the bound incrementally) and tool-call
/// inputs truncated to 500 bytes of JSON.
fn bound_for_persist(worker: &Worker) -> Worker {
    let mut w = worker.clone();
    truncate_tail(&mut w.messages, wm_core::MAX_MESSAGES);
    truncate_tail(&mut w.tool_calls, wm_core::MAX_TOOL_CALLS);
    truncate_tail(&mut w.milestones, wm_core::MAX_MILESTONES);
    truncate_tail(&mut w.commits, wm_core::MAX_COMMITS);
    truncate_tail(&mut w.output, wm_core::MAX_OUTPUT_LINES);
    for call in w.tool_calls.iter_mut() {
        call.input = call.input.take().map(truncate_tool_input);
    }
    w
}

fn truncate_tail<T>(deque: &mut VecDeque<T>, max_len: usize) {
    while deque.len() > max_len {
        deque.pop_front();
    }
}

/// Replace `input` with `{"_truncated": <first 500 bytes>}` if its JSON
/// encoding exceeds 500 bytes (`spec.md` §3 invariant 4, §8 testable
/// property "Tool input truncation").
fn truncate_tool_input(input: serde_json::Value) -> serde_json::Value {
    let encoded = match serde_json::to_string(&input) {
        Ok(s) => s,
        Err(_) => return input,
    };
    if encoded.len() <= MAX_TOOL_CALL_INPUT_BYTES {
        return input;
    }
    let truncated: String = encoded.chars().take(MAX_TOOL_CALL_INPUT_BYTES).collect();
    serde_json::json!({ "_truncated": truncated })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wm_core::{TaskId, ToolCallEntry, WorkspaceId};

    fn worker() -> Worker {
        Worker::new(
            WorkerId::new(),
            TaskId::new(),
            "t".into(),
            "d".into(),
            WorkspaceId::new(),
            "ws".into(),
            1_000,
        )
    }

    #[test]
    fn save_then_load_round_trips_persisted_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkerStore::new(dir.path());
        let mut w = worker();
        w.session_id = Some(wm_core::EngineSessionId::new("s-1"));
        w.current_action = "doing stuff".into();
        w.has_new_activity = true;

        store.save_worker(&w).unwrap();
        let loaded = store.load_worker(&w.id).expect("worker should load");

        assert_eq!(loaded.id, w.id);
        assert_eq!(loaded.session_id, w.session_id);
        assert_eq!(loaded.task_title, w.task_title);
        // Transient fields reset to documented defaults.
        assert!(!loaded.has_new_activity);
        assert_eq!(loaded.current_action, "");
        assert!(loaded.phase.phase_text.is_none());
    }

    #[test]
    fn no_tmp_file_remains_after_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkerStore::new(dir.path());
        let w = worker();
        store.save_worker(&w).unwrap();
        assert!(!store.tmp_path_for(&w.id).exists());
        assert!(store.path_for(&w.id).exists());
    }

    #[test]
    fn corrupt_json_is_deleted_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkerStore::new(dir.path());
        let id = WorkerId::new();
        fs::write(store.path_for(&id), b"not json").unwrap();
        assert!(store.load_worker(&id).is_none());
        assert!(!store.path_for(&id).exists());
    }

    #[test]
    fn record_older_than_24h_is_deleted_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkerStore::new(dir.path());
        let w = worker();
        let stale_envelope = Envelope { version: CURRENT_VERSION, saved_at_ms: 0, worker: w.clone() };
        fs::write(store.path_for(&w.id), serde_json::to_vec(&stale_envelope).unwrap()).unwrap();
        assert!(store.load_worker(&w.id).is_none());
        assert!(!store.path_for(&w.id).exists());
    }

    #[test]
    fn orphan_tmp_files_are_swept_on_load_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkerStore::new(dir.path());
        let orphan = dir.path().join("leftover.json.tmp");
        fs::write(&orphan, b"partial").unwrap();
        let workers = store.load_all();
        assert!(workers.is_empty());
        assert!(!orphan.exists());
    }

    #[test]
    fn oversized_tool_call_input_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkerStore::new(dir.path());
        let mut w = worker();
        let big = "x".repeat(1000);
        w.push_tool_call(ToolCallEntry {
            name: "Write".into(),
            timestamp: 1,
            input: Some(serde_json::json!({ "content": big })),
        });
        store.save_worker(&w).unwrap();
        let loaded = store.load_worker(&w.id).unwrap();
        let input = loaded.tool_calls[0].input.as_ref().unwrap();
        assert!(input.get("_truncated").is_some());
    }
}
