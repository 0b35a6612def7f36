// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscriber-facing event bus shapes.
//!
//! `spec.md` §9 ("Back-reference from events to the UI/subscriber"): never
//! hand a subscriber a live reference to a worker record — every emission is
//! an owned snapshot taken at the moment of emission.

use serde::{Deserialize, Serialize};
use wm_core::{Milestone, Worker, WorkerId};

/// An event emitted by the manager for external subscribers (CLI, HTTP
/// dashboard, SSE feed — all out of scope here; this is the stream they'd
/// consume).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManagerEvent {
    WorkerUpdate { worker: Box<Worker> },
    Milestone { worker_id: WorkerId, milestone: Milestone },
    Output { worker_id: WorkerId, line: String },
}
