// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! wm-wire: protocol shapes shared between the supervisor, BuilddServer, and
//! the push channel.

pub mod bus;
pub mod push;
pub mod server;

pub use bus::ManagerEvent;
pub use push::{PushCommand, WorkerCommandEvent, WorkspaceEvent};
pub use server::{
    Attachment, ClaimRequest, ClaimResponse, ClaimedWorker, CreateSummaryRequest, GitStats,
    HeartbeatRequest, HeartbeatResponse, ObservationDigest, ServerStatus, SkillBundle,
    TaskContext, TaskRecord, WorkerPatch, WorkspaceMemoryRequest,
};
