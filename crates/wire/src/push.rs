// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Push-channel topic/event shapes (`spec.md` §6).
//!
//! Topic `worker-<id>` carries `worker:command` events; topic
//! `workspace-<id>` carries `task:assigned` and `skill:install` events.

use serde::{Deserialize, Serialize};

use crate::server::TaskRecord;

/// Per-worker command pushed on topic `worker-<id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PushCommand {
    Pause,
    Resume,
    Abort {
        #[serde(default)]
        text: Option<String>,
    },
    Message {
        text: String,
    },
    SkillInstall {
        #[serde(default)]
        bundle: Option<crate::server::SkillBundle>,
        #[serde(default)]
        installer_command: Option<String>,
        #[serde(default)]
        skill_slug: Option<String>,
    },
    Rollback {
        #[serde(default)]
        checkpoint_uuid: Option<String>,
    },
}

/// Envelope wrapping a `PushCommand` with routing/correlation metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerCommandEvent {
    #[serde(flatten)]
    pub command: PushCommand,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub target_local_ui_url: Option<String>,
    pub timestamp: u64,
}

/// Event pushed on topic `workspace-<id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkspaceEvent {
    TaskAssigned {
        task: TaskRecord,
        #[serde(default)]
        target_local_ui_url: Option<String>,
    },
    SkillInstall {
        #[serde(default)]
        bundle: Option<crate::server::SkillBundle>,
        #[serde(default)]
        installer_command: Option<String>,
    },
}
