// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent engine interface (`spec.md` §6, "Against the agent engine").
//!
//! This is the black-box collaborator: a streaming query interface that
//! accepts a prompt plus options and yields typed events. `wm-engine` drives
//! it; this crate only defines the seam and a thin options/handle shape.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use wm_core::EngineEvent;

#[derive(Debug, Error)]
pub enum AgentEngineError {
    #[error("engine spawn failed: {0}")]
    SpawnFailed(String),
    #[error("engine stream closed unexpectedly")]
    StreamClosed,
}

/// One subagent definition materialized for skill-agent mode
/// (`spec.md` §4.5 step 5).
#[derive(Debug, Clone, Serialize)]
pub struct SubagentDefinition {
    pub description: String,
    pub prompt: String,
    pub tools: Vec<String>,
    pub model: String,
}

/// One attachment resolved to inline image data for the initial prompt
/// (`spec.md` §4.5 step 6).
#[derive(Debug, Clone, Serialize)]
pub struct PromptImage {
    pub filename: String,
    pub media_type: String,
    pub base64: String,
}

/// A pre-tool or post-tool hook decision.
#[derive(Debug, Clone, Serialize)]
pub struct HookDecision {
    pub allow: bool,
    pub reason: String,
}

impl HookDecision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self { allow: true, reason: reason.into() }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self { allow: false, reason: reason.into() }
    }
}

/// Options synthesized for one engine query (`spec.md` §4.5 step 5, §6).
#[derive(Debug, Clone, Serialize)]
pub struct EngineOptions {
    pub cwd: std::path::PathBuf,
    pub model: Option<String>,
    pub env: HashMap<String, String>,
    pub setting_sources: Vec<String>,
    pub permission_mode: wm_core::PermissionMode,
    pub system_prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<SubagentDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_session_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<PromptImage>,
}

/// Handle to a live engine query: feed user messages in, receive events out.
pub struct EngineSession {
    pub input_tx: mpsc::Sender<wm_core::EngineInputMessage>,
    pub events_rx: mpsc::Receiver<EngineEvent>,
    pub cancel: tokio_util::sync::CancellationToken,
}

/// Adapter seam to the code-generation engine. One real implementation
/// shells the CLI/SDK process; tests use a fake that replays a canned event
/// sequence (grounded in the teacher's `FakeAgentAdapter`,
/// `crates/daemon/src/adapters/agent/fake.rs`).
#[async_trait]
pub trait AgentEngine: Send + Sync + 'static {
    async fn query(
        &self,
        prompt: String,
        options: EngineOptions,
    ) -> Result<EngineSession, AgentEngineError>;
}
