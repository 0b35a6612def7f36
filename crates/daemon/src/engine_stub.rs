// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Placeholder [`AgentEngine`]. The real process-spawning adapter (shelling
//! the agent CLI/SDK) is out of scope here (`spec.md` §1 "Out of scope") —
//! deployers supply their own `Arc<dyn AgentEngine>` in place of this one.

use async_trait::async_trait;
use wm_adapters::{AgentEngine, AgentEngineError, EngineOptions, EngineSession};

pub struct UnconfiguredEngine;

#[async_trait]
impl AgentEngine for UnconfiguredEngine {
    async fn query(&self, _prompt: String, _options: EngineOptions) -> Result<EngineSession, AgentEngineError> {
        Err(AgentEngineError::SpawnFailed("no agent engine adapter configured".to_string()))
    }
}
