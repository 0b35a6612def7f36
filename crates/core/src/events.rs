// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed engine events and content blocks.
//!
//! Modeled as tagged variants per `spec.md` §9's design note on dynamic
//! typing & untagged unions: every event/content-block tag the engine can
//! send is named explicitly, and anything unrecognized decodes to a
//! catch-all variant that the handler treats as a no-op rather than a
//! parse failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single event yielded by the agent engine's streaming interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    System(SystemEvent),
    Assistant(AssistantEvent),
    Result(ResultEvent),
    /// Any event tag this crate does not model. Handled as a no-op.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEvent {
    pub subtype: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantEvent {
    pub message: AssistantMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, #[serde(default)] input: Value },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEvent {
    pub subtype: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub duration_api_ms: Option<u64>,
    #[serde(default)]
    pub num_turns: Option<u32>,
    #[serde(default)]
    pub usage: Option<Value>,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
}

impl ResultEvent {
    pub fn is_success(&self) -> bool {
        self.subtype == "success"
    }

    pub fn is_budget_exceeded(&self) -> bool {
        self.subtype == "error_max_budget_usd"
    }
}

/// The shape of an `AskUserQuestion` tool-use input.
#[derive(Debug, Clone, Deserialize)]
pub struct AskUserQuestionInput {
    pub questions: Vec<QuestionEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestionEntry {
    pub question: String,
    #[serde(default)]
    pub options: Option<Vec<PromptOption>>,
}

/// An option offered alongside a question or plan-approval prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptOption {
    pub label: String,
}

/// A message the supervisor enqueues back into an active session, e.g. a
/// plan auto-approval or a user follow-up carrying `parent_tool_use_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineInputMessage {
    pub text: String,
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}
