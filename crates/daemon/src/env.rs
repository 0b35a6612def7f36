// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::ConfigError;

/// Resolve the runner's state directory: `WM_STATE_DIR` > XDG state dir >
/// `~/.local/state/wm-supervisor`.
pub fn state_dir() -> Result<PathBuf, ConfigError> {
    if let Ok(dir) = std::env::var("WM_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let base = dirs::state_dir().or_else(|| dirs::home_dir().map(|h| h.join(".local/state")));
    base.map(|b| b.join("wm-supervisor")).ok_or(ConfigError::NoStateDir)
}

/// BuilddServer base URL, required.
pub fn server_base_url() -> Result<String, ConfigError> {
    std::env::var("WM_SERVER_URL").map_err(|_| ConfigError::MissingEnv("WM_SERVER_URL"))
}

/// BuilddServer API key, required.
pub fn server_api_key() -> Result<String, ConfigError> {
    std::env::var("WM_SERVER_API_KEY").map_err(|_| ConfigError::MissingEnv("WM_SERVER_API_KEY"))
}

/// Push-channel WebSocket URL, required.
pub fn push_channel_url() -> Result<String, ConfigError> {
    std::env::var("WM_PUSH_URL").map_err(|_| ConfigError::MissingEnv("WM_PUSH_URL"))
}

/// Local UI URL advertised to the server on claim (`spec.md` §6).
pub fn local_ui_url() -> String {
    std::env::var("WM_LOCAL_UI_URL").unwrap_or_else(|_| "http://localhost:4000".to_string())
}

/// Credential provider override (`spec.md` §4.5 step 5); `"openrouter"`
/// routes the engine through an OpenRouter-compatible endpoint.
pub fn provider() -> Option<String> {
    std::env::var("WM_PROVIDER").ok().filter(|s| !s.is_empty())
}

pub fn openrouter_base_url() -> Option<String> {
    std::env::var("WM_OPENROUTER_BASE_URL").ok().filter(|s| !s.is_empty())
}

pub fn openrouter_auth_token() -> Option<String> {
    std::env::var("WM_OPENROUTER_AUTH_TOKEN").ok().filter(|s| !s.is_empty())
}

/// Shutdown drain timeout (default 5s, configurable via `WM_DRAIN_TIMEOUT_MS`).
pub fn drain_timeout() -> Duration {
    std::env::var("WM_DRAIN_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5))
}
