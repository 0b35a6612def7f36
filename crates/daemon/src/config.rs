// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration: non-secret settings from a TOML file under the
//! state directory, secrets and deployment-specific values from the
//! environment (`crate::env`).

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;
use wm_core::WorkspaceId;
use wm_engine::ManagerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine state directory")]
    NoStateDir,
    #[error("missing required environment variable: {0}")]
    MissingEnv(&'static str),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config.toml: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Non-secret settings read from `<state_dir>/config.toml`. Absent file
/// means every field defaults (a fresh runner with no workspaces yet).
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    max_tasks: Option<u32>,
    #[serde(default)]
    environment: Option<String>,
    #[serde(default)]
    home_dir: Option<PathBuf>,
    #[serde(default)]
    local_installer_allowlist: Vec<String>,
    #[serde(default)]
    skill_install_reject_all: bool,
    /// Workspace id -> local checkout path, feeding `StaticWorkspaceResolver`.
    #[serde(default)]
    workspaces: HashMap<String, PathBuf>,
}

const DEFAULT_MAX_TASKS: u32 = 4;

pub struct DaemonConfig {
    pub state_dir: PathBuf,
    pub log_path: PathBuf,
    pub lock_path: PathBuf,
    pub server_base_url: String,
    pub server_api_key: String,
    pub push_channel_url: String,
    pub workspaces: HashMap<WorkspaceId, PathBuf>,
    pub manager: ManagerConfig,
}

impl DaemonConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let state_dir = crate::env::state_dir()?;
        let file_path = state_dir.join("config.toml");
        let file_config = match std::fs::read_to_string(&file_path) {
            Ok(text) => toml::from_str(&text)?,
            Err(_) => FileConfig::default(),
        };

        let home_dir = file_config.home_dir.clone().or_else(dirs::home_dir).ok_or(ConfigError::NoStateDir)?;
        let workspaces = file_config.workspaces.iter().map(|(id, path)| (WorkspaceId::from_string(id.clone()), path.clone())).collect();

        Ok(Self {
            log_path: state_dir.join("daemon.log"),
            lock_path: state_dir.join("daemon.pid"),
            state_dir,
            server_base_url: crate::env::server_base_url()?,
            server_api_key: crate::env::server_api_key()?,
            push_channel_url: crate::env::push_channel_url()?,
            workspaces,
            manager: ManagerConfig {
                local_ui_url: crate::env::local_ui_url(),
                max_tasks: file_config.max_tasks.unwrap_or(DEFAULT_MAX_TASKS),
                environment: file_config.environment,
                home_dir,
                local_installer_allowlist: file_config.local_installer_allowlist,
                skill_install_reject_all: file_config.skill_install_reject_all,
                provider: crate::env::provider(),
                openrouter_base_url: crate::env::openrouter_base_url(),
                openrouter_auth_token: crate::env::openrouter_auth_token(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_config_defaults_are_empty() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert!(config.max_tasks.is_none());
        assert!(config.workspaces.is_empty());
        assert!(!config.skill_install_reject_all);
    }

    #[test]
    fn file_config_parses_workspace_map() {
        let toml = r#"
            max_tasks = 8
            skill_install_reject_all = true

            [workspaces]
            "wsp-abc" = "/home/user/repo"
        "#;
        let config: FileConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.max_tasks, Some(8));
        assert!(config.skill_install_reject_all);
        assert_eq!(config.workspaces.get("wsp-abc"), Some(&PathBuf::from("/home/user/repo")));
    }
}
