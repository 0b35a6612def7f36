// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace configuration shapes fetched from BuilddServer.

use serde::{Deserialize, Serialize};

/// Whether a workspace's server-side config has been explicitly approved.
///
/// An admin-confirmed workspace's git/agent settings outrank local defaults
/// (see `spec.md` §4.5 step 3 and the GLOSSARY entry for "Admin-confirmed").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigStatus {
    Unconfigured,
    AdminConfirmed,
}

impl ConfigStatus {
    pub fn is_admin_confirmed(self) -> bool {
        matches!(self, ConfigStatus::AdminConfirmed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchingStrategy {
    None,
    Trunk,
    Gitflow,
    Feature,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    pub default_branch: String,
    pub branching_strategy: BranchingStrategy,
    #[serde(default)]
    pub branch_prefix: Option<String>,
    pub commit_style: String,
    pub requires_pr: bool,
    #[serde(default)]
    pub target_branch: Option<String>,
    pub auto_create_pr: bool,
    #[serde(default)]
    pub agent_instructions: Option<String>,
    pub use_claude_md: bool,
    #[serde(default)]
    pub bypass_permissions: Option<bool>,
    #[serde(default)]
    pub max_budget_usd: Option<f64>,
}

/// Workspace config as returned by `GET /api/workspaces/{id}/config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub config_status: ConfigStatus,
    #[serde(default)]
    pub git_config: Option<GitConfig>,
    /// Installer commands this workspace's admin has pre-approved for
    /// `skill_install` (`spec.md` §4.12 check (a)).
    #[serde(default)]
    pub installer_allowlist: Vec<String>,
    /// When set, assigned skill bundles are materialized as subagents instead
    /// of added to `allowed_tools` (`spec.md` §4.5 step 5).
    #[serde(default)]
    pub use_skill_agents: bool,
}

/// Permission mode resolved for a session (`spec.md` §4.5 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    Plan,
    AcceptEdits,
    BypassPermissions,
}

impl PermissionMode {
    /// Resolve the permission mode for a task, following the precedence in
    /// `spec.md` §4.5 step 3: workspace-admin-confirmed bypass setting takes
    /// priority, then local config, then default to accept-edits.
    pub fn resolve(is_planning_task: bool, workspace_bypass: Option<bool>, local_bypass: bool) -> Self {
        if is_planning_task {
            return PermissionMode::Plan;
        }
        let bypass = workspace_bypass.unwrap_or(local_bypass);
        if bypass {
            PermissionMode::BypassPermissions
        } else {
            PermissionMode::AcceptEdits
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planning_task_always_plan_mode() {
        assert_eq!(PermissionMode::resolve(true, Some(true), true), PermissionMode::Plan);
    }

    #[test]
    fn workspace_setting_outranks_local() {
        assert_eq!(
            PermissionMode::resolve(false, Some(false), true),
            PermissionMode::AcceptEdits
        );
        assert_eq!(
            PermissionMode::resolve(false, Some(true), false),
            PermissionMode::BypassPermissions
        );
    }

    #[test]
    fn falls_back_to_local_when_workspace_silent() {
        assert_eq!(PermissionMode::resolve(false, None, true), PermissionMode::BypassPermissions);
        assert_eq!(PermissionMode::resolve(false, None, false), PermissionMode::AcceptEdits);
    }
}
