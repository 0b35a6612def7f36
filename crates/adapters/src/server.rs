// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! BuilddServer HTTP client (`spec.md` §6).
//!
//! The teacher's own local sidecar talks a hand-rolled HTTP-over-socket
//! protocol (`crates/adapters/src/agent/docker/http.rs`) because it only
//! ever reaches `localhost`. This client reaches a real remote server over
//! TLS, so it uses `reqwest` — the same crate `golem-client` reaches for in
//! the broader example pack for the same kind of authenticated REST client.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use wm_core::{TaskId, WorkerId, WorkspaceId};
use wm_wire::{
    ClaimRequest, ClaimResponse, CreateSummaryRequest, HeartbeatRequest, HeartbeatResponse,
    ObservationDigest, SkillBundle, WorkerPatch, WorkspaceConfig, WorkspaceMemoryRequest,
};

#[derive(Debug, Error)]
pub enum BuilddServerError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl BuilddServerError {
    /// `spec.md` §7: a 409 on a worker-update PATCH means the server already
    /// considers the worker terminal; callers treat this as success.
    pub fn is_conflict(&self) -> bool {
        matches!(self, BuilddServerError::Status { status, .. } if *status == StatusCode::CONFLICT)
    }
}

/// Adapter seam to BuilddServer's authenticated REST API.
#[async_trait]
pub trait BuilddServerClient: Send + Sync + 'static {
    async fn claim(&self, request: ClaimRequest) -> Result<ClaimResponse, BuilddServerError>;
    async fn patch_worker(&self, id: &WorkerId, patch: &WorkerPatch) -> Result<(), BuilddServerError>;
    async fn workspace_config(&self, id: &WorkspaceId) -> Result<WorkspaceConfig, BuilddServerError>;
    async fn heartbeat(&self, request: HeartbeatRequest) -> Result<HeartbeatResponse, BuilddServerError>;
    async fn cleanup(&self) -> Result<(), BuilddServerError>;
    async fn observation_digest(&self, workspace_id: &WorkspaceId, task_id: &TaskId) -> Result<ObservationDigest, BuilddServerError>;
    async fn create_summary(&self, request: CreateSummaryRequest) -> Result<(), BuilddServerError>;
    async fn workspace_memory(&self, id: &WorkspaceId, request: WorkspaceMemoryRequest) -> Result<(), BuilddServerError>;
    async fn list_skills(&self, workspace_id: &WorkspaceId) -> Result<Vec<SkillBundle>, BuilddServerError>;
    async fn sync_skill(&self, workspace_id: &WorkspaceId, bundle: &SkillBundle) -> Result<(), BuilddServerError>;
}

pub struct ReqwestServerClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ReqwestServerClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client builds with default TLS backend");
        Self { http, base_url: base_url.into(), api_key: api_key.into() }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response, BuilddServerError> {
        let mut builder = self.http.request(method, self.url(path)).bearer_auth(&self.api_key);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(BuilddServerError::Status { status, body })
    }
}

#[async_trait]
impl BuilddServerClient for ReqwestServerClient {
    async fn claim(&self, request: ClaimRequest) -> Result<ClaimResponse, BuilddServerError> {
        let response = self.request(Method::POST, "/api/workers/claim", Some(&request)).await?;
        Ok(response.json().await?)
    }

    async fn patch_worker(&self, id: &WorkerId, patch: &WorkerPatch) -> Result<(), BuilddServerError> {
        match self.request(Method::PATCH, &format!("/api/workers/{id}"), Some(patch)).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_conflict() => {
                tracing::debug!(worker_id = %id, "worker already terminal server-side, treating patch as success");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn workspace_config(&self, id: &WorkspaceId) -> Result<WorkspaceConfig, BuilddServerError> {
        let response = self
            .request::<()>(Method::GET, &format!("/api/workspaces/{id}/config"), None)
            .await?;
        Ok(response.json().await?)
    }

    async fn heartbeat(&self, request: HeartbeatRequest) -> Result<HeartbeatResponse, BuilddServerError> {
        let response = self.request(Method::POST, "/api/heartbeat", Some(&request)).await?;
        Ok(response.json().await?)
    }

    async fn cleanup(&self) -> Result<(), BuilddServerError> {
        self.request::<()>(Method::POST, "/api/cleanup", None).await?;
        Ok(())
    }

    async fn observation_digest(
        &self,
        workspace_id: &WorkspaceId,
        task_id: &TaskId,
    ) -> Result<ObservationDigest, BuilddServerError> {
        let path = format!("/api/workspaces/{workspace_id}/observations/digest?taskId={task_id}");
        let response = self.request::<()>(Method::GET, &path, None).await?;
        Ok(response.json().await?)
    }

    async fn create_summary(&self, request: CreateSummaryRequest) -> Result<(), BuilddServerError> {
        self.request(Method::POST, "/api/observations/summary", Some(&request)).await?;
        Ok(())
    }

    async fn workspace_memory(&self, id: &WorkspaceId, request: WorkspaceMemoryRequest) -> Result<(), BuilddServerError> {
        self.request(Method::POST, &format!("/api/workspaces/{id}/memory"), Some(&request)).await?;
        Ok(())
    }

    async fn list_skills(&self, workspace_id: &WorkspaceId) -> Result<Vec<SkillBundle>, BuilddServerError> {
        let response = self
            .request::<()>(Method::GET, &format!("/api/workspaces/{workspace_id}/skills"), None)
            .await?;
        Ok(response.json().await?)
    }

    async fn sync_skill(&self, workspace_id: &WorkspaceId, bundle: &SkillBundle) -> Result<(), BuilddServerError> {
        self.request(Method::POST, &format!("/api/workspaces/{workspace_id}/skills/sync"), Some(bundle))
            .await?;
        Ok(())
    }
}
