//! REST API handlers.
//!
//! Deployment triggers are admitted synchronously (group, gate, conflict
//! policy) and then run on a detached task, so closing the request never
//! cancels a run.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use fleetgrid_rollout::{ArtifactSource, DeployError, DeployRequest, GateSignal};
use fleetgrid_state::ArtifactVersion;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn deploy_error_response(err: &DeployError) -> axum::response::Response {
    let status = match err {
        DeployError::UnknownGroup(_) => StatusCode::NOT_FOUND,
        DeployError::GateRejected { .. } => StatusCode::FORBIDDEN,
        DeployError::AlreadyActive(_) => StatusCode::CONFLICT,
        DeployError::Artifact(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&err.to_string(), status).into_response()
}

fn unknown_group(state: &ApiState, group: &str) -> Option<axum::response::Response> {
    if state.orchestrator.config().group(group).is_some() {
        return None;
    }
    Some(
        error_response(&format!("unknown target group: {group}"), StatusCode::NOT_FOUND)
            .into_response(),
    )
}

// ── Artifacts ──────────────────────────────────────────────────

/// POST /api/v1/groups/:group/artifacts
pub async fn stage_artifact(
    State(state): State<ApiState>,
    Path(group): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    if let Some(resp) = unknown_group(&state, &group) {
        return resp;
    }
    if body.is_empty() {
        return error_response("artifact body is empty", StatusCode::BAD_REQUEST).into_response();
    }
    match state.orchestrator.publisher().stage(&group, &body).await {
        Ok(artifact) => (StatusCode::CREATED, ApiResponse::ok(artifact)).into_response(),
        Err(e) => deploy_error_response(&e),
    }
}

/// GET /api/v1/groups/:group/artifacts/current
pub async fn current_artifact(
    State(state): State<ApiState>,
    Path(group): Path<String>,
) -> impl IntoResponse {
    let publisher = state.orchestrator.publisher();
    let version = match publisher.current_version(&group).await {
        Ok(Some(version)) => version,
        Ok(None) => {
            return error_response("nothing promoted yet", StatusCode::NOT_FOUND).into_response();
        }
        Err(e) => return deploy_error_response(&e),
    };
    match publisher.fetch_current(&group).await {
        Ok(Some(bytes)) => (
            StatusCode::OK,
            [
                (CONTENT_TYPE, "application/octet-stream".to_string()),
                (
                    axum::http::HeaderName::from_static("x-fleetgrid-version"),
                    version.to_string(),
                ),
            ],
            bytes,
        )
            .into_response(),
        Ok(None) => error_response("nothing promoted yet", StatusCode::NOT_FOUND).into_response(),
        Err(e) => deploy_error_response(&e),
    }
}

// ── Deployments ────────────────────────────────────────────────

/// Deployment trigger body.
#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    /// Staged version to ship; defaults to the current one (a redeploy).
    #[serde(default)]
    pub version: Option<ArtifactVersion>,
    pub gate: GateSignal,
}

#[derive(Debug, Serialize)]
struct Accepted {
    group: String,
    version: ArtifactVersion,
    status: &'static str,
}

/// POST /api/v1/groups/:group/deployments
pub async fn trigger_deployment(
    State(state): State<ApiState>,
    Path(group): Path<String>,
    Json(req): Json<TriggerRequest>,
) -> impl IntoResponse {
    if let Some(resp) = unknown_group(&state, &group) {
        return resp;
    }
    let version = match req.version {
        Some(version) => version,
        None => match state.orchestrator.publisher().current_version(&group).await {
            Ok(Some(version)) => version,
            Ok(None) => {
                return error_response(
                    "no version given and nothing promoted yet",
                    StatusCode::BAD_REQUEST,
                )
                .into_response();
            }
            Err(e) => return deploy_error_response(&e),
        },
    };

    let request = DeployRequest {
        group: group.clone(),
        artifact: ArtifactSource::Staged(version),
        gate: req.gate,
    };
    match state.orchestrator.spawn(request).await {
        Ok(_handle) => {
            info!(%group, %version, "deployment accepted");
            (
                StatusCode::ACCEPTED,
                ApiResponse::ok(Accepted {
                    group,
                    version,
                    status: "accepted",
                }),
            )
                .into_response()
        }
        Err(e) => {
            warn!(%group, %version, error = %e, "deployment refused");
            deploy_error_response(&e)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

/// GET /api/v1/groups/:group/deployments
pub async fn list_deployments(
    State(state): State<ApiState>,
    Path(group): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    match state.orchestrator.history(&group, query.limit) {
        Ok(runs) => ApiResponse::ok(runs).into_response(),
        Err(e) => deploy_error_response(&e),
    }
}

/// GET /api/v1/groups/:group/deployments/:run_id
pub async fn get_deployment(
    State(state): State<ApiState>,
    Path((group, run_id)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.store.get_run(&group, &run_id) {
        Ok(Some(run)) => ApiResponse::ok(run).into_response(),
        Ok(None) => error_response("deployment not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/groups/:group/active
pub async fn group_active(
    State(state): State<ApiState>,
    Path(group): Path<String>,
) -> impl IntoResponse {
    if let Some(resp) = unknown_group(&state, &group) {
        return resp;
    }
    let active = state.orchestrator.is_active(&group).await;
    ApiResponse::ok(serde_json::json!({ "group": group, "active": active })).into_response()
}

// ── Backups ────────────────────────────────────────────────────

/// GET /api/v1/targets/:target/backups
pub async fn list_backups(
    State(state): State<ApiState>,
    Path(target): Path<String>,
) -> impl IntoResponse {
    match state.store.list_backups_for_target(&target) {
        Ok(backups) => ApiResponse::ok(backups).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}
