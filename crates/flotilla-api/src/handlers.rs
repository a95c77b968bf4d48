//! Admin route handlers.
//!
//! Handlers read through `StateStore` and mutate through the
//! `DeploymentManager`. Every response body is JSON; failures are
//! `{"error": "..."}` with a matching status code.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use flotilla_deploy::{repo, DeployError};

use crate::ApiState;

const DEFAULT_MIN_REPLICAS: u32 = 1;
const DEFAULT_MAX_REPLICAS: u32 = 3;
const RECENT_DEPLOYMENTS_LIMIT: usize = 10;

fn error_response(status: StatusCode, message: String) -> axum::response::Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn deploy_error_response(err: &DeployError) -> axum::response::Response {
    let status = match err {
        DeployError::InvalidRepository(_) | DeployError::InvalidReplicaBounds { .. } => {
            StatusCode::BAD_REQUEST
        }
        DeployError::InsufficientWorkers { .. } | DeployError::WorkerUnreachable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        DeployError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err.to_string())
}

// ── Deployments ────────────────────────────────────────────────────

/// Body of `POST /deploy`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub github_repo: String,
    pub user_name: String,
    pub min_replicas: Option<u32>,
    pub max_replicas: Option<u32>,
}

/// POST /deploy
pub async fn create_deployment(
    State(state): State<ApiState>,
    Json(req): Json<DeployRequest>,
) -> impl IntoResponse {
    let min = req.min_replicas.unwrap_or(DEFAULT_MIN_REPLICAS);
    let max = req.max_replicas.unwrap_or(DEFAULT_MAX_REPLICAS.max(min));
    info!(repo = %req.github_repo, user = %req.user_name, min, max, "deploy requested");

    match state
        .manager
        .create(&req.github_repo, &req.user_name, min, max)
        .await
    {
        Ok(deployment) => (StatusCode::CREATED, Json(deployment)).into_response(),
        Err(e) => {
            warn!(repo = %req.github_repo, error = %e, "deploy rejected");
            deploy_error_response(&e)
        }
    }
}

/// GET /deployments — the 10 most recent, newest first.
pub async fn list_deployments(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_deployments().await {
        Ok(mut deployments) => {
            deployments.sort_by(|a, b| {
                b.created_at
                    .cmp(&a.created_at)
                    .then(b.id.cmp(&a.id))
            });
            deployments.truncate(RECENT_DEPLOYMENTS_LIMIT);
            Json(deployments).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// GET /deployment/{id}
pub async fn get_deployment(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> impl IntoResponse {
    debug!(deployment_id = id, "deployment fetch");
    match state.store.get_deployment(id).await {
        Ok(Some(deployment)) => Json(deployment).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("deployment {id} not found")),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// DELETE /deployment/{id}
pub async fn delete_deployment(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> impl IntoResponse {
    info!(deployment_id = id, "deployment delete requested");
    match state.manager.remove_deployment(id).await {
        Ok(true) => Json(json!({ "message": format!("deployment {id} removed") })).into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, format!("deployment {id} not found")),
        Err(e) => deploy_error_response(&e),
    }
}

// ── Workers & replicas ─────────────────────────────────────────────

/// GET /workers — freshest heartbeat first.
pub async fn list_workers(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_workers().await {
        Ok(mut workers) => {
            workers.sort_by(|a, b| b.last_heartbeat.cmp(&a.last_heartbeat));
            Json(workers).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// GET /replicas/{deploymentId} — ordered by replica number.
pub async fn list_replicas(
    State(state): State<ApiState>,
    Path(deployment_id): Path<u64>,
) -> impl IntoResponse {
    match state.store.list_replicas(deployment_id).await {
        Ok(replicas) => Json(replicas).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ── Push webhook ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PushPayload {
    repository: Option<PushRepository>,
}

#[derive(Debug, Deserialize)]
pub struct PushRepository {
    name: Option<String>,
    owner: Option<PushOwner>,
}

#[derive(Debug, Deserialize)]
pub struct PushOwner {
    name: Option<String>,
}

/// POST /webhook — a code-host push redeploys every matching deployment.
pub async fn push_webhook(
    State(state): State<ApiState>,
    Json(payload): Json<PushPayload>,
) -> impl IntoResponse {
    let repository = payload.repository.unwrap_or(PushRepository {
        name: None,
        owner: None,
    });
    let (Some(name), Some(owner)) = (
        repository.name,
        repository.owner.and_then(|o| o.name),
    ) else {
        return error_response(StatusCode::BAD_REQUEST, "missing parameters".to_string());
    };

    let clone_url = repo::clone_url(&owner, &name);
    info!(repo = %clone_url, "push webhook received");

    let deployments = match state.store.list_deployments().await {
        Ok(deployments) => deployments,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let mut redeployed = Vec::new();
    for deployment in deployments.iter().filter(|d| d.repo_ref == clone_url) {
        match state.manager.redeploy(deployment.id).await {
            Ok(delivered) => {
                redeployed.push(json!({ "id": deployment.id, "delivered": delivered }));
            }
            Err(e) => {
                warn!(deployment_id = deployment.id, error = %e, "webhook redeploy failed");
                redeployed.push(json!({ "id": deployment.id, "error": e.to_string() }));
            }
        }
    }

    if redeployed.is_empty() {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("no deployment for {owner}/{name}"),
        );
    }

    Json(json!({
        "message": format!("redeploying {owner}/{name}"),
        "deployments": redeployed,
    }))
    .into_response()
}

// ── Liveness ───────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz(State(state): State<ApiState>) -> impl IntoResponse {
    let uptime = state.clock.epoch_secs().saturating_sub(state.started_at);
    Json(json!({
        "status": "ok",
        "service": "flotilla",
        "uptimeSecs": uptime,
    }))
}
