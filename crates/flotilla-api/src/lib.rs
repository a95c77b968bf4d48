//! flotilla-api — admin HTTP surface.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/deploy` | Create a deployment from a GitHub reference |
//! | GET | `/deployments` | 10 most recent deployments, newest first |
//! | GET | `/deployment/{id}` | Single deployment |
//! | DELETE | `/deployment/{id}` | Tear down and delete a deployment |
//! | GET | `/workers` | Known workers, freshest heartbeat first |
//! | GET | `/replicas/{deploymentId}` | Replicas ordered by replica number |
//! | POST | `/webhook` | GitHub push → redeploy matching deployments |
//! | GET | `/healthz` | Liveness |
//!
//! Every request and the status it resolved to are logged by a layer
//! wrapping the router, so the access log covers all routes uniformly.
//!
//! There is no caller authentication on this surface; it is expected to
//! sit behind the operator's network boundary.

pub mod handlers;

use std::sync::Arc;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tracing::info;

use flotilla_deploy::DeploymentManager;
use flotilla_state::{Clock, StateStore};

/// Shared state for the admin handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub manager: Arc<DeploymentManager>,
    pub clock: Arc<dyn Clock>,
    /// Epoch seconds at process start, for the liveness report.
    pub started_at: u64,
}

/// Build the admin router.
pub fn build_router(store: StateStore, manager: Arc<DeploymentManager>, clock: Arc<dyn Clock>) -> Router {
    let started_at = clock.epoch_secs();
    let state = ApiState {
        store,
        manager,
        clock,
        started_at,
    };

    Router::new()
        .route("/deploy", post(handlers::create_deployment))
        .route("/deployments", get(handlers::list_deployments))
        .route(
            "/deployment/{id}",
            get(handlers::get_deployment).delete(handlers::delete_deployment),
        )
        .route("/workers", get(handlers::list_workers))
        .route("/replicas/{deployment_id}", get(handlers::list_replicas))
        .route("/webhook", post(handlers::push_webhook))
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
        .layer(middleware::from_fn(log_request))
}

/// Access log: one line when a request arrives, one with the status it
/// resolved to.
async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    info!(%method, %path, "request received");

    let response = next.run(request).await;
    info!(%method, %path, status = %response.status(), "response sent");
    response
}
