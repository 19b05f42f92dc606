//! HTTP API.
//!
//! A host node serves the control-plane routes below; a worker node serves
//! the enveloped `/api/worker/*` routes from [`worker`]. Both expose `/health`.

pub mod worker;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::{JsonRejection, QueryRejection}},
    routing::{get, post},
};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{Value, json};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::NodeRole;
use crate::db::EnvironmentStore;
use crate::error::{ApiError, ErrorCode};
use crate::model::PlacementDomain;
use crate::placement::{Placement, PlacementResolver};
use crate::resources::{GpuAccountant, GpuResources};
use crate::rotation::{RotateRootPasswordRequest, RotationCoordinator, RotationOutcome};
use crate::service_url::{build_service_url, parse_port};
use crate::types::{EnvironmentId, WorkerServerId};

/// Shared state of every route.
#[derive(Clone)]
pub struct AppState {
    pub role: NodeRole,
    pub store: Arc<dyn EnvironmentStore>,
    pub placement: PlacementResolver,
    pub rotation: Arc<RotationCoordinator>,
    pub gpu: GpuAccountant,
    pub public_base_url: String,
    /// SHA-256 of the token workers accept; `None` rejects every worker call.
    pub worker_token_digest: Option<Vec<u8>>,
}

/// Router for the node's role.
pub fn create_router(state: AppState) -> Router {
    let routes = match state.role {
        NodeRole::Host => host_routes(),
        NodeRole::Worker => worker::routes(state.clone()),
    };

    routes
        .route("/health", get(health_check))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

fn host_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/environments/{id}/accounts/root/reset-password",
            post(reset_root_password),
        )
        .route("/environments/{id}/service-url", get(service_url))
        .route("/resources/gpu", get(host_gpu))
        .route("/workers/{id}/gpu", get(worker_gpu))
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "role": state.role.to_string(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn reset_root_password(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<RotateRootPasswordRequest>, JsonRejection>,
) -> Result<Json<RotationOutcome>, ApiError> {
    let Json(request) = payload?;
    let outcome = state
        .rotation
        .rotate_root_password(&EnvironmentId::new(id), SecretString::from(request.new_password))
        .await?;
    Ok(Json(outcome))
}

async fn host_gpu(State(state): State<AppState>) -> Result<Json<GpuResources>, ApiError> {
    Ok(Json(state.gpu.get_gpu_resources(&PlacementDomain::Host).await?))
}

async fn worker_gpu(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<GpuResources>, ApiError> {
    let domain = PlacementDomain::Worker(WorkerServerId::new(id));
    Ok(Json(state.gpu.get_gpu_resources(&domain).await?))
}

#[derive(Debug, Deserialize)]
struct ServiceUrlQuery {
    port: Option<String>,
    path: Option<String>,
}

async fn service_url(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<ServiceUrlQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let port = parse_port(query.port.map(Value::String).as_ref())
        .ok_or_else(|| ApiError::new(ErrorCode::InvalidPort, "Port must be between 1 and 65535"))?;

    let id = EnvironmentId::new(id);
    let env = state
        .store
        .get_environment(&id)
        .await
        .map_err(|_| ApiError::internal("Failed to load environment"))?
        .ok_or_else(|| ApiError::env_not_found(&id))?;

    let base_url = match state.placement.resolve(&env).await? {
        Placement::Local => state.public_base_url.clone(),
        Placement::Remote(worker) => worker.base_url,
    };
    let url = build_service_url(&base_url, port, query.path.as_deref().unwrap_or(""))
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(Json(json!({ "url": url })))
}
