//! Worker-facing API.
//!
//! Every route requires the shared bearer token, and every response is either
//! the success envelope or a `{"detail": {...}}` error with the inner
//! failure's own status and code.

use axum::{
    Json, Router,
    extract::{Path, Request, State, rejection::JsonRejection},
    http::header::AUTHORIZATION,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use secrecy::SecretString;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::warn;

use super::AppState;
use crate::envelope::{EnvelopeResult, wrap};
use crate::error::{ApiError, ErrorCode};
use crate::model::PlacementDomain;
use crate::resources::GpuResources;
use crate::rotation::{RotateRootPasswordRequest, RotationOutcome};
use crate::types::EnvironmentId;

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/worker/health", get(health))
        .route("/api/worker/gpu", get(gpu))
        .route(
            "/api/worker/environments/{id}/accounts/root/reset-password",
            post(reset_root_password),
        )
        .route_layer(middleware::from_fn_with_state(state, require_worker_token))
}

/// Reject requests whose bearer token does not match the configured one.
async fn require_worker_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let authorized = match (presented, state.worker_token_digest.as_deref()) {
        (Some(token), Some(expected)) => Sha256::digest(token.as_bytes()).as_slice() == expected,
        _ => false,
    };

    if !authorized {
        warn!(path = %request.uri().path(), "Rejected worker API request");
        return Err(ApiError::new(ErrorCode::Unauthorized, "Invalid worker token"));
    }
    Ok(next.run(request).await)
}

async fn health() -> EnvelopeResult<Value> {
    wrap(Ok::<_, ApiError>(json!({"status": "healthy", "role": "worker"})))
}

async fn gpu(State(state): State<AppState>) -> EnvelopeResult<GpuResources> {
    wrap(state.gpu.get_gpu_resources(&PlacementDomain::Host).await)
}

async fn reset_root_password(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<RotateRootPasswordRequest>, JsonRejection>,
) -> EnvelopeResult<RotationOutcome> {
    let Json(request) = payload?;
    wrap(
        state
            .rotation
            .rotate_root_password(&EnvironmentId::new(id), SecretString::from(request.new_password))
            .await,
    )
}
