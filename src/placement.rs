//! Where an environment's operations execute.
//!
//! Host-local environments are handled in-process. Delegated environments are
//! only routed to their worker after the worker has answered a health check;
//! an unready worker is a hard stop with no local fallback.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

use crate::db::EnvironmentStore;
use crate::error::{ApiError, ErrorCode};
use crate::model::{Environment, PlacementDomain, WorkerServer};
use crate::types::WorkerServerId;
use crate::worker_client::{WORKER_AUTH_FAILED, WorkerApi};

pub const WORKER_HEALTH_PATH: &str = "/api/worker/health";

/// Resolved execution domain of one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Local,
    Remote(WorkerServer),
}

#[derive(Clone)]
pub struct PlacementResolver {
    store: Arc<dyn EnvironmentStore>,
    workers: Arc<dyn WorkerApi>,
    health_timeout: Duration,
}

impl PlacementResolver {
    pub fn new(
        store: Arc<dyn EnvironmentStore>,
        workers: Arc<dyn WorkerApi>,
        health_timeout: Duration,
    ) -> Self {
        Self {
            store,
            workers,
            health_timeout,
        }
    }

    pub async fn resolve(&self, env: &Environment) -> Result<Placement, ApiError> {
        match &env.worker_server_id {
            None => Ok(Placement::Local),
            Some(worker_id) => {
                let worker = self.assert_worker_ready(worker_id).await?;
                Ok(Placement::Remote(worker))
            }
        }
    }

    /// Load the worker and check that it is reachable and reports healthy.
    pub async fn assert_worker_ready(
        &self,
        worker_id: &WorkerServerId,
    ) -> Result<WorkerServer, ApiError> {
        let worker = self
            .store
            .get_worker(worker_id)
            .await
            .map_err(|e| {
                warn!(worker_id = %worker_id, error = %e, "Worker lookup failed");
                ApiError::internal("Failed to load worker server")
            })?
            .ok_or_else(|| {
                ApiError::new(
                    ErrorCode::WorkerUnavailable,
                    format!("Worker server {} is not registered", worker_id),
                )
            })?;

        let health = self
            .workers
            .call(
                &worker,
                Method::GET,
                WORKER_HEALTH_PATH,
                None,
                Some(self.health_timeout),
            )
            .await;

        match health {
            Ok(data) if reports_worker_role(&data) => {
                debug!(worker = %worker.name, "Worker ready");
                Ok(worker)
            }
            Ok(_) => {
                warn!(worker = %worker.name, "Worker health check reported an unexpected role");
                Err(worker_unavailable(&worker))
            }
            // Credential problems are configuration errors, not an outage.
            Err(e) if e.code == WORKER_AUTH_FAILED => Err(e.into()),
            Err(e) => {
                warn!(
                    worker = %worker.name,
                    code = %e.code,
                    status = e.status_code,
                    "Worker health check failed"
                );
                Err(worker_unavailable(&worker))
            }
        }
    }

    /// Whether `env` belongs to `domain`.
    pub fn in_domain(env: &Environment, domain: &PlacementDomain) -> bool {
        domain.contains(env)
    }
}

fn reports_worker_role(data: &Value) -> bool {
    data.get("role").and_then(Value::as_str) == Some("worker")
}

fn worker_unavailable(worker: &WorkerServer) -> ApiError {
    ApiError::new(
        ErrorCode::WorkerUnavailable,
        format!("Worker server {} is not ready", worker.name),
    )
}
