//! Authenticated transport into a worker's own API.
//!
//! Every failure carries a machine-readable code and an HTTP status. Callers
//! relay both unchanged (see `From<WorkerRequestError> for ApiError`), so the
//! reason a worker call failed survives the hop back to the original caller.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use reqwest::{Client, Method};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, warn};

use crate::envelope;
use crate::error::ApiError;
use crate::model::WorkerServer;

pub const WORKER_UNREACHABLE: &str = "worker_unreachable";
pub const WORKER_AUTH_FAILED: &str = "worker_auth_failed";
pub const WORKER_INVALID_RESPONSE: &str = "worker_invalid_response";
pub const WORKER_REQUEST_FAILED: &str = "worker_request_failed";

/// Failure of a call into a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRequestError {
    pub code: String,
    pub message: String,
    pub status_code: u16,
}

impl WorkerRequestError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, status_code: u16) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status_code,
        }
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(WORKER_UNREACHABLE, message, 503)
    }

    pub fn auth_failed() -> Self {
        Self::new(WORKER_AUTH_FAILED, "Worker authentication failed", 401)
    }
}

impl fmt::Display for WorkerRequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.status_code, self.message)
    }
}

impl std::error::Error for WorkerRequestError {}

impl From<WorkerRequestError> for ApiError {
    fn from(err: WorkerRequestError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        ApiError::relayed(status, err.code, err.message)
    }
}

/// `call_worker_api(worker, method, path, payload, timeout)`.
///
/// Returns the `data` member of the worker's success envelope.
#[async_trait]
pub trait WorkerApi: Send + Sync {
    async fn call(
        &self,
        worker: &WorkerServer,
        method: Method,
        path: &str,
        payload: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, WorkerRequestError>;
}

/// Path of a worker's root-password rotation endpoint for one environment.
pub fn root_password_path(environment_id: impl fmt::Display) -> String {
    format!(
        "/api/worker/environments/{}/accounts/root/reset-password",
        environment_id
    )
}

/// [`WorkerApi`] over HTTP with a bearer token.
pub struct HttpWorkerClient {
    client: Client,
    token: Option<SecretString>,
}

impl HttpWorkerClient {
    pub fn new(token: Option<SecretString>, default_timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(default_timeout)
            .user_agent("lyra-orchestrator/0.1.0")
            .build()?;
        Ok(Self { client, token })
    }

    fn url(worker: &WorkerServer, path: &str) -> String {
        format!(
            "{}/{}",
            worker.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl WorkerApi for HttpWorkerClient {
    async fn call(
        &self,
        worker: &WorkerServer,
        method: Method,
        path: &str,
        payload: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, WorkerRequestError> {
        let url = Self::url(worker, path);
        debug!(worker = %worker.name, %method, path, "Calling worker API");

        let mut request = self.client.request(method, &url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }
        if let Some(payload) = &payload {
            request = request.json(payload);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| {
            warn!(worker = %worker.name, path, timeout = e.is_timeout(), "Worker request failed");
            if e.is_timeout() {
                WorkerRequestError::unreachable("Worker request timed out")
            } else {
                WorkerRequestError::unreachable(format!("Worker {} is unreachable", worker.name))
            }
        })?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                WorkerRequestError::unreachable("Worker request timed out")
            } else {
                WorkerRequestError::unreachable(format!(
                    "Worker {} closed the connection",
                    worker.name
                ))
            }
        })?;

        interpret_response(status, &body)
    }
}

/// Map a worker's HTTP response onto the local error taxonomy.
fn interpret_response(status: u16, body: &[u8]) -> Result<Value, WorkerRequestError> {
    let parsed: Option<Value> = serde_json::from_slice(body).ok();

    if (200..300).contains(&status) {
        let value = parsed.ok_or_else(|| {
            WorkerRequestError::new(
                WORKER_INVALID_RESPONSE,
                "Worker returned a non-JSON response",
                502,
            )
        })?;
        return Ok(envelope::unwrap_ok(value));
    }

    // The worker rejected our credentials, whatever its body says.
    if status == 401 || status == 403 {
        return Err(WorkerRequestError::auth_failed());
    }

    if let Some(detail) = parsed.as_ref().and_then(envelope::error_detail) {
        return Err(WorkerRequestError::new(detail.code, detail.message, status));
    }

    Err(WorkerRequestError::new(
        WORKER_REQUEST_FAILED,
        format!("Worker request failed with HTTP {}", status),
        status,
    ))
}
