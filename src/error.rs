//! Error taxonomy shared by every request-facing operation.
//!
//! Failures are raised as [`ApiError`] with their final status and code
//! already attached. Wrapping layers pass them through unchanged; the body a
//! caller sees is always `{"detail": {"code": ..., "message": ...}}`.

use std::fmt;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

/// Machine-readable failure codes raised by this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    EnvNotFound,
    EnvNotRunning,
    WeakPassword,
    ContainerNotFound,
    RotationFailed,
    WorkerUnavailable,
    WorkerUnreachable,
    WorkerAuthFailed,
    PasswordMetadataSyncFailed,
    InvalidRequest,
    InvalidPort,
    Unauthorized,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnvNotFound => "env_not_found",
            Self::EnvNotRunning => "env_not_running",
            Self::WeakPassword => "weak_password",
            Self::ContainerNotFound => "container_not_found",
            Self::RotationFailed => "rotation_failed",
            Self::WorkerUnavailable => "worker_unavailable",
            Self::WorkerUnreachable => "worker_unreachable",
            Self::WorkerAuthFailed => "worker_auth_failed",
            Self::PasswordMetadataSyncFailed => "password_metadata_sync_failed",
            Self::InvalidRequest => "invalid_request",
            Self::InvalidPort => "invalid_port",
            Self::Unauthorized => "unauthorized",
            Self::Internal => "internal_error",
        }
    }

    /// Status code this failure is reported with when raised locally.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::EnvNotFound => StatusCode::NOT_FOUND,
            Self::EnvNotRunning | Self::ContainerNotFound => StatusCode::CONFLICT,
            Self::WeakPassword | Self::InvalidRequest | Self::InvalidPort => {
                StatusCode::BAD_REQUEST
            }
            Self::RotationFailed | Self::PasswordMetadataSyncFailed | Self::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::WorkerUnavailable | Self::WorkerUnreachable => StatusCode::SERVICE_UNAVAILABLE,
            Self::WorkerAuthFailed | Self::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured failure: HTTP status, machine-readable code and a message
/// that is safe to show to the caller.
///
/// The code is kept as a string so failures relayed from a worker keep the
/// worker's own code even when this node does not know it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    status: StatusCode,
    code: String,
    message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status(),
            code: code.as_str().to_string(),
            message: message.into(),
        }
    }

    /// Rebuild a failure raised elsewhere, keeping status and code verbatim.
    pub fn relayed(
        status: StatusCode,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code.as_str()
    }

    pub fn env_not_found(id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::EnvNotFound, format!("Environment {} not found", id))
    }

    pub fn env_not_running() -> Self {
        Self::new(ErrorCode::EnvNotRunning, "Environment must be running")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            detail: ErrorDetail {
                code: self.code.clone(),
                message: self.message.clone(),
            },
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.status.as_u16(), self.message)
    }
}

impl std::error::Error for ApiError {}

/// Wire shape of every failure response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        // The rejection text can echo request bytes; keep it out of the body.
        ApiError::relayed(
            rejection.status(),
            ErrorCode::InvalidRequest.as_str(),
            "Request body is not valid for this endpoint",
        )
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::new(ErrorCode::InvalidRequest, rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body())).into_response()
    }
}
