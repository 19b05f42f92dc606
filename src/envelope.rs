//! Uniform response envelope for worker-facing endpoints.
//!
//! Success: `{"status": "ok", "code": "ok", "data": <payload>}`.
//! Failure: the status code of the underlying [`ApiError`] with
//! `{"detail": {"code", "message"}}`, never wrapped in the success shape.

use axum::Json;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApiError, ErrorDetail};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub status: String,
    pub code: String,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: "ok".to_string(),
            code: "ok".to_string(),
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// Result type of every worker-facing handler.
pub type EnvelopeResult<T> = Result<Envelope<T>, ApiError>;

/// Wrap the outcome of an inner operation.
///
/// Success goes into the envelope; failures keep their status and code.
pub fn wrap<T, E>(result: Result<T, E>) -> EnvelopeResult<T>
where
    E: Into<ApiError>,
{
    result.map(Envelope::ok).map_err(Into::into)
}

/// Strip a success envelope, returning `data`. Bodies that are not an
/// envelope are returned as they are.
pub fn unwrap_ok(body: Value) -> Value {
    let is_envelope = body.get("status").and_then(Value::as_str) == Some("ok")
        && body.get("code").and_then(Value::as_str) == Some("ok")
        && body.get("data").is_some();

    match body {
        Value::Object(mut map) if is_envelope => map.remove("data").unwrap_or(Value::Null),
        other => other,
    }
}

/// Extract `{"detail": {"code", "message"}}` from an error body.
pub fn error_detail(body: &Value) -> Option<ErrorDetail> {
    let detail = body.get("detail")?;
    let code = detail.get("code")?.as_str()?;
    let message = detail
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Some(ErrorDetail {
        code: code.to_string(),
        message: message.to_string(),
    })
}
