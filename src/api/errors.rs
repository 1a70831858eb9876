use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::submission_recorder::RecorderError;
use crate::services::token_registry::{DenialReason, RegistryError};

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    Unauthorized(&'static str),
    Forbidden(&'static str),
    /// Exam entry refused; the body carries a machine-readable reason.
    AccessDenied(DenialReason),
    BadRequest(String),
    NotFound(String),
    PayloadTooLarge(String),
    Internal(String),
}

impl ApiError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        ApiError::internal(err, "Token storage failure")
    }
}

impl From<RecorderError> for ApiError {
    fn from(err: RecorderError) -> Self {
        match err {
            RecorderError::NotFound => ApiError::NotFound("Unknown exam token".to_string()),
            RecorderError::PayloadTooLarge(message) => ApiError::PayloadTooLarge(message),
            RecorderError::Storage(err) => ApiError::internal(err, "Failed to store submission"),
            RecorderError::Io(err) => ApiError::internal(err, "Failed to store uploaded file"),
        }
    }
}

fn error_body(status: StatusCode, detail: String, reason: Option<&'static str>) -> Response {
    (status, Json(ErrorResponse { status: status.as_u16(), detail, reason })).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(message) => {
                let mut response =
                    error_body(StatusCode::UNAUTHORIZED, message.to_string(), None);
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                response
            }
            ApiError::Forbidden(message) => {
                error_body(StatusCode::FORBIDDEN, message.to_string(), None)
            }
            ApiError::AccessDenied(reason) => {
                error_body(StatusCode::FORBIDDEN, reason.detail().to_string(), Some(reason.as_str()))
            }
            ApiError::BadRequest(message) => error_body(StatusCode::BAD_REQUEST, message, None),
            ApiError::NotFound(message) => error_body(StatusCode::NOT_FOUND, message, None),
            ApiError::PayloadTooLarge(message) => {
                error_body(StatusCode::PAYLOAD_TOO_LARGE, message, None)
            }
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal server error");
                error_body(StatusCode::INTERNAL_SERVER_ERROR, message, None)
            }
        }
    }
}
