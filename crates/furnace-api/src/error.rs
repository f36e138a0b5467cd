//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{error, warn};

/// API error type.
///
/// Messages are safe to show to callers; diagnostic detail is logged when the
/// error is created from a domain error.
#[derive(Debug)]
pub enum ApiError {
    Unprocessable(String),
    Forbidden(String),
    BadGateway(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Unprocessable(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, json!({ "error": msg }))
            }
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, json!({ "msg": msg })),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, json!({ "error": msg })),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg }))
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<furnace_core::Error> for ApiError {
    fn from(err: furnace_core::Error) -> Self {
        use furnace_core::Error;

        match err {
            Error::MalformedRequest(detail) => {
                warn!(error = %detail, "Rejected malformed request");
                ApiError::Unprocessable("Request is missing some parameter".to_string())
            }
            Error::AuthenticationFailure(msg) => ApiError::Forbidden(msg),
            Error::ManifestUnreachable(detail) => {
                error!(error = %detail, "Stack manifest unreachable");
                ApiError::BadGateway("Unable to fetch stack manifest".to_string())
            }
            Error::InvalidManifest(detail) => {
                error!(error = %detail, "Stack manifest invalid");
                ApiError::Internal("Stack manifest does not declare any environment".to_string())
            }
            Error::Registration(detail) => {
                error!(error = %detail, "Deployment registration failed");
                ApiError::Internal("Deployment registration failed".to_string())
            }
            other => {
                error!(error = %other, "Request failed");
                ApiError::Internal("Something went wrong...".to_string())
            }
        }
    }
}
