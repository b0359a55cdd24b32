//! API error types and JSON error response formatting.
//!
//! Every failure leaves the server as `{error, message, details?}` with a
//! status code derived from the domain error taxonomy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use ratewise_core::error::RatewiseError;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "validation_failed", "not_found").
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 400: malformed parameters.
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    /// 409: state conflict or stored data that breaks an invariant.
    #[error("{0}")]
    Conflict(String),
    /// 422: well-formed input that fails validation.
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Timeout(String),
    /// 500 with the affected document, so the caller can reconcile it.
    #[error("{message}")]
    PartialIngestion {
        document_id: uuid::Uuid,
        message: String,
    },
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg, None),
            ApiError::Validation(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "validation_failed", msg, None)
            }
            ApiError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "timeout", msg, None),
            ApiError::PartialIngestion {
                document_id,
                message,
            } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "partial_ingestion",
                message,
                Some(json!({ "document_id": document_id })),
            ),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg, None)
            }
        };

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<RatewiseError> for ApiError {
    fn from(err: RatewiseError) -> Self {
        match err {
            RatewiseError::Validation(msg) => ApiError::Validation(msg),
            RatewiseError::NotFound(msg) => ApiError::NotFound(msg),
            RatewiseError::DataIntegrity(msg) => ApiError::Conflict(msg),
            RatewiseError::Timeout(msg) => ApiError::Timeout(msg),
            RatewiseError::PartialIngestion {
                document_id,
                reason,
            } => ApiError::PartialIngestion {
                document_id,
                message: reason,
            },
            RatewiseError::Config(msg) => ApiError::BadRequest(msg),
            other => {
                tracing::error!(error = %other, "Request failed");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_map_to_status_codes() {
        let cases = [
            (RatewiseError::Validation("bad".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (RatewiseError::NotFound("gone".into()), StatusCode::NOT_FOUND),
            (RatewiseError::DataIntegrity("overlap".into()), StatusCode::CONFLICT),
            (RatewiseError::Timeout("slow".into()), StatusCode::GATEWAY_TIMEOUT),
            (RatewiseError::Storage("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (
                RatewiseError::PartialIngestion {
                    document_id: uuid::Uuid::nil(),
                    reason: "queue down".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }
}
