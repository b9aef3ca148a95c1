use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use shared::models::{ErrorBody, ErrorResponse};
use shared::service::ServiceError;

pub(super) fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: message.to_string(),
            },
        }),
    )
        .into_response()
}

/// Repository details stay in the logs; callers only see the error class.
pub(super) fn service_error_response(err: ServiceError) -> Response {
    match err {
        ServiceError::TenantNotFound(_) => error_response(
            StatusCode::NOT_FOUND,
            "tenant_not_found",
            "No restaurant matches this request",
        ),
        ServiceError::RepositoryUnavailable(_) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "repository_unavailable",
            "Restaurant data is temporarily unavailable",
        ),
        ServiceError::InvalidMessage(_) => error_response(
            StatusCode::BAD_REQUEST,
            "empty_message",
            "Message must not be empty",
        ),
    }
}
