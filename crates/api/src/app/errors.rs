use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use batchforge_core::BatchError;

pub fn batch_error_to_response(err: BatchError) -> axum::response::Response {
    match err {
        BatchError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        BatchError::Config(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_configuration", msg)
        }
        BatchError::Repository(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "repository_error", msg)
        }
        other @ (BatchError::Action(_) | BatchError::Item(_)) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "execution_error",
            other.to_string(),
        ),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
