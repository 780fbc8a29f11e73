use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use campus_infra::orchestrator::OrchestratorError;

pub fn orchestrator_error_to_response(err: OrchestratorError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        OrchestratorError::NotFound { .. } => json_error(StatusCode::NOT_FOUND, "not_found", message),
        OrchestratorError::Conflict(_) => json_error(StatusCode::CONFLICT, "conflict", message),
        OrchestratorError::Validation(_) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", message)
        }
        OrchestratorError::ExternalService(_) => {
            json_error(StatusCode::BAD_GATEWAY, "external_service_error", message)
        }
        OrchestratorError::Unknown {
            operation,
            enrollment_id,
            ..
        } => {
            error!(operation, enrollment_id = ?enrollment_id, error = %message, "unexpected failure");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal error",
            )
        }
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
