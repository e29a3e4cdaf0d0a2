use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use dealerflow_infra::jobs::JobStoreError;
use dealerflow_orders::StoreError;

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        StoreError::Serialization(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "serialization_error", msg)
        }
        StoreError::Unavailable(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", msg)
        }
    }
}

pub fn job_error_to_response(err: JobStoreError) -> axum::response::Response {
    match err {
        JobStoreError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found"))
        }
        JobStoreError::NotFailed(id) => json_error(
            StatusCode::CONFLICT,
            "not_failed",
            format!("job {id} is not in the failed set"),
        ),
        JobStoreError::AlreadyExists(id) => json_error(
            StatusCode::CONFLICT,
            "already_exists",
            format!("job {id} already exists"),
        ),
        JobStoreError::Storage(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "queue_unavailable", msg)
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
