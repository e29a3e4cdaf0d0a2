use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::errors::job_error_to_response;
use crate::app::services::AppServices;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Queue depth per state.
pub async fn queue_health(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.stores.jobs.counts().await {
        Ok(counts) => Json(counts).into_response(),
        Err(e) => job_error_to_response(e),
    }
}
