use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use tracing::info;

use dealerflow_core::OrderId;
use dealerflow_infra::jobs::JobId;
use dealerflow_infra::workers::enqueue_dealer_assignment;
use dealerflow_orders::OrderStatus;

use crate::app::dto::{EnqueuedDto, FailedJobDto, FailedJobsQuery};
use crate::app::errors::{job_error_to_response, json_error, store_error_to_response};
use crate::app::services::AppServices;

const DEFAULT_FAILED_LIMIT: usize = 50;
const MAX_FAILED_LIMIT: usize = 500;

pub fn router() -> Router {
    Router::new()
        .route("/jobs/failed", get(list_failed))
        .route("/jobs/:job_id", delete(remove_job))
        .route("/jobs/:job_id/retry", post(retry_job))
        .route("/orders/:order_id/reassign", post(reassign_order))
}

/// Parked jobs, oldest first.
pub async fn list_failed(
    Extension(services): Extension<Arc<AppServices>>,
    Query(q): Query<FailedJobsQuery>,
) -> axum::response::Response {
    let limit = q.limit.unwrap_or(DEFAULT_FAILED_LIMIT).min(MAX_FAILED_LIMIT);
    match services.stores.jobs.list_failed(limit).await {
        Ok(jobs) => {
            let jobs: Vec<FailedJobDto> = jobs.into_iter().map(FailedJobDto::from).collect();
            Json(jobs).into_response()
        }
        Err(e) => job_error_to_response(e),
    }
}

fn parse_job_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", "job id must be a UUID"))
}

/// Move a parked job back to the wait list with a fresh attempt budget.
pub async fn retry_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.stores.jobs.retry_failed(job_id).await {
        Ok(job) => {
            info!(job_id = %job.id, "failed job requeued");
            (StatusCode::ACCEPTED, Json(EnqueuedDto { job_id: job.id })).into_response()
        }
        Err(e) => job_error_to_response(e),
    }
}

/// Drop a parked job for good.
pub async fn remove_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.stores.jobs.remove_failed(job_id).await {
        Ok(()) => {
            info!(job_id = %job_id, "failed job removed");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => job_error_to_response(e),
    }
}

/// Queue a fresh assignment run for an order still waiting on dealers.
pub async fn reassign_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(order_id): Path<String>,
) -> axum::response::Response {
    let order_id = match OrderId::new(order_id) {
        Ok(id) => id,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()),
    };

    let order = match services.stores.orders.find_by_id(&order_id).await {
        Ok(Some(order)) => order,
        Ok(None) => {
            return json_error(StatusCode::NOT_FOUND, "not_found", format!("order {order_id} not found"));
        }
        Err(e) => return store_error_to_response(e),
    };

    if order.status() != OrderStatus::Confirmed {
        return json_error(
            StatusCode::CONFLICT,
            "not_confirmed",
            format!("order {order_id} is {}", order.status().as_str()),
        );
    }

    match enqueue_dealer_assignment(services.stores.jobs.as_ref(), &order_id).await {
        Ok(job_id) => {
            info!(order_id = %order_id, job_id = %job_id, "reassignment queued");
            (StatusCode::ACCEPTED, Json(EnqueuedDto { job_id })).into_response()
        }
        Err(e) => job_error_to_response(e),
    }
}
