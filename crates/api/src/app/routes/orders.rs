use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use dealerflow_core::OrderId;

use crate::app::errors::{json_error, store_error_to_response};
use crate::app::services::AppServices;

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(order_id): Path<String>,
) -> axum::response::Response {
    let order_id = match OrderId::new(order_id) {
        Ok(id) => id,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()),
    };

    match services.stores.orders.find_by_id(&order_id).await {
        Ok(Some(order)) => Json(order).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "not_found", format!("order {order_id} not found")),
        Err(e) => store_error_to_response(e),
    }
}
