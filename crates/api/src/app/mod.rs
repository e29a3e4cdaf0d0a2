//! Axum router and service wiring.
//!
//! - `services.rs`: shared stores and collaborators
//! - `checkout.rs`: the payment-captured trigger
//! - `routes/`: HTTP handlers, one file per area
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use tower::ServiceBuilder;

use crate::middleware::{self, AdminAuth};

pub mod checkout;
pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router.
pub fn build_app(services: Arc<AppServices>) -> Router {
    let admin_auth = AdminAuth {
        token: Arc::from(services.admin_token.as_str()),
    };

    let admin = routes::admin::router().layer(axum::middleware::from_fn_with_state(
        admin_auth,
        middleware::admin_middleware,
    ));

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/health/queue", get(routes::system::queue_health))
        .route("/payments/webhook", post(routes::payments::webhook))
        .route("/orders/:order_id", get(routes::orders::get_order))
        .nest("/admin", admin)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
