use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::Extension,
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::app::checkout::{self, TriggerOutcome};
use crate::app::dto::WebhookEvent;
use crate::app::services::AppServices;
use crate::signature::{self, SIGNATURE_HEADER};

fn ok() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Payment gateway webhook. Always answers 200 `{"status":"ok"}`; problems are
/// logged, never reported back to the gateway.
pub async fn webhook(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    let Some(sig) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        warn!("webhook rejected: missing signature header");
        return ok();
    };
    if !signature::verify(services.webhook_secret.as_bytes(), &body, sig) {
        warn!("webhook rejected: signature mismatch");
        return ok();
    }

    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "webhook rejected: malformed body");
            return ok();
        }
    };

    if event.event != WebhookEvent::PAYMENT_CAPTURED {
        info!(event = %event.event, "webhook event ignored");
        return ok();
    }
    let Some(payment) = event.payment() else {
        warn!("payment.captured without payment entity");
        return ok();
    };

    match checkout::on_payment_captured(&services, payment, Utc::now()).await {
        Ok(TriggerOutcome::Created { order_id, job_id }) => {
            info!(order_id = %order_id, job_id = %job_id, "dealer assignment queued");
        }
        Ok(TriggerOutcome::Requeued { order_id, job_id }) => {
            info!(order_id = %order_id, job_id = %job_id, "dealer assignment queued on redelivery");
        }
        Ok(TriggerOutcome::Duplicate { order_id }) => {
            info!(order_id = %order_id, "duplicate webhook delivery");
        }
        Ok(TriggerOutcome::EmptyCart { user_id }) => {
            info!(user_id = %user_id, "nothing to order");
        }
        Err(e) => {
            error!(payment_id = %payment.id, error = %e, "failed to process captured payment");
        }
    }

    ok()
}
