//! HTTP client for the inventory service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use dealerflow_assignment::{
    DealerAvailability, DecrementOutcome, DecrementRequest, InventoryError, InventoryService,
};
use dealerflow_core::{DealerId, ProductId};

use super::HttpClientError;

/// Listings come back either bare or wrapped in `{"data": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DealersResponse {
    Bare(Vec<DealerAvailability>),
    Wrapped { data: Vec<DealerAvailability> },
}

impl DealersResponse {
    fn into_dealers(self) -> Vec<DealerAvailability> {
        match self {
            DealersResponse::Bare(dealers) | DealersResponse::Wrapped { data: dealers } => dealers,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DecrementBody {
    decrement_by: u32,
}

fn transport(err: reqwest::Error) -> InventoryError {
    if err.is_timeout() {
        InventoryError::Timeout
    } else {
        InventoryError::Transport(err.to_string())
    }
}

async fn unexpected(response: reqwest::Response) -> InventoryError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    InventoryError::UnexpectedStatus { status, body }
}

/// Inventory service client. Every call is a fresh request; nothing is cached.
#[derive(Debug, Clone)]
pub struct HttpInventoryClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpInventoryClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, HttpClientError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HttpClientError::Build(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    fn dealers_url(&self, product_id: &ProductId) -> String {
        format!(
            "{}/products/v1/products/{}/availableDealers",
            self.base_url.trim_end_matches('/'),
            product_id
        )
    }
}

#[async_trait]
impl InventoryService for HttpInventoryClient {
    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn available_dealers(
        &self,
        product_id: &ProductId,
    ) -> Result<Vec<DealerAvailability>, InventoryError> {
        let response = self
            .client
            .get(self.dealers_url(product_id))
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(unexpected(response).await);
        }

        let body = response.bytes().await.map_err(transport)?;
        serde_json::from_slice::<DealersResponse>(&body)
            .map(DealersResponse::into_dealers)
            .map_err(|e| InventoryError::Decode(e.to_string()))
    }

    #[instrument(
        skip(self, request),
        fields(product_id = %product_id, dealer_id = %dealer_id, decrement_by = request.decrement_by),
        err
    )]
    async fn decrement_if_available(
        &self,
        product_id: &ProductId,
        dealer_id: &DealerId,
        request: &DecrementRequest,
    ) -> Result<DecrementOutcome, InventoryError> {
        let url = format!("{}/{}", self.dealers_url(product_id), dealer_id);
        let response = self
            .client
            .patch(url)
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&DecrementBody {
                decrement_by: request.decrement_by,
            })
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            StatusCode::CONFLICT => Ok(DecrementOutcome::InsufficientStock),
            status if status.is_success() => Ok(DecrementOutcome::Applied),
            _ => Err(unexpected(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::http::HeaderMap;
    use axum::routing::{get, patch};
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::*;

    #[derive(Default)]
    struct FakeInventory {
        stock: Mutex<HashMap<(String, String), i64>>,
        keys: Mutex<Vec<String>>,
    }

    async fn list(
        State(state): State<Arc<FakeInventory>>,
        Path(product_id): Path<String>,
    ) -> (StatusCode, Json<Value>) {
        match product_id.as_str() {
            "BROKEN" => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"message": "db down"}))),
            "GARBLED" => (StatusCode::OK, Json(json!({"unexpected": true}))),
            "SLOW" => {
                tokio::time::sleep(Duration::from_millis(500)).await;
                (StatusCode::OK, Json(json!([])))
            }
            _ => {
                let stock = state.stock.lock().unwrap();
                let dealers: Vec<Value> = stock
                    .iter()
                    .filter(|((p, _), _)| p == &product_id)
                    .map(|((_, d), q)| json!({"dealerId": d, "quantityAvailable": q, "priorityOverride": 1}))
                    .collect();
                if product_id == "WRAPPED" {
                    (StatusCode::OK, Json(json!({ "data": dealers })))
                } else {
                    (StatusCode::OK, Json(Value::Array(dealers)))
                }
            }
        }
    }

    async fn decrement(
        State(state): State<Arc<FakeInventory>>,
        Path((product_id, dealer_id)): Path<(String, String)>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> StatusCode {
        if let Some(key) = headers.get("idempotency-key").and_then(|v| v.to_str().ok()) {
            state.keys.lock().unwrap().push(key.to_string());
        }
        let by = body["decrementBy"].as_i64().unwrap_or(0);
        let mut stock = state.stock.lock().unwrap();
        match stock.get_mut(&(product_id, dealer_id)) {
            Some(q) if *q >= by => {
                *q -= by;
                StatusCode::OK
            }
            Some(_) => StatusCode::CONFLICT,
            None => StatusCode::NOT_FOUND,
        }
    }

    async fn spawn_fake(state: Arc<FakeInventory>) -> String {
        let app = Router::new()
            .route("/products/v1/products/:product_id/availableDealers", get(list))
            .route(
                "/products/v1/products/:product_id/availableDealers/:dealer_id",
                patch(decrement),
            )
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    fn seeded() -> Arc<FakeInventory> {
        let state = FakeInventory::default();
        {
            let mut stock = state.stock.lock().unwrap();
            stock.insert(("P1".to_string(), "D1".to_string()), 5);
            stock.insert(("WRAPPED".to_string(), "D2".to_string()), 7);
        }
        Arc::new(state)
    }

    fn client(base: String) -> HttpInventoryClient {
        HttpInventoryClient::new(base, Duration::from_millis(200)).unwrap()
    }

    fn request(by: u32) -> DecrementRequest {
        DecrementRequest {
            decrement_by: by,
            idempotency_key: "ORD-1:A1:D1".to_string(),
        }
    }

    #[tokio::test]
    async fn lists_bare_and_wrapped_responses() {
        let client = client(spawn_fake(seeded()).await);

        let dealers = client.available_dealers(&"P1".parse().unwrap()).await.unwrap();
        assert_eq!(dealers.len(), 1);
        assert_eq!(dealers[0].dealer_id.as_str(), "D1");
        assert_eq!(dealers[0].quantity_available, 5);
        assert_eq!(dealers[0].priority_override, 1);

        let dealers = client.available_dealers(&"WRAPPED".parse().unwrap()).await.unwrap();
        assert_eq!(dealers[0].quantity_available, 7);
    }

    #[tokio::test]
    async fn listing_errors_are_classified() {
        let client = client(spawn_fake(seeded()).await);

        let err = client.available_dealers(&"BROKEN".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, InventoryError::UnexpectedStatus { status: 500, .. }));

        let err = client.available_dealers(&"GARBLED".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, InventoryError::Decode(_)));

        let err = client.available_dealers(&"SLOW".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, InventoryError::Timeout));
    }

    #[tokio::test]
    async fn decrement_maps_status_codes() {
        let state = seeded();
        let client = client(spawn_fake(state.clone()).await);
        let p1: ProductId = "P1".parse().unwrap();
        let d1: DealerId = "D1".parse().unwrap();

        let out = client.decrement_if_available(&p1, &d1, &request(2)).await.unwrap();
        assert_eq!(out, DecrementOutcome::Applied);
        assert_eq!(state.stock.lock().unwrap()[&("P1".to_string(), "D1".to_string())], 3);
        assert_eq!(state.keys.lock().unwrap().as_slice(), ["ORD-1:A1:D1"]);

        let out = client.decrement_if_available(&p1, &d1, &request(10)).await.unwrap();
        assert_eq!(out, DecrementOutcome::InsufficientStock);

        let err = client
            .decrement_if_available(&p1, &"D404".parse().unwrap(), &request(1))
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::UnexpectedStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn unreachable_service_is_transport_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client(format!("http://{addr}"));
        let err = client.available_dealers(&"P1".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, InventoryError::Transport(_) | InventoryError::Timeout));
    }
}
