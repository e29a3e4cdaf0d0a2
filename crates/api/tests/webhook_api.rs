use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};

use dealerflow_api::app::{build_app, AppServices};
use dealerflow_api::signature;
use dealerflow_assignment::{AssignmentEngine, DealerAvailability, InMemoryInventory, NoopNotifier};
use dealerflow_core::{Sku, UserId};
use dealerflow_infra::config::AppConfig;
use dealerflow_infra::jobs::{InMemoryJobStore, JobExecutorHandle};
use dealerflow_infra::runtime::Stores;
use dealerflow_infra::workers::spawn_assignment_worker;
use dealerflow_orders::{Cart, CartItem, CartStore, InMemoryCartStore, InMemoryOrderStore, OrderStore};

const SECRET: &str = "whsec_test";
const ADMIN_TOKEN: &str = "admin-test-token";

struct TestServer {
    base_url: String,
    stores: Stores,
    jobs: Arc<InMemoryJobStore>,
    carts: Arc<InMemoryCartStore>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let jobs = InMemoryJobStore::arc();
        let carts = Arc::new(InMemoryCartStore::new());
        let stores = Stores {
            orders: Arc::new(InMemoryOrderStore::new()),
            carts: carts.clone(),
            jobs: jobs.clone(),
        };
        let services = Arc::new(AppServices::new(
            stores.clone(),
            Arc::new(NoopNotifier),
            SECRET,
            ADMIN_TOKEN,
        ));

        // Same router as prod, bound to an ephemeral port.
        let app = build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            stores,
            jobs,
            carts,
            handle,
        }
    }

    async fn seed_cart(&self, user: &str) {
        let cart = Cart::new(UserId::new(user).unwrap()).with_item(CartItem {
            sku: Sku::parse("a1").unwrap(),
            product_id: "P1".parse().unwrap(),
            product_name: "Brake pad".to_string(),
            quantity: 2,
            unit_price: 1500,
        });
        self.carts.put(&cart).await.unwrap();
    }

    fn start_worker(&self, inventory: InMemoryInventory) -> JobExecutorHandle {
        let mut config = AppConfig::from_lookup(|_| None).unwrap();
        config.worker_poll_interval = Duration::from_millis(10);
        let engine = AssignmentEngine::new(
            self.stores.orders.clone(),
            Arc::new(inventory),
            Arc::new(NoopNotifier),
        );
        spawn_assignment_worker(self.stores.jobs.clone(), Arc::new(engine), &config)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn captured(payment_id: &str, user: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "event": "payment.captured",
        "payload": {"payment": {"entity": {
            "id": payment_id,
            "amount": 3000,
            "currency": "INR",
            "notes": {"user_id": user}
        }}}
    }))
    .unwrap()
}

async fn post_webhook(
    client: &reqwest::Client,
    base_url: &str,
    body: Vec<u8>,
    signature: Option<String>,
) -> Value {
    let mut req = client
        .post(format!("{}/payments/webhook", base_url))
        .header("content-type", "application/json")
        .body(body);
    if let Some(sig) = signature {
        req = req.header(signature::SIGNATURE_HEADER, sig);
    }
    let res = req.send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    res.json().await.unwrap()
}

fn sign(body: &[u8]) -> Option<String> {
    signature::sign(SECRET.as_bytes(), body)
}

#[tokio::test]
async fn health_endpoints() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(format!("{}/health", server.base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .get(format!("{}/health/queue", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let counts: Value = res.json().await.unwrap();
    assert_eq!(
        counts,
        json!({"waiting": 0, "active": 0, "delayed": 0, "completed": 0, "failed": 0})
    );
}

#[tokio::test]
async fn bad_signature_is_acknowledged_but_ignored() {
    let server = TestServer::spawn().await;
    server.seed_cart("U1").await;
    let client = reqwest::Client::new();
    let body = captured("pay_1", "U1");

    let ack = post_webhook(&client, &server.base_url, body.clone(), Some("deadbeef".to_string())).await;
    assert_eq!(ack, json!({"status": "ok"}));

    let ack = post_webhook(&client, &server.base_url, body, None).await;
    assert_eq!(ack, json!({"status": "ok"}));

    assert!(server.jobs.snapshot().is_empty());
    let cart = server.carts.get(&UserId::new("U1").unwrap()).await.unwrap().unwrap();
    assert!(!cart.is_empty());
}

#[tokio::test]
async fn signed_but_malformed_body_is_acknowledged_but_ignored() {
    let server = TestServer::spawn().await;
    server.seed_cart("U1").await;
    let client = reqwest::Client::new();

    let mut truncated = captured("pay_1", "U1");
    truncated.truncate(truncated.len() / 2);
    let wrong_shape = serde_json::to_vec(&json!({"event": 42, "payload": []})).unwrap();

    for body in [truncated, wrong_shape, b"not json".to_vec()] {
        let ack = post_webhook(&client, &server.base_url, body.clone(), sign(&body)).await;
        assert_eq!(ack, json!({"status": "ok"}));
    }

    assert!(server.jobs.snapshot().is_empty());
    assert!(server
        .stores
        .orders
        .find_by_payment_id(&"pay_1".parse().unwrap())
        .await
        .unwrap()
        .is_none());
    let cart = server.carts.get(&UserId::new("U1").unwrap()).await.unwrap().unwrap();
    assert!(!cart.is_empty());
}

#[tokio::test]
async fn valid_webhook_creates_one_order_and_one_job() {
    let server = TestServer::spawn().await;
    server.seed_cart("U1").await;
    let client = reqwest::Client::new();
    let body = captured("pay_1", "U1");

    let ack = post_webhook(&client, &server.base_url, body.clone(), sign(&body)).await;
    assert_eq!(ack, json!({"status": "ok"}));

    let jobs = server.jobs.snapshot();
    assert_eq!(jobs.len(), 1);
    let order_id = jobs[0].payload["order_id"].as_str().unwrap().to_string();
    assert!(order_id.starts_with("ORD-"));

    let cart = server.carts.get(&UserId::new("U1").unwrap()).await.unwrap().unwrap();
    assert!(cart.is_empty());

    let res = client
        .get(format!("{}/orders/{}", server.base_url, order_id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let order: Value = res.json().await.unwrap();
    assert_eq!(order["status"], "confirmed");
    assert_eq!(order["dealer_mapping"], json!([]));
    assert_eq!(order["lines"][0]["sku"], "A1");

    // Replayed delivery: still one order, one job.
    let ack = post_webhook(&client, &server.base_url, body.clone(), sign(&body)).await;
    assert_eq!(ack, json!({"status": "ok"}));
    assert_eq!(server.jobs.snapshot().len(), 1);
}

#[tokio::test]
async fn other_events_are_ignored() {
    let server = TestServer::spawn().await;
    server.seed_cart("U1").await;
    let client = reqwest::Client::new();
    let body = serde_json::to_vec(&json!({"event": "payment.failed", "payload": {}})).unwrap();

    let ack = post_webhook(&client, &server.base_url, body.clone(), sign(&body)).await;
    assert_eq!(ack, json!({"status": "ok"}));
    assert!(server.jobs.snapshot().is_empty());
}

#[tokio::test]
async fn unknown_order_is_404() {
    let server = TestServer::spawn().await;
    let res = reqwest::Client::new()
        .get(format!("{}/orders/ORD-20260101-DEADBEEF", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_routes_require_token() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let url = format!("{}/admin/jobs/failed", server.base_url);

    let res = client.get(&url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client.get(&url).bearer_auth("wrong").send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client.get(&url).bearer_auth(ADMIN_TOKEN).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let failed: Value = res.json().await.unwrap();
    assert_eq!(failed, json!([]));
}

#[tokio::test]
async fn admin_reassign_and_retry() {
    let server = TestServer::spawn().await;
    server.seed_cart("U1").await;
    let client = reqwest::Client::new();
    let body = captured("pay_1", "U1");
    post_webhook(&client, &server.base_url, body.clone(), sign(&body)).await;
    let order_id = server.jobs.snapshot()[0].payload["order_id"]
        .as_str()
        .unwrap()
        .to_string();

    let res = client
        .post(format!("{}/admin/orders/{}/reassign", server.base_url, order_id))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let queued: Value = res.json().await.unwrap();
    assert!(queued["job_id"].is_string());
    assert_eq!(server.jobs.snapshot().len(), 2);

    let res = client
        .post(format!("{}/admin/orders/ORD-20260101-DEADBEEF/reassign", server.base_url))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // A queued job is not in the failed set.
    let job_id = server.jobs.snapshot()[0].id;
    let res = client
        .post(format!("{}/admin/jobs/{}/retry", server.base_url, job_id))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = client
        .post(format!("{}/admin/jobs/not-a-uuid/retry", server.base_url))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn paid_order_is_assigned_end_to_end() {
    let server = TestServer::spawn().await;
    server.seed_cart("U1").await;
    let inventory = InMemoryInventory::new().with_dealers(
        "P1".parse().unwrap(),
        vec![
            DealerAvailability {
                dealer_id: "D1".parse().unwrap(),
                quantity_available: 5,
                priority_override: 1,
            },
            DealerAvailability {
                dealer_id: "D2".parse().unwrap(),
                quantity_available: 10,
                priority_override: 2,
            },
        ],
    );
    let worker = server.start_worker(inventory);
    let client = reqwest::Client::new();

    let body = captured("pay_1", "U1");
    post_webhook(&client, &server.base_url, body.clone(), sign(&body)).await;
    let order_id = server.jobs.snapshot()[0].payload["order_id"]
        .as_str()
        .unwrap()
        .to_string();

    let mut order = Value::Null;
    for _ in 0..200 {
        let res = client
            .get(format!("{}/orders/{}", server.base_url, order_id))
            .send()
            .await
            .unwrap();
        order = res.json().await.unwrap();
        if order["status"] == "assigned" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(order["status"], "assigned");
    assert_eq!(order["dealer_mapping"][0]["sku"], "A1");
    assert_eq!(order["dealer_mapping"][0]["dealer_id"], "D2");
    assert_eq!(order["dealer_mapping"][0]["status"], "pending");

    worker.shutdown().await;
}
