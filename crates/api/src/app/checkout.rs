//! Payment-captured trigger: turn the buyer's cart into a confirmed order and
//! queue its dealer assignment.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{error, info, instrument, warn};

use dealerflow_assignment::{notify_best_effort, Audience, Notification};
use dealerflow_core::{DomainError, OrderId, PaymentId, UserId};
use dealerflow_infra::jobs::{JobId, JobStoreError};
use dealerflow_infra::workers::enqueue_dealer_assignment;
use dealerflow_orders::{Order, PlaceOrder, StoreError};

use super::dto::PaymentEntity;
use super::services::AppServices;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Created { order_id: OrderId, job_id: JobId },
    /// An order already exists for this payment.
    Duplicate { order_id: OrderId },
    /// An order already existed but its assignment job was never queued.
    Requeued { order_id: OrderId, job_id: JobId },
    EmptyCart { user_id: UserId },
}

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("payment carries no buyer id in notes")]
    MissingBuyer,
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("order {order_id} saved but enqueue failed: {source}")]
    Queue {
        order_id: OrderId,
        #[source]
        source: JobStoreError,
    },
}

fn buyer_id(notes: &serde_json::Value) -> Result<UserId, TriggerError> {
    let raw = notes
        .get("user_id")
        .or_else(|| notes.get("userId"))
        .and_then(|v| v.as_str())
        .ok_or(TriggerError::MissingBuyer)?;
    Ok(UserId::new(raw)?)
}

/// Enqueue the assignment job for an order already saved as queued.
///
/// On failure the queued stamp is cleared again so a replay of the payment
/// retries the enqueue.
async fn enqueue_or_release(
    services: &AppServices,
    order: &mut Order,
    now: DateTime<Utc>,
) -> Result<JobId, TriggerError> {
    let stores = &services.stores;
    match enqueue_dealer_assignment(stores.jobs.as_ref(), order.order_id()).await {
        Ok(job_id) => Ok(job_id),
        Err(source) => {
            order.clear_assignment_queued(now);
            if let Err(err) = stores.orders.save(order).await {
                error!(order_id = %order.order_id(), error = %err, "order left marked as queued without a job");
            }
            Err(TriggerError::Queue {
                order_id: order.order_id().clone(),
                source,
            })
        }
    }
}

/// Create the order for a captured payment and enqueue one assignment job.
///
/// Replays of the same payment are detected by payment id and create nothing,
/// unless the earlier delivery saved the order but never queued its job.
#[instrument(skip(services, payment, now), fields(payment_id = %payment.id), err)]
pub async fn on_payment_captured(
    services: &AppServices,
    payment: &PaymentEntity,
    now: DateTime<Utc>,
) -> Result<TriggerOutcome, TriggerError> {
    let stores = &services.stores;
    let payment_id = PaymentId::new(payment.id.as_str())?;

    if let Some(mut existing) = stores.orders.find_by_payment_id(&payment_id).await? {
        let order_id = existing.order_id().clone();
        if existing.awaiting_assignment_job() {
            existing.mark_assignment_queued(now);
            stores.orders.save(&existing).await?;
            let job_id = enqueue_or_release(services, &mut existing, now).await?;
            info!(order_id = %order_id, job_id = %job_id, "assignment job queued on replay");
            return Ok(TriggerOutcome::Requeued { order_id, job_id });
        }
        info!(order_id = %order_id, "payment already processed");
        return Ok(TriggerOutcome::Duplicate { order_id });
    }

    let user_id = buyer_id(&payment.notes)?;
    let cart = match stores.carts.get(&user_id).await? {
        Some(cart) if !cart.is_empty() => cart,
        _ => {
            warn!(user_id = %user_id, "cart is empty; no order created");
            return Ok(TriggerOutcome::EmptyCart { user_id });
        }
    };

    let mut order = Order::place(PlaceOrder {
        order_id: OrderId::generate(now),
        user_id: user_id.clone(),
        payment_id: payment_id.clone(),
        lines: cart.to_order_lines(),
        amount: payment.amount,
        currency: payment.currency.clone().unwrap_or_else(|| "INR".to_string()),
        notes: payment.notes.clone(),
        placed_at: now,
    })?;
    order.mark_assignment_queued(now);
    let order_id = order.order_id().clone();

    match stores.orders.save(&order).await {
        Ok(()) => {}
        Err(StoreError::Conflict(reason)) => {
            // Lost a race with a concurrent delivery of the same payment.
            info!(%reason, "payment already processed concurrently");
            let existing = stores.orders.find_by_payment_id(&payment_id).await?;
            return Ok(TriggerOutcome::Duplicate {
                order_id: existing.map(|o| o.order_id().clone()).unwrap_or(order_id),
            });
        }
        Err(err) => return Err(err.into()),
    }

    if let Err(err) = stores.carts.clear(&user_id).await {
        warn!(user_id = %user_id, error = %err, "failed to clear cart");
    }

    let job_id = enqueue_or_release(services, &mut order, now).await?;
    info!(order_id = %order_id, job_id = %job_id, lines = order.lines().len(), "order created");

    let data = json!({ "order_id": order_id, "amount": order.amount() });
    notify_best_effort(
        services.notifier.as_ref(),
        Notification::new(
            Audience::User(user_id),
            "Order confirmed",
            format!("Your order {order_id} has been placed."),
        )
        .with_data(data.clone()),
    )
    .await;
    notify_best_effort(
        services.notifier.as_ref(),
        Notification::new(
            Audience::Admins,
            "New order",
            format!("Order {order_id} was placed."),
        )
        .with_data(data),
    )
    .await;

    Ok(TriggerOutcome::Created { order_id, job_id })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use dealerflow_assignment::RecordingNotifier;
    use dealerflow_core::{ProductId, Sku};
    use dealerflow_infra::jobs::{InMemoryJobStore, Job, JobStatus, JobStore, QueueCounts};
    use dealerflow_infra::runtime::Stores;
    use dealerflow_orders::{
        AssignmentState, Cart, CartItem, CartStore, InMemoryCartStore, InMemoryOrderStore,
        OrderStatus,
    };

    use super::*;

    struct Fixture {
        services: AppServices,
        jobs: Arc<InMemoryJobStore>,
        notifier: Arc<RecordingNotifier>,
    }

    async fn fixture(notifier: RecordingNotifier) -> Fixture {
        let jobs = InMemoryJobStore::arc();
        fixture_with_queue(notifier, jobs.clone(), jobs).await
    }

    async fn fixture_with_queue(
        notifier: RecordingNotifier,
        queue: Arc<dyn JobStore>,
        jobs: Arc<InMemoryJobStore>,
    ) -> Fixture {
        let carts = Arc::new(InMemoryCartStore::new());
        let cart = Cart::new(UserId::new("U1").unwrap()).with_item(CartItem {
            sku: Sku::parse("a1").unwrap(),
            product_id: ProductId::new("P1").unwrap(),
            product_name: "Brake pad".to_string(),
            quantity: 2,
            unit_price: 1500,
        });
        carts.put(&cart).await.unwrap();

        let notifier = Arc::new(notifier);
        let stores = Stores {
            orders: Arc::new(InMemoryOrderStore::new()),
            carts,
            jobs: queue,
        };
        Fixture {
            services: AppServices::new(stores, notifier.clone(), "secret", "admin"),
            jobs,
            notifier,
        }
    }

    fn payment(id: &str, notes: serde_json::Value) -> PaymentEntity {
        PaymentEntity {
            id: id.to_string(),
            amount: 3000,
            currency: Some("INR".to_string()),
            notes,
        }
    }

    #[tokio::test]
    async fn captured_payment_creates_order_and_job() {
        let fx = fixture(RecordingNotifier::new()).await;

        let outcome = on_payment_captured(&fx.services, &payment("pay_1", json!({"user_id": "U1"})), Utc::now())
            .await
            .unwrap();
        let (order_id, job_id) = match outcome {
            TriggerOutcome::Created { order_id, job_id } => (order_id, job_id),
            other => panic!("expected Created, got {other:?}"),
        };

        let order = fx.services.stores.orders.find_by_id(&order_id).await.unwrap().unwrap();
        assert_eq!(order.status(), OrderStatus::Confirmed);
        assert!(order.dealer_mapping().is_empty());
        assert_eq!(order.lines().len(), 1);
        assert_eq!(order.lines()[0].sku.as_str(), "A1");
        assert_eq!(order.lines()[0].assignment, AssignmentState::Unassigned);
        assert!(order.lines()[0].dealer_mapped.is_empty());
        assert!(!order.awaiting_assignment_job());

        let jobs = fx.jobs.snapshot();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, job_id);
        assert_eq!(jobs[0].status, JobStatus::Pending);
        assert_eq!(jobs[0].payload["order_id"], order_id.as_str());
        assert_eq!(jobs[0].retry_policy.max_attempts, 5);

        let cart = fx.services.stores.carts.get(&UserId::new("U1").unwrap()).await.unwrap();
        assert!(cart.map_or(true, |c| c.is_empty()));

        let sent = fx.notifier.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].audience, Audience::User(UserId::new("U1").unwrap()));
        assert_eq!(sent[1].audience, Audience::Admins);
    }

    #[tokio::test]
    async fn replayed_payment_is_a_duplicate() {
        let fx = fixture(RecordingNotifier::new()).await;
        let pay = payment("pay_1", json!({"userId": "U1"}));

        let first = on_payment_captured(&fx.services, &pay, Utc::now()).await.unwrap();
        let second = on_payment_captured(&fx.services, &pay, Utc::now()).await.unwrap();

        let order_id = match first {
            TriggerOutcome::Created { order_id, .. } => order_id,
            other => panic!("expected Created, got {other:?}"),
        };
        assert_eq!(second, TriggerOutcome::Duplicate { order_id });
        assert_eq!(fx.jobs.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn empty_cart_creates_nothing() {
        let fx = fixture(RecordingNotifier::new()).await;
        fx.services.stores.carts.clear(&UserId::new("U1").unwrap()).await.unwrap();

        let outcome = on_payment_captured(&fx.services, &payment("pay_1", json!({"user_id": "U1"})), Utc::now())
            .await
            .unwrap();
        assert!(matches!(outcome, TriggerOutcome::EmptyCart { .. }));
        assert!(fx.jobs.snapshot().is_empty());

        let outcome = on_payment_captured(&fx.services, &payment("pay_2", json!({"user_id": "U9"})), Utc::now())
            .await
            .unwrap();
        assert!(matches!(outcome, TriggerOutcome::EmptyCart { .. }));
    }

    #[tokio::test]
    async fn missing_buyer_is_an_error() {
        let fx = fixture(RecordingNotifier::new()).await;
        let err = on_payment_captured(&fx.services, &payment("pay_1", json!({})), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, TriggerError::MissingBuyer));
    }

    #[tokio::test]
    async fn notifier_failure_does_not_fail_checkout() {
        let fx = fixture(RecordingNotifier::failing()).await;
        let outcome = on_payment_captured(&fx.services, &payment("pay_1", json!({"user_id": "U1"})), Utc::now())
            .await
            .unwrap();
        assert!(matches!(outcome, TriggerOutcome::Created { .. }));
    }

    /// Rejects enqueues while `down` is set; everything else goes to the inner store.
    struct OutageQueue {
        inner: Arc<InMemoryJobStore>,
        down: AtomicBool,
    }

    #[async_trait]
    impl JobStore for OutageQueue {
        async fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(JobStoreError::Storage("connection refused".to_string()));
            }
            self.inner.enqueue(job).await
        }

        async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
            self.inner.get(job_id).await
        }

        async fn claim_next(&self, lease: Duration) -> Result<Option<Job>, JobStoreError> {
            self.inner.claim_next(lease).await
        }

        async fn extend_lease(&self, job_id: JobId, lease: Duration) -> Result<(), JobStoreError> {
            self.inner.extend_lease(job_id, lease).await
        }

        async fn complete(&self, job: &Job) -> Result<(), JobStoreError> {
            self.inner.complete(job).await
        }

        async fn schedule_retry(&self, job: &Job) -> Result<(), JobStoreError> {
            self.inner.schedule_retry(job).await
        }

        async fn fail(&self, job: &Job) -> Result<(), JobStoreError> {
            self.inner.fail(job).await
        }

        async fn recover_stalled(&self) -> Result<usize, JobStoreError> {
            self.inner.recover_stalled().await
        }

        async fn list_failed(&self, limit: usize) -> Result<Vec<Job>, JobStoreError> {
            self.inner.list_failed(limit).await
        }

        async fn retry_failed(&self, job_id: JobId) -> Result<Job, JobStoreError> {
            self.inner.retry_failed(job_id).await
        }

        async fn remove_failed(&self, job_id: JobId) -> Result<(), JobStoreError> {
            self.inner.remove_failed(job_id).await
        }

        async fn counts(&self) -> Result<QueueCounts, JobStoreError> {
            self.inner.counts().await
        }
    }

    #[tokio::test]
    async fn replay_queues_the_job_a_failed_enqueue_left_out() {
        let jobs = InMemoryJobStore::arc();
        let queue = Arc::new(OutageQueue {
            inner: jobs.clone(),
            down: AtomicBool::new(true),
        });
        let fx = fixture_with_queue(RecordingNotifier::new(), queue.clone(), jobs).await;
        let pay = payment("pay_1", json!({"user_id": "U1"}));

        let err = on_payment_captured(&fx.services, &pay, Utc::now()).await.unwrap_err();
        let order_id = match err {
            TriggerError::Queue { order_id, .. } => order_id,
            other => panic!("expected Queue, got {other:?}"),
        };
        let saved = fx.services.stores.orders.find_by_id(&order_id).await.unwrap().unwrap();
        assert!(saved.awaiting_assignment_job());
        assert!(fx.jobs.snapshot().is_empty());

        queue.down.store(false, Ordering::SeqCst);
        let replay = on_payment_captured(&fx.services, &pay, Utc::now()).await.unwrap();
        let job_id = match replay {
            TriggerOutcome::Requeued { order_id: id, job_id } => {
                assert_eq!(id, order_id);
                job_id
            }
            other => panic!("expected Requeued, got {other:?}"),
        };
        let jobs = fx.jobs.snapshot();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, job_id);
        assert_eq!(jobs[0].payload["order_id"], order_id.as_str());

        let again = on_payment_captured(&fx.services, &pay, Utc::now()).await.unwrap();
        assert_eq!(again, TriggerOutcome::Duplicate { order_id });
        assert_eq!(fx.jobs.snapshot().len(), 1);
    }
}
