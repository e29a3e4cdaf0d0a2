//! Dealer assignment engine.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use dealerflow_core::{DealerId, OrderId, Sku};
use dealerflow_orders::{Order, OrderStatus, OrderStore};

use crate::error::AssignmentError;
use crate::inventory::{DecrementOutcome, DecrementRequest, InventoryService};
use crate::notify::{notify_best_effort, Audience, Notification, Notifier};
use crate::selection::rank_candidates;

/// What one engine run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignmentReport {
    pub order_id: OrderId,
    pub status: OrderStatus,
    /// Lines bound to a dealer during this run.
    pub assigned: Vec<(Sku, DealerId)>,
    /// Lines still without a dealer after this run.
    pub unassigned: Vec<Sku>,
}

enum LineOutcome {
    Assigned(DealerId),
    Unassigned(String),
    /// The decrement outcome is unknown; the line keeps its reservation.
    Uncertain(String),
}

fn idempotency_key(order_id: &OrderId, sku: &Sku, dealer_id: &DealerId) -> String {
    format!("{order_id}:{sku}:{dealer_id}")
}

/// Assigns every line of an order to a fulfilling dealer.
///
/// Lines are processed one at a time. A line that fails (lookup error, no
/// eligible dealer) is marked `Failed` and the run moves on; only order
/// load/save errors fail the run. Lines already `Assigned` by an earlier run
/// are skipped.
///
/// The chosen dealer and idempotency key are saved on the line before each
/// decrement. A later run replays that reservation first, so a lost save or an
/// unknown decrement outcome never takes stock at a second dealer.
pub struct AssignmentEngine {
    orders: Arc<dyn OrderStore>,
    inventory: Arc<dyn InventoryService>,
    notifier: Arc<dyn Notifier>,
}

impl AssignmentEngine {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        inventory: Arc<dyn InventoryService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            orders,
            inventory,
            notifier,
        }
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub async fn assign(&self, order_id: &OrderId) -> Result<AssignmentReport, AssignmentError> {
        let mut order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| AssignmentError::OrderNotFound(order_id.clone()))?;

        let pending = order.pending_line_indices();
        if pending.is_empty() {
            debug!("every line already has a dealer");
        }

        let mut assigned = Vec::new();
        for index in pending {
            let sku = order.lines()[index].sku.clone();
            match self.assign_line(&mut order, index).await? {
                LineOutcome::Assigned(dealer_id) => {
                    order.record_assignment(index, dealer_id.clone(), Utc::now())?;
                    self.orders.save(&order).await?;
                    info!(sku = %sku, dealer_id = %dealer_id, "sku assigned");
                    assigned.push((sku, dealer_id));
                }
                LineOutcome::Unassigned(reason) => {
                    order.mark_line_failed(index, reason, Utc::now())?;
                }
                LineOutcome::Uncertain(reason) => {
                    warn!(sku = %sku, %reason, "reservation left for the next run");
                }
            }
        }

        let became_assigned =
            order.status() == OrderStatus::Confirmed && !order.dealer_mapping().is_empty();
        if became_assigned {
            order.transition_to(OrderStatus::Assigned, Utc::now())?;
        }

        self.orders.save(&order).await?;

        let unassigned: Vec<Sku> = order
            .lines()
            .iter()
            .filter(|l| !l.assignment.is_assigned())
            .map(|l| l.sku.clone())
            .collect();

        if unassigned.is_empty() {
            info!(status = order.status().as_str(), "order fully assigned");
        } else {
            warn!(
                status = order.status().as_str(),
                unassigned = unassigned.len(),
                "order has lines without a dealer"
            );
        }

        self.send_notifications(&order, &assigned, &unassigned, became_assigned)
            .await;

        Ok(AssignmentReport {
            order_id: order.order_id().clone(),
            status: order.status(),
            assigned,
            unassigned,
        })
    }

    async fn assign_line(
        &self,
        order: &mut Order,
        index: usize,
    ) -> Result<LineOutcome, AssignmentError> {
        let line = order.lines()[index].clone();

        let mut rejected = None;
        if let Some((dealer_id, key)) = line.assignment.reservation() {
            let request = DecrementRequest {
                decrement_by: line.quantity,
                idempotency_key: key.to_string(),
            };
            match self
                .inventory
                .decrement_if_available(&line.product_id, dealer_id, &request)
                .await
            {
                Ok(DecrementOutcome::Applied) => {
                    info!(sku = %line.sku, dealer_id = %dealer_id, "earlier reservation confirmed");
                    return Ok(LineOutcome::Assigned(dealer_id.clone()));
                }
                Ok(DecrementOutcome::InsufficientStock) => {
                    info!(sku = %line.sku, dealer_id = %dealer_id, "earlier reservation was not applied");
                    rejected = Some(dealer_id.clone());
                }
                Err(err) => {
                    warn!(sku = %line.sku, dealer_id = %dealer_id, error = %err, "reservation replay failed");
                    return Ok(LineOutcome::Uncertain(format!("stock decrement failed: {err}")));
                }
            }
        }

        let dealers = match self.inventory.available_dealers(&line.product_id).await {
            Ok(dealers) => dealers,
            Err(err) => {
                warn!(sku = %line.sku, product_id = %line.product_id, error = %err, "dealer lookup failed");
                return Ok(LineOutcome::Unassigned(format!("dealer lookup failed: {err}")));
            }
        };

        let candidates: Vec<_> = rank_candidates(dealers, line.quantity)
            .into_iter()
            .filter(|c| rejected.as_ref() != Some(&c.dealer_id))
            .collect();
        if candidates.is_empty() {
            info!(sku = %line.sku, product_id = %line.product_id, quantity = line.quantity, "no eligible dealer");
            return Ok(LineOutcome::Unassigned("no eligible dealer".to_string()));
        }

        for candidate in candidates {
            let request = DecrementRequest {
                decrement_by: line.quantity,
                idempotency_key: idempotency_key(order.order_id(), &line.sku, &candidate.dealer_id),
            };

            order.begin_reservation(
                index,
                candidate.dealer_id.clone(),
                request.idempotency_key.clone(),
                Utc::now(),
            )?;
            self.orders.save(order).await?;

            match self
                .inventory
                .decrement_if_available(&line.product_id, &candidate.dealer_id, &request)
                .await
            {
                Ok(DecrementOutcome::Applied) => return Ok(LineOutcome::Assigned(candidate.dealer_id)),
                Ok(DecrementOutcome::InsufficientStock) => {
                    debug!(
                        sku = %line.sku,
                        dealer_id = %candidate.dealer_id,
                        "stock gone at decrement time, trying next candidate"
                    );
                }
                Err(err) => {
                    warn!(
                        sku = %line.sku,
                        dealer_id = %candidate.dealer_id,
                        error = %err,
                        "stock decrement failed"
                    );
                    return Ok(LineOutcome::Uncertain(format!("stock decrement failed: {err}")));
                }
            }
        }

        Ok(LineOutcome::Unassigned("every candidate ran out of stock".to_string()))
    }

    async fn send_notifications(
        &self,
        order: &Order,
        assigned: &[(Sku, DealerId)],
        unassigned: &[Sku],
        became_assigned: bool,
    ) {
        for (sku, dealer_id) in assigned {
            let quantity = order
                .lines()
                .iter()
                .find(|l| &l.sku == sku)
                .map(|l| l.quantity)
                .unwrap_or_default();
            let notification = Notification::new(
                Audience::Dealer(dealer_id.clone()),
                "New order assigned",
                format!("Order {}: {} x {}", order.order_id(), quantity, sku),
            )
            .with_data(serde_json::json!({
                "order_id": order.order_id(),
                "sku": sku,
                "quantity": quantity,
            }));
            notify_best_effort(self.notifier.as_ref(), notification).await;
        }

        if became_assigned {
            let notification = Notification::new(
                Audience::User(order.user_id().clone()),
                "Order assigned",
                format!("Your order {} has been assigned to a dealer", order.order_id()),
            )
            .with_data(serde_json::json!({ "order_id": order.order_id() }));
            notify_best_effort(self.notifier.as_ref(), notification).await;
        }

        if !unassigned.is_empty() {
            let notification = Notification::new(
                Audience::Admins,
                "Order needs dealer assignment",
                format!(
                    "Order {} has {} unassigned line(s)",
                    order.order_id(),
                    unassigned.len()
                ),
            )
            .with_data(serde_json::json!({
                "order_id": order.order_id(),
                "skus": unassigned,
            }));
            notify_best_effort(self.notifier.as_ref(), notification).await;
        }
    }
}
