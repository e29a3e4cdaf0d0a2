use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dealerflow_core::{DealerId, DomainError, DomainResult, OrderId, PaymentId, ProductId, Sku, UserId};

/// Order status lifecycle.
///
/// `Confirmed -> Assigned -> Packed -> Shipped -> Delivered`, with `Cancelled`
/// reachable from any state before shipping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Confirmed,
    Assigned,
    Packed,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Confirmed, Assigned)
                | (Assigned, Packed)
                | (Packed, Shipped)
                | (Shipped, Delivered)
                | (Confirmed | Assigned | Packed, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Assigned => "assigned",
            OrderStatus::Packed => "packed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

/// Dealer-side status of one SKU mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStatus {
    Pending,
    Accepted,
    Rejected,
}

/// Per-line assignment progress. Durable across job attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AssignmentState {
    Unassigned,
    /// A decrement for `dealer_id` was sent, or is about to be, and its
    /// outcome is not recorded yet. The next run replays it with the same key.
    Reserving {
        dealer_id: DealerId,
        idempotency_key: String,
    },
    Assigned,
    Failed { reason: String },
}

impl AssignmentState {
    pub fn is_assigned(&self) -> bool {
        matches!(self, AssignmentState::Assigned)
    }

    /// Dealer and idempotency key of an unresolved reservation.
    pub fn reservation(&self) -> Option<(&DealerId, &str)> {
        match self {
            AssignmentState::Reserving {
                dealer_id,
                idempotency_key,
            } => Some((dealer_id, idempotency_key.as_str())),
            _ => None,
        }
    }
}

/// Dealer chosen for a line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealerRef {
    pub dealer_id: DealerId,
}

/// Order-level denormalized index entry: one per assigned SKU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealerMapping {
    pub sku: Sku,
    pub dealer_id: DealerId,
    pub status: MappingStatus,
}

/// Order line: SKU, quantity, pricing snapshot and assignment state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub sku: Sku,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    /// Price in smallest currency unit (e.g., paise).
    pub unit_price: u64,
    pub line_total: u64,
    pub dealer_mapped: Vec<DealerRef>,
    pub assignment: AssignmentState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTimestamps {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set once, on `Confirmed -> Assigned`.
    pub assigned_at: Option<DateTime<Utc>>,
    /// When the first dealer assignment job was enqueued.
    #[serde(default)]
    pub assignment_queued_at: Option<DateTime<Utc>>,
}

/// Input for one line of a new order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderLine {
    pub sku: Sku,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: u64,
}

/// Input for `Order::place`.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub payment_id: PaymentId,
    pub lines: Vec<NewOrderLine>,
    pub amount: u64,
    pub currency: String,
    pub notes: serde_json::Value,
    pub placed_at: DateTime<Utc>,
}

/// A paid order.
///
/// Created once by the payment trigger, then mutated by the assignment engine.
/// Stored as a whole document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    order_id: OrderId,
    user_id: UserId,
    payment_id: PaymentId,
    lines: Vec<OrderLine>,
    dealer_mapping: Vec<DealerMapping>,
    status: OrderStatus,
    amount: u64,
    currency: String,
    #[serde(default)]
    notes: serde_json::Value,
    timestamps: OrderTimestamps,
}

impl Order {
    /// Build a confirmed order with no dealer assignments.
    ///
    /// Lines sharing a SKU are merged; the same SKU pointing at two different
    /// products is rejected.
    pub fn place(cmd: PlaceOrder) -> DomainResult<Self> {
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("order must have at least one line"));
        }

        let mut lines: Vec<OrderLine> = Vec::with_capacity(cmd.lines.len());
        for new_line in cmd.lines {
            if new_line.quantity == 0 {
                return Err(DomainError::validation(format!(
                    "quantity for sku {} must be positive",
                    new_line.sku
                )));
            }

            if let Some(existing) = lines.iter_mut().find(|l| l.sku == new_line.sku) {
                if existing.product_id != new_line.product_id {
                    return Err(DomainError::validation(format!(
                        "sku {} maps to both {} and {}",
                        new_line.sku, existing.product_id, new_line.product_id
                    )));
                }
                existing.quantity = existing
                    .quantity
                    .checked_add(new_line.quantity)
                    .ok_or_else(|| DomainError::validation("quantity overflow"))?;
                existing.line_total = existing.unit_price.saturating_mul(existing.quantity as u64);
                continue;
            }

            lines.push(OrderLine {
                line_total: new_line.unit_price.saturating_mul(new_line.quantity as u64),
                sku: new_line.sku,
                product_id: new_line.product_id,
                product_name: new_line.product_name,
                quantity: new_line.quantity,
                unit_price: new_line.unit_price,
                dealer_mapped: Vec::new(),
                assignment: AssignmentState::Unassigned,
            });
        }

        Ok(Self {
            order_id: cmd.order_id,
            user_id: cmd.user_id,
            payment_id: cmd.payment_id,
            lines,
            dealer_mapping: Vec::new(),
            status: OrderStatus::Confirmed,
            amount: cmd.amount,
            currency: cmd.currency,
            notes: cmd.notes,
            timestamps: OrderTimestamps {
                created_at: cmd.placed_at,
                updated_at: cmd.placed_at,
                assigned_at: None,
                assignment_queued_at: None,
            },
        })
    }

    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn payment_id(&self) -> &PaymentId {
        &self.payment_id
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn dealer_mapping(&self) -> &[DealerMapping] {
        &self.dealer_mapping
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn notes(&self) -> &serde_json::Value {
        &self.notes
    }

    pub fn timestamps(&self) -> &OrderTimestamps {
        &self.timestamps
    }

    /// Indices of lines that still need a dealer (unassigned or failed earlier).
    pub fn pending_line_indices(&self) -> Vec<usize> {
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, l)| !l.assignment.is_assigned())
            .map(|(i, _)| i)
            .collect()
    }

    /// True while the order still waits for its first assignment job.
    pub fn awaiting_assignment_job(&self) -> bool {
        self.status == OrderStatus::Confirmed && self.timestamps.assignment_queued_at.is_none()
    }

    pub fn mark_assignment_queued(&mut self, at: DateTime<Utc>) {
        if self.timestamps.assignment_queued_at.is_none() {
            self.timestamps.assignment_queued_at = Some(at);
        }
        self.timestamps.updated_at = at;
    }

    /// Undo `mark_assignment_queued` after the enqueue itself failed.
    pub fn clear_assignment_queued(&mut self, at: DateTime<Utc>) {
        self.timestamps.assignment_queued_at = None;
        self.timestamps.updated_at = at;
    }

    /// Record the dealer and idempotency key about to be used for line
    /// `index`. Must be persisted before the decrement is sent.
    pub fn begin_reservation(
        &mut self,
        index: usize,
        dealer_id: DealerId,
        idempotency_key: impl Into<String>,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let line = self
            .lines
            .get_mut(index)
            .ok_or_else(|| DomainError::invariant(format!("no line at index {index}")))?;

        if line.assignment.is_assigned() {
            return Err(DomainError::invariant(format!(
                "sku {} is already assigned",
                line.sku
            )));
        }

        line.assignment = AssignmentState::Reserving {
            dealer_id,
            idempotency_key: idempotency_key.into(),
        };
        self.timestamps.updated_at = at;
        Ok(())
    }

    /// Bind line `index` to `dealer_id`.
    pub fn record_assignment(
        &mut self,
        index: usize,
        dealer_id: DealerId,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let line = self
            .lines
            .get_mut(index)
            .ok_or_else(|| DomainError::invariant(format!("no line at index {index}")))?;

        if line.assignment.is_assigned() {
            return Err(DomainError::invariant(format!(
                "sku {} is already assigned",
                line.sku
            )));
        }

        line.dealer_mapped.push(DealerRef {
            dealer_id: dealer_id.clone(),
        });
        line.assignment = AssignmentState::Assigned;
        self.dealer_mapping.push(DealerMapping {
            sku: line.sku.clone(),
            dealer_id,
            status: MappingStatus::Pending,
        });
        self.timestamps.updated_at = at;
        Ok(())
    }

    /// Record that line `index` could not be assigned on this attempt.
    pub fn mark_line_failed(
        &mut self,
        index: usize,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let line = self
            .lines
            .get_mut(index)
            .ok_or_else(|| DomainError::invariant(format!("no line at index {index}")))?;

        if line.assignment.is_assigned() {
            return Err(DomainError::invariant(format!(
                "sku {} is already assigned",
                line.sku
            )));
        }

        line.assignment = AssignmentState::Failed {
            reason: reason.into(),
        };
        self.timestamps.updated_at = at;
        Ok(())
    }

    /// Move to a new status, enforcing the lifecycle.
    pub fn transition_to(&mut self, next: OrderStatus, at: DateTime<Utc>) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::illegal_transition(format!(
                "{} -> {}",
                self.status.as_str(),
                next.as_str()
            )));
        }

        if next == OrderStatus::Assigned {
            if self.dealer_mapping.is_empty() {
                return Err(DomainError::invariant(
                    "cannot mark order assigned without dealer mappings",
                ));
            }
            if self.timestamps.assigned_at.is_none() {
                self.timestamps.assigned_at = Some(at);
            }
        }

        self.status = next;
        self.timestamps.updated_at = at;
        Ok(())
    }
}
