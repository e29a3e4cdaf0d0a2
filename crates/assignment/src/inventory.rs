//! Inventory port: which dealers stock a product, and taking stock from one.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use dealerflow_core::{DealerId, ProductId};

/// One dealer's stock of a product, as reported by the inventory service.
///
/// Read fresh on every attempt; never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealerAvailability {
    pub dealer_id: DealerId,
    pub quantity_available: i64,
    #[serde(default)]
    pub priority_override: i64,
}

/// Conditional decrement of a dealer's stock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecrementRequest {
    pub decrement_by: u32,
    /// Repeating a request with the same key must not take stock twice.
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecrementOutcome {
    Applied,
    /// The dealer no longer has `decrement_by` units; nothing was taken.
    InsufficientStock,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum InventoryError {
    #[error("inventory request failed: {0}")]
    Transport(String),
    #[error("inventory request timed out")]
    Timeout,
    #[error("inventory service returned {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("invalid inventory response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait InventoryService: Send + Sync {
    async fn available_dealers(
        &self,
        product_id: &ProductId,
    ) -> Result<Vec<DealerAvailability>, InventoryError>;

    /// Take `request.decrement_by` units from `dealer_id` only if that many are
    /// still available.
    async fn decrement_if_available(
        &self,
        product_id: &ProductId,
        dealer_id: &DealerId,
        request: &DecrementRequest,
    ) -> Result<DecrementOutcome, InventoryError>;
}

/// Decrement call observed by `InMemoryInventory`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecrementCall {
    pub product_id: ProductId,
    pub dealer_id: DealerId,
    pub decrement_by: u32,
    pub outcome: DecrementOutcome,
}

#[derive(Debug, Default)]
struct InventoryState {
    stock: HashMap<ProductId, Vec<DealerAvailability>>,
    applied_keys: HashSet<String>,
    calls: Vec<DecrementCall>,
    failing_lookups: HashSet<ProductId>,
    failing_decrements: HashSet<DealerId>,
}

/// In-memory inventory for tests/dev.
///
/// Decrements are atomic under the internal lock and deduplicated by
/// idempotency key.
#[derive(Debug, Default)]
pub struct InMemoryInventory {
    state: Mutex<InventoryState>,
}

impl InMemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the dealer list for `product_id`.
    pub fn set_dealers(&self, product_id: ProductId, dealers: Vec<DealerAvailability>) {
        self.state.lock().unwrap().stock.insert(product_id, dealers);
    }

    pub fn with_dealers(self, product_id: ProductId, dealers: Vec<DealerAvailability>) -> Self {
        self.set_dealers(product_id, dealers);
        self
    }

    /// Make lookups for `product_id` fail with a transport error.
    pub fn fail_lookups_for(&self, product_id: ProductId) {
        self.state.lock().unwrap().failing_lookups.insert(product_id);
    }

    /// Make decrements against `dealer_id` fail with a transport error.
    pub fn fail_decrements_for(&self, dealer_id: DealerId) {
        self.state.lock().unwrap().failing_decrements.insert(dealer_id);
    }

    /// Undo `fail_decrements_for`.
    pub fn restore_decrements_for(&self, dealer_id: &DealerId) {
        self.state.lock().unwrap().failing_decrements.remove(dealer_id);
    }

    pub fn quantity(&self, product_id: &ProductId, dealer_id: &DealerId) -> Option<i64> {
        let state = self.state.lock().unwrap();
        state
            .stock
            .get(product_id)?
            .iter()
            .find(|d| &d.dealer_id == dealer_id)
            .map(|d| d.quantity_available)
    }

    pub fn decrement_calls(&self) -> Vec<DecrementCall> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl InventoryService for InMemoryInventory {
    async fn available_dealers(
        &self,
        product_id: &ProductId,
    ) -> Result<Vec<DealerAvailability>, InventoryError> {
        let state = self.state.lock().unwrap();
        if state.failing_lookups.contains(product_id) {
            return Err(InventoryError::Transport(format!(
                "lookup for {product_id} unavailable"
            )));
        }
        Ok(state.stock.get(product_id).cloned().unwrap_or_default())
    }

    async fn decrement_if_available(
        &self,
        product_id: &ProductId,
        dealer_id: &DealerId,
        request: &DecrementRequest,
    ) -> Result<DecrementOutcome, InventoryError> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        if state.failing_decrements.contains(dealer_id) {
            return Err(InventoryError::Transport(format!(
                "decrement at {dealer_id} unavailable"
            )));
        }

        let outcome = if state.applied_keys.contains(&request.idempotency_key) {
            DecrementOutcome::Applied
        } else {
            let needed = i64::from(request.decrement_by);
            let record = state
                .stock
                .get_mut(product_id)
                .and_then(|dealers| dealers.iter_mut().find(|d| &d.dealer_id == dealer_id));

            match record {
                Some(record) if record.quantity_available >= needed => {
                    record.quantity_available -= needed;
                    state.applied_keys.insert(request.idempotency_key.clone());
                    DecrementOutcome::Applied
                }
                _ => DecrementOutcome::InsufficientStock,
            }
        };

        state.calls.push(DecrementCall {
            product_id: product_id.clone(),
            dealer_id: dealer_id.clone(),
            decrement_by: request.decrement_by,
            outcome,
        });
        Ok(outcome)
    }
}
