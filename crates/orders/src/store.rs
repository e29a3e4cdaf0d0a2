//! Storage ports for orders and carts, plus in-memory implementations for
//! tests and single-process dev runs.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use dealerflow_core::{OrderId, PaymentId, UserId};

use crate::cart::Cart;
use crate::order::Order;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Order document store.
///
/// `save` is a whole-document upsert keyed by order id.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_by_id(&self, order_id: &OrderId) -> Result<Option<Order>, StoreError>;

    async fn find_by_payment_id(&self, payment_id: &PaymentId) -> Result<Option<Order>, StoreError>;

    async fn save(&self, order: &Order) -> Result<(), StoreError>;
}

/// Buyer cart store.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn get(&self, user_id: &UserId) -> Result<Option<Cart>, StoreError>;

    async fn put(&self, cart: &Cart) -> Result<(), StoreError>;

    async fn clear(&self, user_id: &UserId) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<OrderId, Order>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn find_by_id(&self, order_id: &OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.read().unwrap().get(order_id).cloned())
    }

    async fn find_by_payment_id(&self, payment_id: &PaymentId) -> Result<Option<Order>, StoreError> {
        let orders = self.orders.read().unwrap();
        Ok(orders
            .values()
            .find(|o| o.payment_id() == payment_id)
            .cloned())
    }

    async fn save(&self, order: &Order) -> Result<(), StoreError> {
        let mut orders = self.orders.write().unwrap();

        // payment_id is unique across orders
        if let Some(other) = orders
            .values()
            .find(|o| o.payment_id() == order.payment_id() && o.order_id() != order.order_id())
        {
            return Err(StoreError::Conflict(format!(
                "payment {} already belongs to order {}",
                order.payment_id(),
                other.order_id()
            )));
        }

        orders.insert(order.order_id().clone(), order.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCartStore {
    carts: RwLock<HashMap<UserId, Cart>>,
}

impl InMemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn get(&self, user_id: &UserId) -> Result<Option<Cart>, StoreError> {
        Ok(self.carts.read().unwrap().get(user_id).cloned())
    }

    async fn put(&self, cart: &Cart) -> Result<(), StoreError> {
        self.carts
            .write()
            .unwrap()
            .insert(cart.user_id.clone(), cart.clone());
        Ok(())
    }

    async fn clear(&self, user_id: &UserId) -> Result<(), StoreError> {
        if let Some(cart) = self.carts.write().unwrap().get_mut(user_id) {
            cart.items.clear();
        }
        Ok(())
    }
}
