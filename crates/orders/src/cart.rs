//! Buyer cart, the authoritative source of line items at checkout.

use serde::{Deserialize, Serialize};

use dealerflow_core::{ProductId, Sku, UserId};

use crate::order::NewOrderLine;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub sku: Sku,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    /// Price in smallest currency unit.
    pub unit_price: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub user_id: UserId,
    #[serde(default)]
    pub items: Vec<CartItem>,
}

impl Cart {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            items: Vec::new(),
        }
    }

    pub fn with_item(mut self, item: CartItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.items.iter().all(|i| i.quantity == 0)
    }

    pub fn subtotal(&self) -> u64 {
        self.items
            .iter()
            .map(|i| i.unit_price.saturating_mul(i.quantity as u64))
            .fold(0u64, u64::saturating_add)
    }

    /// Snapshot the cart as order lines (zero-quantity items are dropped).
    pub fn to_order_lines(&self) -> Vec<NewOrderLine> {
        self.items
            .iter()
            .filter(|i| i.quantity > 0)
            .map(|i| NewOrderLine {
                sku: i.sku.clone(),
                product_id: i.product_id.clone(),
                product_name: i.product_name.clone(),
                quantity: i.quantity,
                unit_price: i.unit_price,
            })
            .collect()
    }
}
