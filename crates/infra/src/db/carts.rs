//! Postgres-backed cart store.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::instrument;

use dealerflow_core::UserId;
use dealerflow_orders::{Cart, CartItem, CartStore, StoreError};

use super::map_sqlx_error;

#[derive(Debug, Clone)]
pub struct PostgresCartStore {
    pool: Arc<PgPool>,
}

impl PostgresCartStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl CartStore for PostgresCartStore {
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn get(&self, user_id: &UserId) -> Result<Option<Cart>, StoreError> {
        let row = sqlx::query("SELECT items FROM carts WHERE user_id = $1")
            .bind(user_id.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get cart", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let items: Json<Vec<CartItem>> = row
            .try_get("items")
            .map_err(|e| map_sqlx_error("get cart", e))?;

        Ok(Some(Cart {
            user_id: user_id.clone(),
            items: items.0,
        }))
    }

    #[instrument(skip(self, cart), fields(user_id = %cart.user_id), err)]
    async fn put(&self, cart: &Cart) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO carts (user_id, items, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (user_id) DO UPDATE
            SET items = EXCLUDED.items, updated_at = now()
            "#,
        )
        .bind(cart.user_id.as_str())
        .bind(Json(&cart.items))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("put cart", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn clear(&self, user_id: &UserId) -> Result<(), StoreError> {
        sqlx::query("UPDATE carts SET items = '[]'::jsonb, updated_at = now() WHERE user_id = $1")
            .bind(user_id.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("clear cart", e))?;
        Ok(())
    }
}
