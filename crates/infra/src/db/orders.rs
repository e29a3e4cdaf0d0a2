//! Postgres-backed order store. One row per order, the whole order kept as a
//! JSONB document next to a few indexed columns.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::instrument;

use dealerflow_core::{OrderId, PaymentId};
use dealerflow_orders::{Order, OrderStore, StoreError};

use super::map_sqlx_error;

#[derive(Debug, Clone)]
pub struct PostgresOrderStore {
    pool: Arc<PgPool>,
}

impl PostgresOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn find_one(&self, operation: &str, column_sql: &str, value: &str) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(column_sql)
            .bind(value)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        row.map(|row| {
            row.try_get::<Json<Order>, _>("document")
                .map(|doc| doc.0)
                .map_err(|e| map_sqlx_error(operation, e))
        })
        .transpose()
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn find_by_id(&self, order_id: &OrderId) -> Result<Option<Order>, StoreError> {
        self.find_one(
            "find_by_id",
            "SELECT document FROM orders WHERE order_id = $1",
            order_id.as_str(),
        )
        .await
    }

    #[instrument(skip(self), fields(payment_id = %payment_id), err)]
    async fn find_by_payment_id(&self, payment_id: &PaymentId) -> Result<Option<Order>, StoreError> {
        self.find_one(
            "find_by_payment_id",
            "SELECT document FROM orders WHERE payment_id = $1",
            payment_id.as_str(),
        )
        .await
    }

    #[instrument(skip(self, order), fields(order_id = %order.order_id(), status = order.status().as_str()), err)]
    async fn save(&self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO orders (order_id, payment_id, user_id, status, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (order_id) DO UPDATE
            SET status = EXCLUDED.status,
                document = EXCLUDED.document,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(order.order_id().as_str())
        .bind(order.payment_id().as_str())
        .bind(order.user_id().as_str())
        .bind(order.status().as_str())
        .bind(Json(order))
        .bind(order.timestamps().created_at)
        .bind(order.timestamps().updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save", e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    //! These run only when `DATABASE_URL` points at a live Postgres.

    use chrono::Utc;

    use dealerflow_core::Sku;
    use dealerflow_orders::{NewOrderLine, OrderStatus, PlaceOrder};

    use super::*;
    use crate::db::{connect, ensure_schema};

    async fn store() -> Option<PostgresOrderStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = connect(&url).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        Some(PostgresOrderStore::new(pool))
    }

    fn order(payment: &str) -> Order {
        Order::place(PlaceOrder {
            order_id: OrderId::generate(Utc::now()),
            user_id: "U1".parse().unwrap(),
            payment_id: payment.parse().unwrap(),
            lines: vec![NewOrderLine {
                sku: Sku::parse("A1").unwrap(),
                product_id: "P1".parse().unwrap(),
                product_name: "Widget".to_string(),
                quantity: 2,
                unit_price: 100,
            }],
            amount: 200,
            currency: "INR".to_string(),
            notes: serde_json::json!({}),
            placed_at: Utc::now(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn save_is_an_upsert() {
        let Some(store) = store().await else { return };
        let payment = format!("pay_{}", uuid::Uuid::now_v7().simple());
        let mut o = order(&payment);

        store.save(&o).await.unwrap();
        o.record_assignment(0, "D1".parse().unwrap(), Utc::now()).unwrap();
        o.transition_to(OrderStatus::Assigned, Utc::now()).unwrap();
        store.save(&o).await.unwrap();

        let loaded = store.find_by_id(o.order_id()).await.unwrap().unwrap();
        assert_eq!(loaded, o);
        let by_payment = store
            .find_by_payment_id(&payment.parse().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_payment.order_id(), o.order_id());
    }

    #[tokio::test]
    async fn second_order_for_same_payment_conflicts() {
        let Some(store) = store().await else { return };
        let payment = format!("pay_{}", uuid::Uuid::now_v7().simple());

        store.save(&order(&payment)).await.unwrap();
        let err = store.save(&order(&payment)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }
}
