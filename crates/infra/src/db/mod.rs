//! Postgres adapters for the order and cart stores.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | any other | `Unavailable` |
//! | ColumnDecode / Decode | N/A | `Serialization` |
//! | Other (pool closed, io, timeouts) | N/A | `Unavailable` |

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use dealerflow_orders::StoreError;

pub mod carts;
pub mod orders;

pub use carts::PostgresCartStore;
pub use orders::PostgresOrderStore;

/// Open a connection pool.
pub async fn connect(database_url: &str) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))
}

/// Create the tables the stores use, if missing.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            order_id    TEXT PRIMARY KEY,
            payment_id  TEXT NOT NULL UNIQUE,
            user_id     TEXT NOT NULL,
            status      TEXT NOT NULL,
            document    JSONB NOT NULL,
            created_at  TIMESTAMPTZ NOT NULL,
            updated_at  TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| map_sqlx_error("ensure_schema orders", e))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS carts (
            user_id     TEXT PRIMARY KEY,
            items       JSONB NOT NULL DEFAULT '[]'::jsonb,
            updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| map_sqlx_error("ensure_schema carts", e))?;

    info!("database schema ready");
    Ok(())
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(format!("failed to decode row in {}: {}", operation, err))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}
