//! PostgreSQL payment client.

use async_trait::async_trait;
use common::OrderId;
use orders::{ClientError, PaymentClient};
use sqlx::{PgPool, Row};

/// Records charges and refunds in the `payments` table.
///
/// A row exists iff a charge succeeded. `refunded_at` is monotonic: once
/// set it is never cleared, and a repeat refund with the same amount is a
/// no-op success.
#[derive(Clone)]
pub struct PostgresPaymentClient {
    pool: PgPool,
}

impl PostgresPaymentClient {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the client and bootstraps its schema.
    pub async fn with_schema(pool: PgPool) -> Result<Self, ClientError> {
        let client = Self::new(pool);
        client.init_schema().await?;
        Ok(client)
    }

    /// Creates the payments table if it does not exist.
    pub async fn init_schema(&self) -> Result<(), ClientError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS payments (
                order_id TEXT PRIMARY KEY,
                amount DOUBLE PRECISION NOT NULL,
                charged_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                refunded_at TIMESTAMPTZ,
                refund_amount DOUBLE PRECISION
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }
}

#[async_trait]
impl PaymentClient for PostgresPaymentClient {
    async fn charge(&self, order_id: &OrderId, amount: f64) -> Result<(), ClientError> {
        let result = sqlx::query(
            r#"
            INSERT INTO payments (order_id, amount)
            VALUES ($1, $2)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(order_id.as_str())
        .bind(amount)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        if result.rows_affected() == 0 {
            return Err(ClientError::AlreadyCharged);
        }
        Ok(())
    }

    async fn refund(&self, order_id: &OrderId, amount: f64) -> Result<(), ClientError> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET refund_amount = $2, refunded_at = NOW()
            WHERE order_id = $1 AND refunded_at IS NULL
            "#,
        )
        .bind(order_id.as_str())
        .bind(amount)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let row = sqlx::query(
            r#"
            SELECT refunded_at IS NOT NULL AS refunded, refund_amount
            FROM payments
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        match row {
            None => Err(ClientError::NotCharged),
            Some(row) => {
                let refunded: bool = row.try_get("refunded").map_err(unavailable)?;
                if !refunded {
                    return Err(ClientError::NotCharged);
                }
                let prior: Option<f64> = row.try_get("refund_amount").map_err(unavailable)?;
                if prior == Some(amount) {
                    // Idempotent repeat of the same refund.
                    Ok(())
                } else {
                    Err(ClientError::AlreadyRefunded)
                }
            }
        }
    }
}

fn unavailable(err: sqlx::Error) -> ClientError {
    ClientError::Unavailable(Box::new(err))
}
