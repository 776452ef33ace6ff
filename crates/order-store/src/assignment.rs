//! PostgreSQL courier assignment client.

use async_trait::async_trait;
use common::{CourierId, OrderId};
use orders::{ClientError, CourierClient};
use sqlx::{PgPool, Row};

/// Records courier assignments in the `order_assignments` table.
///
/// At most one assignment exists per order. A retried assignment that finds
/// an existing row for the same courier succeeds (a retry after a lost
/// reply); a different courier is a conflict.
#[derive(Clone)]
pub struct PostgresCourierClient {
    pool: PgPool,
}

impl PostgresCourierClient {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the client and bootstraps its schema.
    pub async fn with_schema(pool: PgPool) -> Result<Self, ClientError> {
        let client = Self::new(pool);
        client.init_schema().await?;
        Ok(client)
    }

    /// Creates the assignments table if it does not exist.
    pub async fn init_schema(&self) -> Result<(), ClientError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS order_assignments (
                order_id TEXT PRIMARY KEY,
                courier_id TEXT NOT NULL,
                assigned_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                FOREIGN KEY (order_id) REFERENCES order_sagas(order_id) ON DELETE CASCADE
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
impl CourierClient for PostgresCourierClient {
    async fn assign(&self, order_id: &OrderId, courier_id: &CourierId) -> Result<(), ClientError> {
        let result = sqlx::query(
            r#"
            INSERT INTO order_assignments (order_id, courier_id)
            VALUES ($1, $2)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(order_id.as_str())
        .bind(courier_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let existing: Option<String> = sqlx::query(
            r#"
            SELECT courier_id FROM order_assignments WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?
        .map(|row| row.try_get("courier_id"))
        .transpose()
        .map_err(unavailable)?;

        match existing {
            Some(existing) if existing == courier_id.as_str() => Ok(()),
            Some(_) => Err(ClientError::CourierConflict),
            None => Err(ClientError::Unavailable(
                "assignment not found after insert".into(),
            )),
        }
    }
}

fn unavailable(err: sqlx::Error) -> ClientError {
    ClientError::Unavailable(Box::new(err))
}
