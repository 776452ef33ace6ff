//! PostgreSQL saga store.

use async_trait::async_trait;
use common::{OrderId, UserId};
use orders::{SagaRecord, SagaStatus, SagaStep, SagaStore, SagaStoreError, StepStatus};
use sqlx::{PgPool, Row};

/// Persists saga headers and steps in PostgreSQL.
///
/// The `UNIQUE` constraint on `idempotency_key` is the sole serialization
/// point for the idempotency check: `start` is a conditional insert followed
/// by a read of whichever row won.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Creates a store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the store and bootstraps its schema.
    pub async fn with_schema(pool: PgPool) -> Result<Self, SagaStoreError> {
        let store = Self::new(pool);
        store.init_schema().await?;
        Ok(store)
    }

    /// Creates the saga tables if they do not exist.
    pub async fn init_schema(&self) -> Result<(), SagaStoreError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS order_sagas (
                order_id TEXT PRIMARY KEY,
                idempotency_key TEXT UNIQUE NOT NULL,
                user_id TEXT NOT NULL,
                amount DOUBLE PRECISION NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS order_saga_steps (
                id BIGSERIAL PRIMARY KEY,
                order_id TEXT NOT NULL,
                step TEXT NOT NULL,
                status TEXT NOT NULL,
                detail TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                FOREIGN KEY (order_id) REFERENCES order_sagas(order_id) ON DELETE CASCADE
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(unavailable)?;
        }
        Ok(())
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    async fn start(
        &self,
        idempotency_key: &str,
        order_id: &OrderId,
        user_id: &UserId,
        amount: f64,
    ) -> Result<(SagaRecord, bool), SagaStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO order_sagas (order_id, idempotency_key, user_id, amount, status)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(order_id.as_str())
        .bind(idempotency_key)
        .bind(user_id.as_str())
        .bind(amount)
        .bind(SagaStatus::Started.as_str())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        let created = result.rows_affected() == 1;

        let row = sqlx::query(
            r#"
            SELECT order_id, user_id, amount, status
            FROM order_sagas
            WHERE idempotency_key = $1
            "#,
        )
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?
        .ok_or_else(|| SagaStoreError::Unavailable("saga not found after insert".into()))?;

        let record = SagaRecord {
            order_id: OrderId::new(row.try_get::<String, _>("order_id").map_err(unavailable)?),
            user_id: UserId::new(row.try_get::<String, _>("user_id").map_err(unavailable)?),
            amount: row.try_get::<f64, _>("amount").map_err(unavailable)?,
            status: row
                .try_get::<String, _>("status")
                .map_err(unavailable)?
                .parse()?,
        };

        if &record.user_id != user_id || record.amount != amount {
            return Err(SagaStoreError::IdempotencyConflict);
        }

        Ok((record, created))
    }

    async fn update_status(
        &self,
        order_id: &OrderId,
        status: SagaStatus,
    ) -> Result<(), SagaStoreError> {
        sqlx::query(
            r#"
            UPDATE order_sagas
            SET status = $2, updated_at = NOW()
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_str())
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn add_step(
        &self,
        order_id: &OrderId,
        step: SagaStep,
        status: StepStatus,
        detail: &str,
    ) -> Result<(), SagaStoreError> {
        sqlx::query(
            r#"
            INSERT INTO order_saga_steps (order_id, step, status, detail)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(order_id.as_str())
        .bind(step.as_str())
        .bind(status.as_str())
        .bind(detail)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }
}

fn unavailable(err: sqlx::Error) -> SagaStoreError {
    SagaStoreError::Unavailable(Box::new(err))
}
