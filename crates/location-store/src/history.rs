//! PostgreSQL location history store.

use async_trait::async_trait;
use common::Location;
use ingest::{LocationStore, StoreError};
use sqlx::PgPool;

/// Append-only location history keyed by a monotonic id.
///
/// History is audit-oriented: duplicate appends are acceptable and
/// ordering is the database's concern.
#[derive(Clone)]
pub struct PostgresLocationHistory {
    pool: PgPool,
}

impl PostgresLocationHistory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the store and bootstraps its schema.
    pub async fn with_schema(pool: PgPool) -> Result<Self, StoreError> {
        let store = Self::new(pool);
        store.init_schema().await?;
        Ok(store)
    }

    /// Creates the history table if it does not exist.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS courier_locations (
                id BIGSERIAL PRIMARY KEY,
                courier_id TEXT NOT NULL,
                lat DOUBLE PRECISION NOT NULL,
                long DOUBLE PRECISION NOT NULL,
                recorded_at TIMESTAMPTZ NOT NULL
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
impl LocationStore for PostgresLocationHistory {
    async fn update(&self, location: &Location) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO courier_locations (courier_id, lat, long, recorded_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(location.courier_id().as_str())
        .bind(location.latitude())
        .bind(location.longitude())
        .bind(location.recorded_at())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }
}

fn unavailable(err: sqlx::Error) -> StoreError {
    StoreError::Unavailable(Box::new(err))
}
