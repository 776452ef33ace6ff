//! Observability HTTP endpoints: metrics snapshot and readiness probe.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use redis::aio::ConnectionManager;
use sqlx::PgPool;
use thiserror::Error;

use crate::metrics::Metrics;

/// Readiness probe failures.
#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0} healthcheck timed out")]
    Timeout(&'static str),
}

/// Synchronous probe of the hot store and the durable store.
#[derive(Clone)]
pub struct Readiness {
    redis: ConnectionManager,
    pool: PgPool,
    timeout: Duration,
}

impl Readiness {
    pub fn new(redis: ConnectionManager, pool: PgPool, timeout: Duration) -> Self {
        Self {
            redis,
            pool,
            timeout,
        }
    }

    /// Pings Redis and runs `SELECT 1` against PostgreSQL, failing fast on
    /// either.
    pub async fn check(&self) -> Result<(), ReadinessError> {
        let mut conn = self.redis.clone();
        let ping = async {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<(), ReadinessError>(())
        };
        tokio::time::timeout(self.timeout, ping)
            .await
            .map_err(|_| ReadinessError::Timeout("redis"))??;

        let select = sqlx::query("SELECT 1").execute(&self.pool);
        tokio::time::timeout(self.timeout, select)
            .await
            .map_err(|_| ReadinessError::Timeout("database"))??;

        Ok(())
    }
}

#[derive(Clone)]
pub struct ObservabilityState {
    pub metrics: Arc<Metrics>,
    pub readiness: Readiness,
}

/// Builds the observability router: `GET /metrics` and `GET /readyz`.
pub fn router(state: ObservabilityState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_snapshot))
        .route("/readyz", get(readyz))
        .with_state(state)
}

async fn metrics_snapshot(State(state): State<ObservabilityState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

async fn readyz(State(state): State<ObservabilityState>) -> impl IntoResponse {
    match state.readiness.check().await {
        Ok(()) => (StatusCode::OK, "ok".to_string()),
        Err(err) => {
            tracing::warn!(error = %err, "readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
    }
}
