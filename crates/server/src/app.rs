//! Dependency assembly: store handles, reliability-wrapped clients, and the
//! ingest pipeline, built from validated configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ingest::{FanoutPublisher, IngestService, MultiLocationStore, StorePublisher, StoreError};
use location_store::{PostgresLocationHistory, RedisLocationStore};
use order_store::{PostgresCourierClient, PostgresPaymentClient, PostgresSagaStore};
use orders::{
    ClientError, OrderSagaEngine, ReliableCourierClient, ReliablePaymentClient, SagaStoreError,
};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{ClientTlsConfig, TlsCertificates};
use reliability::{CircuitBreaker, RateLimiter, RetryPolicy};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;

use crate::config::{RedisConfig, ReliabilityConfig};

/// The fully wired saga engine type.
pub type Engine = OrderSagaEngine<
    ReliablePaymentClient<PostgresPaymentClient>,
    ReliableCourierClient<PostgresCourierClient>,
    PostgresSagaStore,
>;

/// Wiring failures; any of these aborts startup.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("postgres: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("saga store init: {0}")]
    SagaStore(#[from] SagaStoreError),

    #[error("order store init: {0}")]
    OrderStore(#[from] ClientError),

    #[error("location store init: {0}")]
    LocationStore(#[from] StoreError),

    #[error("read {path}: {source}")]
    TlsFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Connects the PostgreSQL pool.
pub async fn connect_postgres(database_url: &str) -> Result<PgPool, AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Connects the Redis multiplexed connection manager, applying the
/// configured timeouts, retry count, and TLS material.
pub async fn connect_redis(cfg: &RedisConfig) -> Result<ConnectionManager, AppError> {
    let client = redis_client(cfg)?;

    let mut manager_cfg = ConnectionManagerConfig::new();
    if let Some(dial) = cfg.dial_timeout {
        manager_cfg = manager_cfg.set_connection_timeout(dial);
    }
    if let Some(response) = cfg.read_timeout.or(cfg.write_timeout) {
        manager_cfg = manager_cfg.set_response_timeout(response);
    }
    if let Some(retries) = cfg.max_retries {
        manager_cfg = manager_cfg.set_number_of_retries(retries as usize);
    }

    let conn = ConnectionManager::new_with_config(client, manager_cfg).await?;
    tracing::info!(url = %cfg.url, "connected to redis");
    Ok(conn)
}

fn redis_client(cfg: &RedisConfig) -> Result<redis::Client, AppError> {
    let Some(tls) = &cfg.tls else {
        return Ok(redis::Client::open(cfg.url.as_str())?);
    };

    let mut url = cfg.url.clone();
    if tls.insecure_skip_verify && !url.contains('#') {
        url.push_str("#insecure");
    }

    if tls.ca_file.is_none() && tls.cert_file.is_none() {
        return Ok(redis::Client::open(url)?);
    }

    let root_cert = tls.ca_file.as_deref().map(read_pem).transpose()?;
    let client_tls = match (&tls.cert_file, &tls.key_file) {
        (Some(cert), Some(key)) => Some(ClientTlsConfig {
            client_cert: read_pem(cert)?,
            client_key: read_pem(key)?,
        }),
        _ => None,
    };

    Ok(redis::Client::build_with_tls(
        url,
        TlsCertificates {
            client_tls,
            root_cert,
        },
    )?)
}

fn read_pem(path: &Path) -> Result<Vec<u8>, AppError> {
    std::fs::read(path).map_err(|source| AppError::TlsFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Wraps the Postgres clients in the reliability fabric and assembles the
/// saga engine. Each client gets its own limiter and breaker; the retry
/// policy is shared configuration.
pub fn build_engine(
    payments: PostgresPaymentClient,
    couriers: PostgresCourierClient,
    sagas: PostgresSagaStore,
    cfg: &ReliabilityConfig,
) -> Engine {
    let retry = RetryPolicy::new(
        cfg.retry_max_attempts,
        cfg.retry_base_delay,
        cfg.retry_max_delay,
    );

    let payments = ReliablePaymentClient::new(
        payments,
        RateLimiter::new(cfg.rate_limit_interval, cfg.rate_limit_burst),
        CircuitBreaker::new(cfg.breaker_max_failures, cfg.breaker_reset_timeout),
        retry.clone(),
    );
    let couriers = ReliableCourierClient::new(
        couriers,
        RateLimiter::new(cfg.rate_limit_interval, cfg.rate_limit_burst),
        CircuitBreaker::new(cfg.breaker_max_failures, cfg.breaker_reset_timeout),
        retry,
    );

    OrderSagaEngine::new(payments, couriers, sagas)
}

/// Assembles the ingest pipeline: history store and hot store behind the
/// fan-out multi-store, wrapped by the fan-out publisher.
pub async fn build_ingest(
    pool: PgPool,
    redis: ConnectionManager,
    cfg: &RedisConfig,
) -> Result<IngestService, AppError> {
    let history = PostgresLocationHistory::with_schema(pool).await?;
    let hot = RedisLocationStore::new(
        redis,
        cfg.stream.clone(),
        cfg.location_ttl,
        cfg.stream_max_len,
    );

    let multi = MultiLocationStore::new(vec![
        Arc::new(history) as Arc<dyn ingest::LocationStore>,
        Arc::new(hot),
    ]);
    let publisher = FanoutPublisher::new(Arc::new(StorePublisher::new(Arc::new(multi))), None);

    Ok(IngestService::new(Arc::new(publisher)))
}
