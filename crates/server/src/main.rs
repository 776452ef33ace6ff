//! Server entry point: configuration, wiring, gRPC and observability
//! servers, graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use reliability::RateLimiter;
use tokio::signal;
use tonic::transport::Server;
use tonic_health::ServingStatus;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use server::adapters::{self, DriverGrpc, OrderGrpc};
use server::app;
use server::config::Config;
use server::metrics::Metrics;
use server::middleware::{IngressLimiter, Telemetry, TelemetryLayer};
use server::observability::{self, ObservabilityState, Readiness};
use server::pb;
use server::pb::driver_service_server::DriverServiceServer;
use server::pb::order_service_server::OrderServiceServer;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(err) = run().await {
        tracing::error!(error = %err, "server error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    let pool = app::connect_postgres(&config.database_url).await?;
    let redis = app::connect_redis(&config.redis).await?;

    // Saga schema first: the assignments table references order_sagas.
    let sagas = order_store::PostgresSagaStore::with_schema(pool.clone()).await?;
    let payments = order_store::PostgresPaymentClient::with_schema(pool.clone()).await?;
    let couriers = order_store::PostgresCourierClient::with_schema(pool.clone()).await?;
    let engine = Arc::new(app::build_engine(
        payments,
        couriers,
        sagas,
        &config.reliability,
    ));

    let ingest = Arc::new(app::build_ingest(pool.clone(), redis.clone(), &config.redis).await?);

    let metrics = Arc::new(Metrics::new());
    let ingress = Arc::new(IngressLimiter::new(
        RateLimiter::new(
            config.ingress.rate_limit_interval,
            config.ingress.rate_limit_burst,
        ),
        metrics.clone(),
    ));
    let telemetry = Telemetry {
        metrics: metrics.clone(),
        limiter: ingress.clone(),
    };

    let order_service = OrderServiceServer::new(OrderGrpc::new(engine));
    let driver_service = DriverServiceServer::new(DriverGrpc::new(ingest, ingress));

    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    for service in [
        adapters::ORDER_SERVICE_NAME,
        adapters::DRIVER_SERVICE_NAME,
        "",
    ] {
        health_reporter
            .set_service_status(service, ServingStatus::Serving)
            .await;
    }

    // Observability HTTP server.
    let readiness = Readiness::new(redis.clone(), pool.clone(), config.redis.healthcheck_timeout);
    let obs_router = observability::router(ObservabilityState {
        metrics: metrics.clone(),
        readiness,
    });
    let obs_listener = tokio::net::TcpListener::bind(&config.observability.addr).await?;
    tracing::info!(addr = %config.observability.addr, "observability server listening");
    let (obs_stop_tx, obs_stop_rx) = tokio::sync::oneshot::channel::<()>();
    let obs_server = axum::serve(obs_listener, obs_router).with_graceful_shutdown(async move {
        let _ = obs_stop_rx.await;
    });
    let obs_task = tokio::spawn(async move {
        if let Err(err) = obs_server.await {
            tracing::error!(error = %err, "observability server error");
        }
    });

    let addr: std::net::SocketAddr = "0.0.0.0:50051".parse()?;
    tracing::info!(%addr, "gRPC server listening");

    let metrics_at_shutdown = metrics.clone();
    let shutdown = async move {
        shutdown_signal().await;
        metrics_at_shutdown.mark_shutdown();
        for service in [
            adapters::ORDER_SERVICE_NAME,
            adapters::DRIVER_SERVICE_NAME,
            "",
        ] {
            health_reporter
                .set_service_status(service, ServingStatus::NotServing)
                .await;
        }
    };

    let mut builder = Server::builder().layer(TelemetryLayer::new(telemetry));
    let router = builder
        .add_service(health_service)
        .add_service(order_service)
        .add_service(driver_service);
    let router = if config.debug_endpoints_enabled() {
        let reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(pb::FILE_DESCRIPTOR_SET)
            .build_v1()?;
        tracing::info!(app_env = %config.app_env, "gRPC reflection enabled");
        router.add_service(reflection)
    } else {
        router
    };

    router.serve_with_shutdown(addr, shutdown).await?;

    // In-flight calls have drained. Close the observability server within a
    // short timeout, then release store handles in reverse dependency order.
    let _ = obs_stop_tx.send(());
    let _ = tokio::time::timeout(Duration::from_secs(2), obs_task).await;

    drop(redis);
    pool.close().await;

    tracing::info!("server shut down gracefully");
    Ok(())
}
