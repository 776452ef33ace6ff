//! Ingress telemetry and rate limiting for the gRPC stack.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use reliability::RateLimiter;
use tower::{Layer, Service};

use crate::metrics::Metrics;

/// Full method path of the client-streaming ingest RPC. Its rate limiting
/// happens per received message inside the driver adapter, not per call.
pub const UPDATE_LOCATION_PATH: &str = "/dispatch.DriverService/UpdateLocation";

/// The ingress token bucket plus wait accounting.
pub struct IngressLimiter {
    limiter: RateLimiter,
    metrics: Arc<Metrics>,
}

impl IngressLimiter {
    pub fn new(limiter: RateLimiter, metrics: Arc<Metrics>) -> Self {
        Self { limiter, metrics }
    }

    /// Waits for an ingress token, recording the wait in the metrics.
    pub async fn wait(&self) {
        let waited = self.limiter.wait().await;
        self.metrics.add_rate_limit_wait(waited);
    }
}

/// Shared state for the telemetry middleware.
#[derive(Clone)]
pub struct Telemetry {
    pub metrics: Arc<Metrics>,
    pub limiter: Arc<IngressLimiter>,
}

/// Tower layer that opens a [`crate::metrics::CallSpan`] per tracked gRPC
/// call and gates unary calls on the ingress limiter.
#[derive(Clone)]
pub struct TelemetryLayer {
    telemetry: Telemetry,
}

impl TelemetryLayer {
    pub fn new(telemetry: Telemetry) -> Self {
        Self { telemetry }
    }
}

impl<S> Layer<S> for TelemetryLayer {
    type Service = TelemetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TelemetryService {
            inner,
            telemetry: self.telemetry.clone(),
        }
    }
}

/// See [`TelemetryLayer`].
#[derive(Clone)]
pub struct TelemetryService<S> {
    inner: S,
    telemetry: Telemetry,
}

impl<S, B, RB> Service<http::Request<B>> for TelemetryService<S>
where
    S: Service<http::Request<B>, Response = http::Response<RB>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        // Take the ready service and leave a fresh clone in its place.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let telemetry = self.telemetry.clone();
        let path = req.uri().path().to_string();

        Box::pin(async move {
            if !tracked_method(&path) {
                return inner.call(req).await;
            }

            let span = telemetry.metrics.start(&path);
            if path != UPDATE_LOCATION_PATH {
                telemetry.limiter.wait().await;
            }

            let result = inner.call(req).await;
            match &result {
                Ok(response) => span.end(status_is_error(response.headers())),
                Err(_) => span.end(true),
            }
            result
        })
    }
}

/// Health and reflection traffic is not part of the request metrics.
fn tracked_method(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with("/grpc.health.")
        && !path.starts_with("/grpc.reflection.")
}

/// Handler failures surface as trailers-only responses with `grpc-status`
/// present in the headers; a successful call carries its status in the
/// trailers instead.
fn status_is_error(headers: &http::HeaderMap) -> bool {
    headers
        .get("grpc-status")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<i32>().ok())
        .map(|code| code != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn telemetry(rate: Duration, burst: u32) -> Telemetry {
        let metrics = Arc::new(Metrics::new());
        Telemetry {
            limiter: Arc::new(IngressLimiter::new(RateLimiter::new(rate, burst), metrics.clone())),
            metrics,
        }
    }

    #[derive(Clone)]
    struct Responder {
        grpc_status: Option<&'static str>,
    }

    impl Service<http::Request<()>> for Responder {
        type Response = http::Response<()>;
        type Error = std::convert::Infallible;
        type Future =
            std::future::Ready<Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: http::Request<()>) -> Self::Future {
            let mut builder = http::Response::builder().status(200);
            if let Some(code) = self.grpc_status {
                builder = builder.header("grpc-status", code);
            }
            std::future::ready(Ok(builder.body(()).unwrap()))
        }
    }

    fn request(path: &str) -> http::Request<()> {
        http::Request::builder()
            .uri(format!("http://localhost{path}"))
            .body(())
            .unwrap()
    }

    #[tokio::test]
    async fn tracked_call_is_counted() {
        let telemetry = telemetry(Duration::ZERO, 0);
        let mut service =
            TelemetryLayer::new(telemetry.clone()).layer(Responder { grpc_status: None });

        service
            .call(request("/dispatch.OrderService/CreateOrder"))
            .await
            .unwrap();

        let snap = telemetry.metrics.snapshot();
        let method = &snap.methods["/dispatch.OrderService/CreateOrder"];
        assert_eq!(method.count, 1);
        assert_eq!(method.errors, 0);
        assert_eq!(method.in_flight, 0);
    }

    #[tokio::test]
    async fn error_status_header_marks_the_span_failed() {
        let telemetry = telemetry(Duration::ZERO, 0);
        let mut service = TelemetryLayer::new(telemetry.clone()).layer(Responder {
            grpc_status: Some("13"),
        });

        service
            .call(request("/dispatch.OrderService/CreateOrder"))
            .await
            .unwrap();

        let snap = telemetry.metrics.snapshot();
        assert_eq!(snap.total_errors, 1);
    }

    #[tokio::test]
    async fn health_traffic_is_not_tracked() {
        let telemetry = telemetry(Duration::ZERO, 0);
        let mut service =
            TelemetryLayer::new(telemetry.clone()).layer(Responder { grpc_status: None });

        service
            .call(request("/grpc.health.v1.Health/Check"))
            .await
            .unwrap();

        assert!(telemetry.metrics.snapshot().methods.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unary_calls_wait_on_the_limiter() {
        // burst 1: the second call must wait a full refill interval.
        let telemetry = telemetry(Duration::from_millis(50), 1);
        let mut service =
            TelemetryLayer::new(telemetry.clone()).layer(Responder { grpc_status: None });

        let start = tokio::time::Instant::now();
        service
            .call(request("/dispatch.OrderService/CreateOrder"))
            .await
            .unwrap();
        service
            .call(request("/dispatch.OrderService/CreateOrder"))
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(50));

        let snap = telemetry.metrics.snapshot();
        assert_eq!(snap.rate_limit_waits, 1);
        assert!(snap.rate_limit_wait_ms >= 50);
    }

    #[tokio::test(start_paused = true)]
    async fn streaming_ingest_is_not_limited_per_call() {
        let telemetry = telemetry(Duration::from_millis(50), 1);
        // Exhaust the bucket.
        telemetry.limiter.wait().await;

        let mut service =
            TelemetryLayer::new(telemetry.clone()).layer(Responder { grpc_status: None });

        let start = tokio::time::Instant::now();
        service.call(request(UPDATE_LOCATION_PATH)).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
