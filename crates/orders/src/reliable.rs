//! Reliability-wrapped outbound clients.
//!
//! Every attempt runs `limiter.wait → breaker.execute(call)`; the enclosing
//! retry policy decides whether the attempt's failure is retried. An open
//! breaker surfaces as [`ClientError::CircuitOpen`], which the retry
//! classifier never retries.

use std::future::Future;

use async_trait::async_trait;
use common::{CourierId, OrderId};
use reliability::{BreakerError, CircuitBreaker, RateLimiter, RetryPolicy};

use crate::clients::{ClientError, CourierClient, PaymentClient};

async fn reliable_call<T, F, Fut>(
    retry: &RetryPolicy,
    limiter: &RateLimiter,
    breaker: &CircuitBreaker,
    op: F,
) -> Result<T, ClientError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let op = &op;
    retry
        .run(
            move || async move {
                limiter.wait().await;
                match breaker.execute(op()).await {
                    Ok(value) => Ok(value),
                    Err(BreakerError::Open) => Err(ClientError::CircuitOpen),
                    Err(BreakerError::Inner(err)) => Err(err),
                }
            },
            ClientError::is_retryable,
        )
        .await
}

/// A [`PaymentClient`] wrapped with rate limiting, circuit breaking, and
/// retries.
pub struct ReliablePaymentClient<P> {
    base: P,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl<P> ReliablePaymentClient<P> {
    pub fn new(base: P, limiter: RateLimiter, breaker: CircuitBreaker, retry: RetryPolicy) -> Self {
        Self {
            base,
            limiter,
            breaker,
            retry,
        }
    }
}

#[async_trait]
impl<P: PaymentClient> PaymentClient for ReliablePaymentClient<P> {
    async fn charge(&self, order_id: &OrderId, amount: f64) -> Result<(), ClientError> {
        reliable_call(&self.retry, &self.limiter, &self.breaker, || {
            self.base.charge(order_id, amount)
        })
        .await
    }

    async fn refund(&self, order_id: &OrderId, amount: f64) -> Result<(), ClientError> {
        reliable_call(&self.retry, &self.limiter, &self.breaker, || {
            self.base.refund(order_id, amount)
        })
        .await
    }
}

/// A [`CourierClient`] wrapped with rate limiting, circuit breaking, and
/// retries.
pub struct ReliableCourierClient<C> {
    base: C,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl<C> ReliableCourierClient<C> {
    pub fn new(base: C, limiter: RateLimiter, breaker: CircuitBreaker, retry: RetryPolicy) -> Self {
        Self {
            base,
            limiter,
            breaker,
            retry,
        }
    }
}

#[async_trait]
impl<C: CourierClient> CourierClient for ReliableCourierClient<C> {
    async fn assign(&self, order_id: &OrderId, courier_id: &CourierId) -> Result<(), ClientError> {
        reliable_call(&self.retry, &self.limiter, &self.breaker, || {
            self.base.assign(order_id, courier_id)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Payment client that fails a configurable number of times before
    /// succeeding.
    #[derive(Clone, Default)]
    struct FlakyPayments {
        calls: Arc<AtomicU32>,
        fail_first: u32,
    }

    #[async_trait]
    impl PaymentClient for FlakyPayments {
        async fn charge(&self, _order_id: &OrderId, _amount: f64) -> Result<(), ClientError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(ClientError::Unavailable("flaky".into()))
            } else {
                Ok(())
            }
        }

        async fn refund(&self, _order_id: &OrderId, _amount: f64) -> Result<(), ClientError> {
            Ok(())
        }
    }

    fn identity(d: Duration) -> Duration {
        d
    }

    fn wrap(base: FlakyPayments, max_attempts: u32, max_failures: u32) -> ReliablePaymentClient<FlakyPayments> {
        ReliablePaymentClient::new(
            base,
            RateLimiter::new(Duration::ZERO, 0),
            CircuitBreaker::new(max_failures, Duration::from_secs(60)),
            RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(4))
                .with_jitter(identity),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures() {
        let base = FlakyPayments {
            fail_first: 2,
            ..Default::default()
        };
        let client = wrap(base.clone(), 5, 10);

        client.charge(&OrderId::new("o1"), 1.0).await.unwrap();
        assert_eq!(base.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn circuit_open_stops_retries() {
        let base = FlakyPayments {
            fail_first: u32::MAX,
            ..Default::default()
        };
        // Breaker trips after 2 failures; retry budget of 10 must not be
        // spent hammering an open circuit.
        let client = wrap(base.clone(), 10, 2);

        let err = client.charge(&OrderId::new("o1"), 1.0).await.unwrap_err();
        assert!(matches!(err, ClientError::CircuitOpen));
        assert_eq!(base.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_last_error() {
        let base = FlakyPayments {
            fail_first: u32::MAX,
            ..Default::default()
        };
        let client = wrap(base.clone(), 3, 100);

        let err = client.charge(&OrderId::new("o1"), 1.0).await.unwrap_err();
        assert!(matches!(err, ClientError::Unavailable(_)));
        assert_eq!(base.calls.load(Ordering::SeqCst), 3);
    }
}
