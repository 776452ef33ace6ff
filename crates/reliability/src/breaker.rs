//! Circuit breaker with a single half-open trial.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker is open; the wrapped operation was not invoked.
    #[error("circuit breaker open")]
    Open,

    /// The wrapped operation ran and failed.
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: State,
    failures: u32,
    opened_at: Instant,
    half_open_in_flight: bool,
}

/// Stops calls to an unhealthy dependency after repeated failures.
///
/// Closed: failures count up, successes reset the count; at `max_failures`
/// the breaker opens. Open: calls fail fast until `reset_timeout` elapses,
/// then one half-open trial is admitted. The trial's outcome closes or
/// reopens the breaker. The mutex is held only across constant-time state
/// transitions; the wrapped operation runs outside it.
#[derive(Debug)]
pub struct CircuitBreaker {
    max_failures: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Creates a breaker. `max_failures` is clamped to at least 1; a zero
    /// `reset_timeout` defaults to two seconds.
    pub fn new(max_failures: u32, reset_timeout: Duration) -> Self {
        let reset_timeout = if reset_timeout.is_zero() {
            Duration::from_secs(2)
        } else {
            reset_timeout
        };
        Self {
            max_failures: max_failures.max(1),
            reset_timeout,
            inner: Mutex::new(BreakerState {
                state: State::Closed,
                failures: 0,
                opened_at: Instant::now(),
                half_open_in_flight: false,
            }),
        }
    }

    /// Runs `op` under breaker control.
    pub async fn execute<T, E, Fut>(&self, op: Fut) -> Result<T, BreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let now = Instant::now();

        {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                State::Open => {
                    if now.duration_since(inner.opened_at) < self.reset_timeout {
                        return Err(BreakerError::Open);
                    }
                    inner.state = State::HalfOpen;
                    inner.half_open_in_flight = true;
                }
                State::HalfOpen => {
                    if inner.half_open_in_flight {
                        return Err(BreakerError::Open);
                    }
                    inner.half_open_in_flight = true;
                }
                State::Closed => {}
            }
        }

        let result = op.await;

        let mut inner = self.inner.lock().unwrap();
        if inner.state == State::HalfOpen {
            inner.half_open_in_flight = false;
        }

        match result {
            Ok(value) => {
                inner.state = State::Closed;
                inner.failures = 0;
                Ok(value)
            }
            Err(err) => {
                if inner.state == State::HalfOpen {
                    inner.state = State::Open;
                    inner.opened_at = now;
                    inner.failures = 0;
                } else {
                    inner.failures += 1;
                    if inner.failures >= self.max_failures {
                        inner.state = State::Open;
                        inner.opened_at = now;
                    }
                }
                Err(BreakerError::Inner(err))
            }
        }
    }
}
