//! Reliability primitives for outbound side effects.
//!
//! Three independently testable pieces: a retry policy with exponential
//! backoff and jitter, a circuit breaker, and a token-bucket rate limiter.
//! Callers compose them as `retry(rate_limit → breaker → operation)`.

pub mod breaker;
pub mod limiter;
pub mod retry;

pub use breaker::{BreakerError, CircuitBreaker};
pub use limiter::RateLimiter;
pub use retry::RetryPolicy;
