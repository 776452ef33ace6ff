//! Retry with exponential backoff, cap, and jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Jitter function applied to each computed backoff delay.
pub type JitterFn = fn(Duration) -> Duration;

/// Controls retry behavior for an outbound call.
///
/// Attempt 1 runs immediately. After a failure, if attempts remain and the
/// error is classified retryable, the policy sleeps for
/// `jitter(min(max_delay, base_delay * 2^(attempt-1)))` and tries again.
/// Dropping the returned future cancels the sleep and the in-flight attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: JitterFn,
}

impl RetryPolicy {
    /// Creates a policy with the default uniform `[d/2, d]` jitter.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: default_jitter,
        }
    }

    /// Replaces the jitter function. Tests use the identity to make delay
    /// sequences deterministic.
    pub fn with_jitter(mut self, jitter: JitterFn) -> Self {
        self.jitter = jitter;
        self
    }

    /// The configured attempt ceiling.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs `op` until it succeeds, attempts are exhausted, or `should_retry`
    /// rejects the error. The last attempt's error is returned unchanged.
    pub async fn run<T, E, F, Fut>(
        &self,
        mut op: F,
        should_retry: impl Fn(&E) -> bool,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt == self.max_attempts || !should_retry(&err) {
                        return Err(err);
                    }
                    let delay = (self.jitter)(self.delay_for_attempt(attempt));
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Backoff before the retry that follows `attempt` (1-based), pre-jitter.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let shift = (attempt - 1).min(20);
        let delay = self
            .base_delay
            .saturating_mul(1u32.checked_shl(shift).unwrap_or(u32::MAX));
        if !self.max_delay.is_zero() && delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }
}

/// Uniform jitter in `[d/2, d]`.
fn default_jitter(d: Duration) -> Duration {
    if d.is_zero() {
        return d;
    }
    let nanos = d.as_nanos().min(u64::MAX as u128) as u64;
    let half = nanos / 2;
    Duration::from_nanos(rand::thread_rng().gen_range(half..=nanos))
}
