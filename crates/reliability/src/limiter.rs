//! Token-bucket rate limiter.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    last: Instant,
}

/// Token bucket refilling one token every `rate`, holding at most `burst`.
///
/// Degenerate configurations (`rate` zero or `burst` zero) admit every
/// caller unconditionally. Dropping a pending [`RateLimiter::wait`] future
/// abandons the wait without consuming a token.
#[derive(Debug)]
pub struct RateLimiter {
    rate: Duration,
    burst: u32,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Creates a limiter with a full bucket.
    pub fn new(rate: Duration, burst: u32) -> Self {
        Self {
            rate,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }

    /// Blocks until a token is available and returns the time spent waiting.
    pub async fn wait(&self) -> Duration {
        if self.rate.is_zero() || self.burst == 0 {
            return Duration::ZERO;
        }

        let start = Instant::now();
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().unwrap();
                let now = Instant::now();
                self.refill(&mut bucket, now);
                if bucket.tokens > 0 {
                    bucket.tokens -= 1;
                    return start.elapsed();
                }
                self.rate
                    .checked_sub(now.duration_since(bucket.last))
                    .unwrap_or(Duration::ZERO)
            };
            if wait.is_zero() {
                continue;
            }
            tokio::time::sleep(wait).await;
        }
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.duration_since(bucket.last);
        if elapsed < self.rate {
            return;
        }
        let add = elapsed.as_nanos() / self.rate.as_nanos();
        if add == 0 {
            return;
        }
        let deficit = self.burst - bucket.tokens;
        if add >= u128::from(deficit) {
            bucket.tokens = self.burst;
            bucket.last = now;
        } else {
            bucket.tokens += add as u32;
            bucket.last += self.rate * (add as u32);
        }
    }
}
