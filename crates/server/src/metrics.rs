//! Per-method request metrics with a JSON snapshot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

/// Point-in-time view of one method's counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MethodSnapshot {
    pub count: i64,
    pub errors: i64,
    pub in_flight: i64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: f64,
    pub last_latency_ms: f64,
}

/// Shutdown marker recorded when draining starts.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleSnapshot {
    pub shutdown_at: DateTime<Utc>,
    pub inflight_at_shutdown: i64,
}

/// Consistent point-in-time copy of the whole registry.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub uptime_sec: i64,
    pub total_requests: i64,
    pub total_errors: i64,
    pub in_flight: i64,
    pub rate_limit_waits: i64,
    pub rate_limit_wait_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<LifecycleSnapshot>,
    pub methods: HashMap<String, MethodSnapshot>,
}

#[derive(Debug, Default)]
struct MethodStats {
    count: i64,
    errors: i64,
    in_flight: i64,
    total_latency: Duration,
    max_latency: Duration,
    last_latency: Duration,
}

#[derive(Debug, Default)]
struct Inner {
    methods: HashMap<String, MethodStats>,
    rate_limit_waits: i64,
    rate_limit_wait: Duration,
    lifecycle: Option<LifecycleSnapshot>,
}

/// Process-wide request metrics registry.
///
/// One mutex guards all counters; it is held only across constant-time
/// updates, and snapshots are taken in a single critical section.
#[derive(Debug)]
pub struct Metrics {
    start: Instant,
    inner: Mutex<Inner>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Opens a call span, incrementing the method's in-flight gauge.
    pub fn start(self: &Arc<Self>, method: &str) -> CallSpan {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.methods.entry(method.to_string()).or_default().in_flight += 1;
        }
        CallSpan {
            metrics: Arc::clone(self),
            method: method.to_string(),
            start: Instant::now(),
        }
    }

    /// Accounts one rate-limit wait of duration `d`.
    pub fn add_rate_limit_wait(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.rate_limit_waits += 1;
        inner.rate_limit_wait += d;
    }

    /// Records the start of draining, capturing the current in-flight count.
    pub fn mark_shutdown(&self) {
        let mut inner = self.inner.lock().unwrap();
        let in_flight = inner.methods.values().map(|m| m.in_flight).sum();
        inner.lifecycle = Some(LifecycleSnapshot {
            shutdown_at: Utc::now(),
            inflight_at_shutdown: in_flight,
        });
    }

    /// Takes a consistent snapshot of all counters.
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.lock().unwrap();

        let mut snapshot = Snapshot {
            uptime_sec: self.start.elapsed().as_secs() as i64,
            rate_limit_waits: inner.rate_limit_waits,
            rate_limit_wait_ms: inner.rate_limit_wait.as_millis() as i64,
            lifecycle: inner.lifecycle.clone(),
            ..Snapshot::default()
        };

        for (method, stats) in &inner.methods {
            let avg = if stats.count > 0 {
                stats.total_latency.as_millis() as f64 / stats.count as f64
            } else {
                0.0
            };
            snapshot.methods.insert(
                method.clone(),
                MethodSnapshot {
                    count: stats.count,
                    errors: stats.errors,
                    in_flight: stats.in_flight,
                    avg_latency_ms: avg,
                    max_latency_ms: stats.max_latency.as_millis() as f64,
                    last_latency_ms: stats.last_latency.as_millis() as f64,
                },
            );
            snapshot.total_requests += stats.count;
            snapshot.total_errors += stats.errors;
            snapshot.in_flight += stats.in_flight;
        }

        snapshot
    }

    fn finish(&self, method: &str, latency: Duration, failed: bool) {
        let mut inner = self.inner.lock().unwrap();
        let stats = inner.methods.entry(method.to_string()).or_default();
        stats.in_flight -= 1;
        stats.count += 1;
        if failed {
            stats.errors += 1;
        }
        stats.total_latency += latency;
        if latency > stats.max_latency {
            stats.max_latency = latency;
        }
        stats.last_latency = latency;
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A single tracked call; closed exactly once via [`CallSpan::end`].
pub struct CallSpan {
    metrics: Arc<Metrics>,
    method: String,
    start: Instant,
}

impl CallSpan {
    /// Closes the span: decrements in-flight, bumps the call counter, and
    /// folds the latency into the method's stats.
    pub fn end(self, failed: bool) {
        let latency = self.start.elapsed();
        self.metrics.finish(&self.method, latency, failed);
    }
}
