//! Redis latest-snapshot + event-stream store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use common::Location;
use ingest::{LocationStore, StoreError};
use redis::aio::ConnectionManager;

const DEFAULT_STREAM: &str = "location_events";

/// Stores the latest location per courier in a hash at `courier:<id>` and
/// appends every update to a capped stream.
///
/// Both writes go out in a single pipelined round trip; a partial failure
/// fails the whole operation.
#[derive(Clone)]
pub struct RedisLocationStore {
    conn: ConnectionManager,
    stream: String,
    key_prefix: &'static str,
    ttl: Duration,
    max_len: i64,
}

impl RedisLocationStore {
    /// Creates a store. An empty `stream` falls back to `location_events`;
    /// a zero `ttl` disables snapshot expiry; a non-positive `max_len`
    /// disables stream trimming.
    pub fn new(conn: ConnectionManager, stream: impl Into<String>, ttl: Duration, max_len: i64) -> Self {
        let stream = stream.into();
        let stream = if stream.is_empty() {
            DEFAULT_STREAM.to_string()
        } else {
            stream
        };
        Self {
            conn,
            stream,
            key_prefix: "courier:",
            ttl,
            max_len,
        }
    }

    fn snapshot_key(&self, location: &Location) -> String {
        format!("{}{}", self.key_prefix, location.courier_id())
    }
}

#[async_trait]
impl LocationStore for RedisLocationStore {
    async fn update(&self, location: &Location) -> Result<(), StoreError> {
        let key = self.snapshot_key(location);
        let timestamp = location
            .recorded_at()
            .to_rfc3339_opts(SecondsFormat::Nanos, true);
        let fields = [
            ("courier_id", location.courier_id().to_string()),
            ("lat", location.latitude().to_string()),
            ("long", location.longitude().to_string()),
            ("recorded_at", timestamp),
        ];

        let mut pipe = redis::pipe();
        pipe.hset_multiple(&key, &fields).ignore();
        if !self.ttl.is_zero() {
            pipe.expire(&key, self.ttl.as_secs() as i64).ignore();
        }

        let xadd = pipe.cmd("XADD").arg(&self.stream);
        if self.max_len > 0 {
            xadd.arg("MAXLEN").arg("~").arg(self.max_len);
        }
        xadd.arg("*").arg(&fields).ignore();

        let mut conn = self.conn.clone();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|err| StoreError::Unavailable(Box::new(err)))?;
        Ok(())
    }
}
