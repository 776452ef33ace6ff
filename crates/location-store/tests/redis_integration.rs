//! Redis integration tests for the hot location store.
//!
//! Run with:
//!
//! ```bash
//! cargo test -p location-store --test redis_integration
//! ```

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use common::Location;
use ingest::LocationStore;
use location_store::RedisLocationStore;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serial_test::serial;
use testcontainers::{runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

struct TestContainer {
    #[allow(dead_code)] // Container must stay alive for the connection to work
    container: ContainerAsync<Redis>,
    url: String,
}

static TEST_CONTAINER: OnceCell<Arc<TestContainer>> = OnceCell::const_new();
static CONTAINER_ID: OnceLock<String> = OnceLock::new();

#[ctor::dtor]
fn cleanup_container() {
    if let Some(container_id) = CONTAINER_ID.get() {
        let _ = std::process::Command::new("docker")
            .args(["rm", "-f", container_id])
            .output();
    }
}

async fn get_container() -> Arc<TestContainer> {
    TEST_CONTAINER
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("failed to start Redis container");

            let _ = CONTAINER_ID.set(container.id().to_string());

            let port = container
                .get_host_port_ipv4(6379)
                .await
                .expect("failed to get mapped port");
            let url = format!("redis://127.0.0.1:{port}");

            Arc::new(TestContainer { container, url })
        })
        .await
        .clone()
}

async fn connect() -> ConnectionManager {
    let container = get_container().await;
    let client = redis::Client::open(container.url.as_str()).expect("redis client");
    ConnectionManager::new(client).await.expect("redis connect")
}

fn location(courier: &str) -> Location {
    Location::new(
        courier,
        12.34,
        56.78,
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
    )
    .unwrap()
}

#[tokio::test]
#[serial]
async fn update_writes_snapshot_and_stream() {
    let mut conn = connect().await;
    let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await.unwrap();

    let store = RedisLocationStore::new(conn.clone(), "test_events", Duration::from_secs(60), 100);
    store.update(&location("c1")).await.unwrap();

    let fields: std::collections::HashMap<String, String> =
        conn.hgetall("courier:c1").await.unwrap();
    assert_eq!(fields["courier_id"], "c1");
    assert_eq!(fields["lat"], "12.34");
    assert_eq!(fields["long"], "56.78");
    assert!(fields["recorded_at"].starts_with("2024-01-02T03:04:05"));

    let ttl: i64 = conn.ttl("courier:c1").await.unwrap();
    assert!(ttl > 0 && ttl <= 60);

    let len: i64 = conn.xlen("test_events").await.unwrap();
    assert_eq!(len, 1);
}

#[tokio::test]
#[serial]
async fn update_overwrites_latest_and_appends_events() {
    let mut conn = connect().await;
    let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await.unwrap();

    let store = RedisLocationStore::new(conn.clone(), "test_events", Duration::ZERO, 100);
    store.update(&location("c1")).await.unwrap();

    let newer = Location::new("c1", -1.0, -2.0, Utc::now()).unwrap();
    store.update(&newer).await.unwrap();

    let fields: std::collections::HashMap<String, String> =
        conn.hgetall("courier:c1").await.unwrap();
    assert_eq!(fields["lat"], "-1");

    // No TTL configured: key persists.
    let ttl: i64 = conn.ttl("courier:c1").await.unwrap();
    assert_eq!(ttl, -1);

    let len: i64 = conn.xlen("test_events").await.unwrap();
    assert_eq!(len, 2);
}

#[tokio::test]
#[serial]
async fn empty_stream_name_defaults() {
    let mut conn = connect().await;
    let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await.unwrap();

    let store = RedisLocationStore::new(conn.clone(), "", Duration::ZERO, 0);
    store.update(&location("c9")).await.unwrap();

    let len: i64 = conn.xlen("location_events").await.unwrap();
    assert_eq!(len, 1);
}
