//! Durable and hot stores for courier locations.
//!
//! The Redis store keeps the latest snapshot per courier and a bounded
//! event stream, updated in one pipelined round trip. The PostgreSQL store
//! keeps the append-only location history.

pub mod history;
pub mod redis_store;

pub use history::PostgresLocationHistory;
pub use redis_store::RedisLocationStore;
