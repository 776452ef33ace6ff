//! Courier location ingest pipeline.
//!
//! Streamed location updates flow through the [`IngestService`] into a
//! [`LocationPublisher`]. The [`FanoutPublisher`] writes durably first and
//! then broadcasts a canonical JSON event without blocking; the
//! [`MultiLocationStore`] fans a write out to every configured store and
//! accumulates their failures.

pub mod broadcast;
pub mod memory;
pub mod publisher;
pub mod service;
pub mod store;

pub use broadcast::{Broadcaster, ChannelBroadcaster};
pub use memory::InMemoryLocationStore;
pub use publisher::{FanoutPublisher, LocationPublisher, StorePublisher};
pub use service::IngestService;
pub use store::{LocationStore, MultiLocationStore, StoreError};
