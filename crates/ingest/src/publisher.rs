//! Location publishers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::Location;
use serde::Serialize;

use crate::broadcast::Broadcaster;
use crate::store::{LocationStore, StoreError};

/// Publishes courier location events.
#[async_trait]
pub trait LocationPublisher: Send + Sync {
    async fn publish(&self, location: &Location) -> Result<(), StoreError>;
}

/// Publishes locations into a [`LocationStore`].
pub struct StorePublisher {
    store: Arc<dyn LocationStore>,
}

impl StorePublisher {
    pub fn new(store: Arc<dyn LocationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl LocationPublisher for StorePublisher {
    async fn publish(&self, location: &Location) -> Result<(), StoreError> {
        self.store.update(location).await
    }
}

/// Canonical broadcast payload.
#[derive(Debug, Serialize)]
struct LocationEvent<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    courier_id: &'a str,
    lat: f64,
    long: f64,
    recorded_at: DateTime<Utc>,
}

/// Writes durably through an inner publisher, then broadcasts.
///
/// The broadcast is advisory: it only happens after the durable write
/// succeeded, and a broadcaster that cannot accept the message drops it.
pub struct FanoutPublisher {
    inner: Arc<dyn LocationPublisher>,
    broadcaster: Option<Arc<dyn Broadcaster>>,
}

impl FanoutPublisher {
    pub fn new(inner: Arc<dyn LocationPublisher>, broadcaster: Option<Arc<dyn Broadcaster>>) -> Self {
        Self { inner, broadcaster }
    }
}

#[async_trait]
impl LocationPublisher for FanoutPublisher {
    async fn publish(&self, location: &Location) -> Result<(), StoreError> {
        self.inner.publish(location).await?;

        let payload = serde_json::to_vec(&LocationEvent {
            kind: "location",
            courier_id: location.courier_id().as_str(),
            lat: location.latitude(),
            long: location.longitude(),
            recorded_at: location.recorded_at(),
        })?;

        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.broadcast(payload);
        }

        Ok(())
    }
}
