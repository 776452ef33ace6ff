//! Ingest service seam.

use std::sync::Arc;

use common::Location;

use crate::publisher::LocationPublisher;
use crate::store::StoreError;

/// Receives validated location updates and forwards them to a publisher.
pub struct IngestService {
    publisher: Arc<dyn LocationPublisher>,
}

impl IngestService {
    pub fn new(publisher: Arc<dyn LocationPublisher>) -> Self {
        Self { publisher }
    }

    /// Forwards the location to the configured publisher.
    pub async fn ingest(&self, location: &Location) -> Result<(), StoreError> {
        self.publisher.publish(location).await
    }
}
