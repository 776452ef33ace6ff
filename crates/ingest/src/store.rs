//! Location store seam and the fan-out combinator.

use std::sync::Arc;

use async_trait::async_trait;
use common::Location;
use thiserror::Error;

/// Errors from location stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not serve the write.
    #[error("location store unavailable: {0}")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// One or more stores in a fan-out failed; every failure is carried.
    #[error("{}", fanout_message(.0))]
    Fanout(Vec<StoreError>),

    /// The event payload could not be serialized.
    #[error("encode location event: {0}")]
    Encode(#[from] serde_json::Error),
}

fn fanout_message(errors: &[StoreError]) -> String {
    let parts: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    format!("{} store write(s) failed: {}", errors.len(), parts.join("; "))
}

/// Persists a courier location.
#[async_trait]
pub trait LocationStore: Send + Sync {
    async fn update(&self, location: &Location) -> Result<(), StoreError>;
}

/// Writes to an ordered sequence of stores.
///
/// Every store is called even when an earlier one fails; the accumulated
/// failures surface as a single [`StoreError::Fanout`]. Partial durability
/// in one store never suppresses the others' writes.
pub struct MultiLocationStore {
    stores: Vec<Arc<dyn LocationStore>>,
}

impl MultiLocationStore {
    pub fn new(stores: Vec<Arc<dyn LocationStore>>) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl LocationStore for MultiLocationStore {
    async fn update(&self, location: &Location) -> Result<(), StoreError> {
        let mut errors = Vec::new();
        for store in &self.stores {
            if let Err(err) = store.update(location).await {
                tracing::warn!(courier_id = %location.courier_id(), error = %err, "location store write failed");
                errors.push(err);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Fanout(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingStore {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl LocationStore for CountingStore {
        async fn update(&self, _location: &Location) -> Result<(), StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(StoreError::Unavailable("down".into()))
            } else {
                Ok(())
            }
        }
    }

    fn loc() -> Location {
        Location::new("c1", 1.0, 2.0, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn all_stores_receive_the_write() {
        let a = Arc::new(CountingStore {
            calls: AtomicU32::new(0),
            fail: false,
        });
        let b = Arc::new(CountingStore {
            calls: AtomicU32::new(0),
            fail: false,
        });
        let multi =
            MultiLocationStore::new(vec![a.clone() as Arc<dyn LocationStore>, b.clone()]);

        multi.update(&loc()).await.unwrap();
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_does_not_short_circuit_later_stores() {
        let failing = Arc::new(CountingStore {
            calls: AtomicU32::new(0),
            fail: true,
        });
        let healthy = Arc::new(CountingStore {
            calls: AtomicU32::new(0),
            fail: false,
        });
        let multi = MultiLocationStore::new(vec![
            failing.clone() as Arc<dyn LocationStore>,
            healthy.clone(),
        ]);

        let err = multi.update(&loc()).await.unwrap_err();
        assert_eq!(healthy.calls.load(Ordering::SeqCst), 1);
        match err {
            StoreError::Fanout(errors) => assert_eq!(errors.len(), 1),
            other => panic!("expected fan-out error, got {other}"),
        }
    }

    #[tokio::test]
    async fn every_failure_is_carried_in_the_composite() {
        let a = Arc::new(CountingStore {
            calls: AtomicU32::new(0),
            fail: true,
        });
        let b = Arc::new(CountingStore {
            calls: AtomicU32::new(0),
            fail: true,
        });
        let multi = MultiLocationStore::new(vec![a as Arc<dyn LocationStore>, b]);

        let err = multi.update(&loc()).await.unwrap_err();
        match err {
            StoreError::Fanout(errors) => {
                assert_eq!(errors.len(), 2);
                assert!(err_text(&errors[0]).contains("down"));
            }
            other => panic!("expected fan-out error, got {other}"),
        }
    }

    fn err_text(err: &StoreError) -> String {
        err.to_string()
    }
}
