//! In-memory location store for tests and store-less wiring.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use common::{CourierId, Location};
use tokio::sync::RwLock;

use crate::store::{LocationStore, StoreError};

#[derive(Debug, Default)]
struct State {
    latest: HashMap<CourierId, Location>,
    events: VecDeque<Location>,
}

/// Keeps the latest snapshot per courier plus a bounded event log,
/// mirroring the hot-store semantics: the oldest events are trimmed once
/// the log exceeds its cap.
#[derive(Clone)]
pub struct InMemoryLocationStore {
    state: Arc<RwLock<State>>,
    max_events: usize,
}

impl InMemoryLocationStore {
    pub fn new(max_events: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            max_events,
        }
    }

    /// Returns the latest snapshot for the courier, if any.
    pub async fn latest(&self, courier_id: &CourierId) -> Option<Location> {
        self.state.read().await.latest.get(courier_id).cloned()
    }

    /// Current number of entries in the event log.
    pub async fn event_count(&self) -> usize {
        self.state.read().await.events.len()
    }

    /// The event log contents, oldest first.
    pub async fn events(&self) -> Vec<Location> {
        self.state.read().await.events.iter().cloned().collect()
    }
}

#[async_trait]
impl LocationStore for InMemoryLocationStore {
    async fn update(&self, location: &Location) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state
            .latest
            .insert(location.courier_id().clone(), location.clone());
        state.events.push_back(location.clone());
        while self.max_events > 0 && state.events.len() > self.max_events {
            state.events.pop_front();
        }
        Ok(())
    }
}
