//! Saga records, step log, and the persistence seam.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of an order saga.
///
/// `Started` is the only non-terminal status:
/// ```text
/// Started ──┬──► Succeeded
///           ├──► Refunded   (assign failed, refund succeeded)
///           └──► Failed     (charge failed, or refund failed too)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SagaStatus {
    Started,
    Succeeded,
    Failed,
    Refunded,
}

impl SagaStatus {
    /// Returns the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Started => "started",
            SagaStatus::Succeeded => "succeeded",
            SagaStatus::Failed => "failed",
            SagaStatus::Refunded => "refunded",
        }
    }

    /// Returns true if no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SagaStatus::Started)
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SagaStatus {
    type Err = SagaStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(SagaStatus::Started),
            "succeeded" => Ok(SagaStatus::Succeeded),
            "failed" => Ok(SagaStatus::Failed),
            "refunded" => Ok(SagaStatus::Refunded),
            other => Err(SagaStoreError::Unavailable(
                format!("unknown saga status {other:?}").into(),
            )),
        }
    }
}

/// A side-effect step within a saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SagaStep {
    Charge,
    Assign,
    Refund,
}

impl SagaStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::Charge => "charge",
            SagaStep::Assign => "assign",
            SagaStep::Refund => "refund",
        }
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome recorded for a saga step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepStatus {
    Started,
    Succeeded,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Started => "started",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored saga header.
#[derive(Debug, Clone, PartialEq)]
pub struct SagaRecord {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount: f64,
    pub status: SagaStatus,
}

/// Errors from the saga store.
#[derive(Debug, Error)]
pub enum SagaStoreError {
    /// The idempotency key was reused with a different payload.
    #[error("idempotency key reused with different payload")]
    IdempotencyConflict,

    /// The store could not serve the request.
    #[error("saga store unavailable: {0}")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Persists saga headers and the append-only step log.
///
/// `start` is the idempotency gate: exactly one record may exist per key,
/// and the insert-and-read is observable as a single logical check.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Inserts a new `Started` header, or returns the existing record for
    /// the key with `created = false`. Fails with
    /// [`SagaStoreError::IdempotencyConflict`] when the existing record was
    /// created with a different `(user_id, amount)`.
    async fn start(
        &self,
        idempotency_key: &str,
        order_id: &OrderId,
        user_id: &UserId,
        amount: f64,
    ) -> Result<(SagaRecord, bool), SagaStoreError>;

    /// Sets the saga status. Idempotent.
    async fn update_status(
        &self,
        order_id: &OrderId,
        status: SagaStatus,
    ) -> Result<(), SagaStoreError>;

    /// Appends a step row to the audit log.
    async fn add_step(
        &self,
        order_id: &OrderId,
        step: SagaStep,
        status: StepStatus,
        detail: &str,
    ) -> Result<(), SagaStoreError>;
}

/// A recorded step row, exposed by the in-memory store for assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRow {
    pub order_id: OrderId,
    pub step: SagaStep,
    pub status: StepStatus,
    pub detail: String,
}

#[derive(Debug, Default)]
struct InMemorySagaState {
    records: HashMap<String, SagaRecord>,
    keys_by_order: HashMap<OrderId, String>,
    steps: Vec<StepRow>,
    fail_on_add_step: bool,
    fail_on_update_status: bool,
}

/// In-memory saga store for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemorySagaStore {
    state: Arc<RwLock<InMemorySagaState>>,
}

impl InMemorySagaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes step writes fail, to exercise best-effort logging.
    pub fn set_fail_on_add_step(&self, fail: bool) {
        self.state.write().unwrap().fail_on_add_step = fail;
    }

    /// Makes status updates fail, to exercise best-effort terminal writes.
    pub fn set_fail_on_update_status(&self, fail: bool) {
        self.state.write().unwrap().fail_on_update_status = fail;
    }

    /// Returns the record stored for the idempotency key, if any.
    pub fn record_for_key(&self, key: &str) -> Option<SagaRecord> {
        self.state.read().unwrap().records.get(key).cloned()
    }

    /// Returns all step rows recorded for the order, in append order.
    pub fn steps_for(&self, order_id: &OrderId) -> Vec<StepRow> {
        self.state
            .read()
            .unwrap()
            .steps
            .iter()
            .filter(|row| &row.order_id == order_id)
            .cloned()
            .collect()
    }

    /// Total number of step rows across all sagas.
    pub fn step_count(&self) -> usize {
        self.state.read().unwrap().steps.len()
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn start(
        &self,
        idempotency_key: &str,
        order_id: &OrderId,
        user_id: &UserId,
        amount: f64,
    ) -> Result<(SagaRecord, bool), SagaStoreError> {
        let mut state = self.state.write().unwrap();

        if let Some(existing) = state.records.get(idempotency_key) {
            if &existing.user_id != user_id || existing.amount != amount {
                return Err(SagaStoreError::IdempotencyConflict);
            }
            return Ok((existing.clone(), false));
        }

        let record = SagaRecord {
            order_id: order_id.clone(),
            user_id: user_id.clone(),
            amount,
            status: SagaStatus::Started,
        };
        state
            .records
            .insert(idempotency_key.to_string(), record.clone());
        state
            .keys_by_order
            .insert(order_id.clone(), idempotency_key.to_string());
        Ok((record, true))
    }

    async fn update_status(
        &self,
        order_id: &OrderId,
        status: SagaStatus,
    ) -> Result<(), SagaStoreError> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_update_status {
            return Err(SagaStoreError::Unavailable("saga store down".into()));
        }
        if let Some(key) = state.keys_by_order.get(order_id).cloned() {
            if let Some(record) = state.records.get_mut(&key) {
                record.status = status;
            }
        }
        Ok(())
    }

    async fn add_step(
        &self,
        order_id: &OrderId,
        step: SagaStep,
        status: StepStatus,
        detail: &str,
    ) -> Result<(), SagaStoreError> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_add_step {
            return Err(SagaStoreError::Unavailable("saga store down".into()));
        }
        state.steps.push(StepRow {
            order_id: order_id.clone(),
            step,
            status,
            detail: detail.to_string(),
        });
        Ok(())
    }
}
