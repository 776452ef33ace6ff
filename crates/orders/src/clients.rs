//! Outbound payment and courier-directory clients.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{CourierId, OrderId};
use thiserror::Error;

/// Errors surfaced by outbound clients.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The protecting circuit breaker is open.
    #[error("circuit breaker open")]
    CircuitOpen,

    /// The caller canceled the operation.
    #[error("operation canceled")]
    Canceled,

    /// The operation ran out of time.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A charge already exists for the order.
    #[error("order already charged")]
    AlreadyCharged,

    /// A refund was requested for an order that was never charged.
    #[error("order not charged")]
    NotCharged,

    /// A refund already exists with a different amount.
    #[error("order already refunded")]
    AlreadyRefunded,

    /// The order is assigned to a different courier.
    #[error("order already assigned to a different courier")]
    CourierConflict,

    /// The backing store or remote service could not serve the call.
    #[error("unavailable: {0}")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ClientError {
    /// Retry classification: everything is retryable except cancellation,
    /// deadline expiry, and an open breaker.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ClientError::CircuitOpen | ClientError::Canceled | ClientError::DeadlineExceeded
        )
    }
}

/// Charges and refunds a payment instrument for an order.
#[async_trait]
pub trait PaymentClient: Send + Sync {
    async fn charge(&self, order_id: &OrderId, amount: f64) -> Result<(), ClientError>;

    async fn refund(&self, order_id: &OrderId, amount: f64) -> Result<(), ClientError>;
}

/// Assigns a courier to an order.
#[async_trait]
pub trait CourierClient: Send + Sync {
    async fn assign(&self, order_id: &OrderId, courier_id: &CourierId) -> Result<(), ClientError>;
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    charges: HashMap<OrderId, f64>,
    refunds: HashMap<OrderId, f64>,
    refunded: HashSet<OrderId>,
    fail_on_charge: bool,
    fail_on_refund: bool,
}

/// In-memory payment client for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentClient {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every charge fail.
    pub fn set_fail_on_charge(&self, fail: bool) {
        self.state.write().unwrap().fail_on_charge = fail;
    }

    /// Makes every refund fail.
    pub fn set_fail_on_refund(&self, fail: bool) {
        self.state.write().unwrap().fail_on_refund = fail;
    }

    /// True if a charge was recorded for the order.
    pub fn was_charged(&self, order_id: &OrderId) -> bool {
        self.state.read().unwrap().charges.contains_key(order_id)
    }

    /// True if a refund was recorded for the order.
    pub fn was_refunded(&self, order_id: &OrderId) -> bool {
        self.state.read().unwrap().refunded.contains(order_id)
    }

    /// The refunded amount for the order, if any.
    pub fn refund_amount(&self, order_id: &OrderId) -> Option<f64> {
        self.state.read().unwrap().refunds.get(order_id).copied()
    }

    /// Number of recorded charges.
    pub fn charge_count(&self) -> usize {
        self.state.read().unwrap().charges.len()
    }
}

#[async_trait]
impl PaymentClient for InMemoryPaymentClient {
    async fn charge(&self, order_id: &OrderId, amount: f64) -> Result<(), ClientError> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_charge {
            return Err(ClientError::Unavailable("payment declined".into()));
        }
        state.charges.insert(order_id.clone(), amount);
        Ok(())
    }

    async fn refund(&self, order_id: &OrderId, amount: f64) -> Result<(), ClientError> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_refund {
            return Err(ClientError::Unavailable("refund declined".into()));
        }
        if !state.charges.contains_key(order_id) {
            return Err(ClientError::NotCharged);
        }
        state.refunds.insert(order_id.clone(), amount);
        state.refunded.insert(order_id.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryCourierState {
    assignments: HashMap<OrderId, CourierId>,
    fail_on_assign: bool,
}

/// In-memory courier client for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCourierClient {
    state: Arc<RwLock<InMemoryCourierState>>,
}

impl InMemoryCourierClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every assignment fail.
    pub fn set_fail_on_assign(&self, fail: bool) {
        self.state.write().unwrap().fail_on_assign = fail;
    }

    /// The courier assigned to the order, if any.
    pub fn assignment(&self, order_id: &OrderId) -> Option<CourierId> {
        self.state.read().unwrap().assignments.get(order_id).cloned()
    }

    /// Number of recorded assignments.
    pub fn assignment_count(&self) -> usize {
        self.state.read().unwrap().assignments.len()
    }
}

#[async_trait]
impl CourierClient for InMemoryCourierClient {
    async fn assign(&self, order_id: &OrderId, courier_id: &CourierId) -> Result<(), ClientError> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_assign {
            return Err(ClientError::Unavailable("no couriers available".into()));
        }
        match state.assignments.get(order_id) {
            Some(existing) if existing != courier_id => Err(ClientError::CourierConflict),
            _ => {
                state
                    .assignments
                    .insert(order_id.clone(), courier_id.clone());
                Ok(())
            }
        }
    }
}

/// Payment client that always succeeds; useful for wiring without a store.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPaymentClient;

#[async_trait]
impl PaymentClient for NoopPaymentClient {
    async fn charge(&self, _order_id: &OrderId, _amount: f64) -> Result<(), ClientError> {
        Ok(())
    }

    async fn refund(&self, _order_id: &OrderId, _amount: f64) -> Result<(), ClientError> {
        Ok(())
    }
}

/// Courier client that always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCourierClient;

#[async_trait]
impl CourierClient for NoopCourierClient {
    async fn assign(&self, _order_id: &OrderId, _courier_id: &CourierId) -> Result<(), ClientError> {
        Ok(())
    }
}
