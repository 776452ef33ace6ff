//! Order saga error taxonomy.

use thiserror::Error;

use crate::clients::ClientError;
use crate::saga::{SagaStatus, SagaStoreError};

/// Errors returned by [`crate::OrderSagaEngine::create_order`].
#[derive(Debug, Error)]
pub enum OrderError {
    /// The caller supplied an empty idempotency key.
    #[error("idempotency key is required")]
    IdempotencyKeyRequired,

    /// The idempotency key was reused with a different payload.
    #[error("idempotency key reused with different payload")]
    IdempotencyConflict,

    /// A saga already exists for the key and did not end in success.
    #[error("order already processed with status {0}")]
    AlreadyProcessed(SagaStatus),

    /// The charge step failed; no side effects remain.
    #[error("payment failed: {0}")]
    PaymentFailed(#[source] ClientError),

    /// The assign step failed and the charge was refunded.
    #[error("assign failed: {0}")]
    AssignFailed(#[source] ClientError),

    /// A refund failed.
    #[error("refund failed: {0}")]
    RefundFailed(#[source] ClientError),

    /// Assignment failed and the compensating refund failed as well; the
    /// charge remains on record for operator reconciliation.
    #[error("assign failed: {assign}; refund failed: {refund}")]
    AssignAndRefundFailed {
        #[source]
        assign: ClientError,
        refund: ClientError,
    },

    /// The saga store could not serve the idempotency gate.
    #[error("saga store: {0}")]
    Store(#[source] SagaStoreError),
}

impl OrderError {
    /// True if the failure is ultimately a payment-charge failure.
    pub fn is_payment_failed(&self) -> bool {
        matches!(self, OrderError::PaymentFailed(_))
    }

    /// True if the failure involves a courier-assignment failure.
    pub fn is_assign_failed(&self) -> bool {
        matches!(
            self,
            OrderError::AssignFailed(_) | OrderError::AssignAndRefundFailed { .. }
        )
    }

    /// True if the failure involves a refund failure.
    pub fn is_refund_failed(&self) -> bool {
        matches!(
            self,
            OrderError::RefundFailed(_) | OrderError::AssignAndRefundFailed { .. }
        )
    }
}

impl From<SagaStoreError> for OrderError {
    fn from(err: SagaStoreError) -> Self {
        match err {
            SagaStoreError::IdempotencyConflict => OrderError::IdempotencyConflict,
            other => OrderError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn composite_error_exposes_assign_as_source() {
        let err = OrderError::AssignAndRefundFailed {
            assign: ClientError::Unavailable("no couriers".into()),
            refund: ClientError::Unavailable("refund declined".into()),
        };
        assert!(err.is_assign_failed());
        assert!(err.is_refund_failed());
        assert!(!err.is_payment_failed());

        let source = err.source().expect("source");
        assert!(source.to_string().contains("no couriers"));
        assert!(err.to_string().contains("refund declined"));
    }

    #[test]
    fn store_conflict_maps_to_idempotency_conflict() {
        let err: OrderError = SagaStoreError::IdempotencyConflict.into();
        assert!(matches!(err, OrderError::IdempotencyConflict));

        let err: OrderError = SagaStoreError::Unavailable("db down".into()).into();
        assert!(matches!(err, OrderError::Store(_)));
    }

    #[test]
    fn payment_failure_display_carries_cause() {
        let err = OrderError::PaymentFailed(ClientError::Unavailable("declined".into()));
        assert_eq!(err.to_string(), "payment failed: unavailable: declined");
        assert!(err.is_payment_failed());
    }
}
