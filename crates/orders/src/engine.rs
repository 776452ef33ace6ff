//! The order saga engine.

use std::sync::Arc;

use common::{CourierId, OrderId, UserId};

use crate::clients::{CourierClient, PaymentClient};
use crate::error::OrderError;
use crate::saga::{SagaStatus, SagaStep, SagaStore, StepStatus};

type OrderIdGen = Arc<dyn Fn() -> OrderId + Send + Sync>;
type CourierIdGen = Arc<dyn Fn() -> CourierId + Send + Sync>;

/// Orchestrates order creation: charge the payment, assign a courier,
/// refund the charge when assignment fails.
///
/// Side effects within one invocation occur strictly in the order
/// `charge → assign → (refund?)`. Step-log and terminal-status writes are
/// best effort; their failure never masks the operational outcome.
pub struct OrderSagaEngine<P, C, S> {
    payments: P,
    couriers: C,
    sagas: S,
    order_ids: OrderIdGen,
    courier_ids: CourierIdGen,
}

impl<P, C, S> OrderSagaEngine<P, C, S>
where
    P: PaymentClient,
    C: CourierClient,
    S: SagaStore,
{
    /// Creates an engine with random id generators.
    pub fn new(payments: P, couriers: C, sagas: S) -> Self {
        Self {
            payments,
            couriers,
            sagas,
            order_ids: Arc::new(OrderId::generate),
            courier_ids: Arc::new(CourierId::generate),
        }
    }

    /// Replaces the id generators; tests inject deterministic ones.
    pub fn with_id_generators(mut self, order_ids: OrderIdGen, courier_ids: CourierIdGen) -> Self {
        self.order_ids = order_ids;
        self.courier_ids = courier_ids;
        self
    }

    /// Creates an order, deduplicated by `idempotency_key`.
    ///
    /// Returns the order id on success, or the id of a previously completed
    /// saga when the key replays a `Succeeded` run.
    #[tracing::instrument(skip(self))]
    pub async fn create_order(
        &self,
        user_id: &UserId,
        amount: f64,
        idempotency_key: &str,
    ) -> Result<OrderId, OrderError> {
        if idempotency_key.is_empty() {
            return Err(OrderError::IdempotencyKeyRequired);
        }

        let order_id = (self.order_ids)();
        let courier_id = (self.courier_ids)();

        let (record, created) = self
            .sagas
            .start(idempotency_key, &order_id, user_id, amount)
            .await?;

        if !created {
            return match record.status {
                SagaStatus::Succeeded => {
                    tracing::info!(order_id = %record.order_id, "idempotent replay of completed order");
                    Ok(record.order_id)
                }
                status => Err(OrderError::AlreadyProcessed(status)),
            };
        }

        metrics::counter!("orders_saga_started_total").increment(1);

        self.log_step(&order_id, SagaStep::Charge, StepStatus::Started, "")
            .await;
        if let Err(err) = self.payments.charge(&order_id, amount).await {
            self.log_step(&order_id, SagaStep::Charge, StepStatus::Failed, &err.to_string())
                .await;
            self.finish(&order_id, SagaStatus::Failed).await;
            return Err(OrderError::PaymentFailed(err));
        }
        self.log_step(&order_id, SagaStep::Charge, StepStatus::Succeeded, "")
            .await;

        self.log_step(&order_id, SagaStep::Assign, StepStatus::Started, "")
            .await;
        let assign_err = match self.couriers.assign(&order_id, &courier_id).await {
            Ok(()) => {
                self.log_step(&order_id, SagaStep::Assign, StepStatus::Succeeded, "")
                    .await;
                self.finish(&order_id, SagaStatus::Succeeded).await;
                metrics::counter!("orders_saga_succeeded_total").increment(1);
                return Ok(order_id);
            }
            Err(err) => err,
        };

        self.log_step(
            &order_id,
            SagaStep::Assign,
            StepStatus::Failed,
            &assign_err.to_string(),
        )
        .await;
        tracing::warn!(%order_id, error = %assign_err, "assignment failed, refunding charge");
        metrics::counter!("orders_saga_compensated_total").increment(1);

        self.log_step(&order_id, SagaStep::Refund, StepStatus::Started, "")
            .await;
        match self.payments.refund(&order_id, amount).await {
            Ok(()) => {
                self.log_step(&order_id, SagaStep::Refund, StepStatus::Succeeded, "")
                    .await;
                self.finish(&order_id, SagaStatus::Refunded).await;
                Err(OrderError::AssignFailed(assign_err))
            }
            Err(refund_err) => {
                self.log_step(
                    &order_id,
                    SagaStep::Refund,
                    StepStatus::Failed,
                    &refund_err.to_string(),
                )
                .await;
                self.finish(&order_id, SagaStatus::Failed).await;
                tracing::error!(%order_id, error = %refund_err, "refund failed after assignment failure");
                Err(OrderError::AssignAndRefundFailed {
                    assign: assign_err,
                    refund: refund_err,
                })
            }
        }
    }

    /// Appends an audit step; failures are logged and swallowed.
    async fn log_step(&self, order_id: &OrderId, step: SagaStep, status: StepStatus, detail: &str) {
        if let Err(err) = self.sagas.add_step(order_id, step, status, detail).await {
            tracing::warn!(%order_id, step = %step, status = %status, error = %err, "failed to record saga step");
        }
    }

    /// Sets the terminal status; failures are logged and swallowed, leaving
    /// the saga `Started` for out-of-band reconciliation.
    async fn finish(&self, order_id: &OrderId, status: SagaStatus) {
        if let Err(err) = self.sagas.update_status(order_id, status).await {
            tracing::warn!(%order_id, status = %status, error = %err, "failed to update saga status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{InMemoryCourierClient, InMemoryPaymentClient};
    use crate::saga::{InMemorySagaStore, StepRow};

    type TestEngine =
        OrderSagaEngine<InMemoryPaymentClient, InMemoryCourierClient, InMemorySagaStore>;

    struct Harness {
        engine: TestEngine,
        payments: InMemoryPaymentClient,
        couriers: InMemoryCourierClient,
        sagas: InMemorySagaStore,
    }

    fn setup(order_id: &'static str, courier_id: &'static str) -> Harness {
        let payments = InMemoryPaymentClient::new();
        let couriers = InMemoryCourierClient::new();
        let sagas = InMemorySagaStore::new();
        let engine = OrderSagaEngine::new(payments.clone(), couriers.clone(), sagas.clone())
            .with_id_generators(
                Arc::new(move || OrderId::new(order_id)),
                Arc::new(move || CourierId::new(courier_id)),
            );
        Harness {
            engine,
            payments,
            couriers,
            sagas,
        }
    }

    fn step_names(steps: &[StepRow]) -> Vec<(SagaStep, StepStatus)> {
        steps.iter().map(|row| (row.step, row.status)).collect()
    }

    #[tokio::test]
    async fn happy_path_charges_and_assigns() {
        let h = setup("o1", "c1");
        let user = UserId::new("u1");

        let order_id = h.engine.create_order(&user, 9.99, "k1").await.unwrap();
        assert_eq!(order_id.as_str(), "o1");

        let record = h.sagas.record_for_key("k1").unwrap();
        assert_eq!(record.status, SagaStatus::Succeeded);

        assert_eq!(
            step_names(&h.sagas.steps_for(&order_id)),
            vec![
                (SagaStep::Charge, StepStatus::Started),
                (SagaStep::Charge, StepStatus::Succeeded),
                (SagaStep::Assign, StepStatus::Started),
                (SagaStep::Assign, StepStatus::Succeeded),
            ]
        );
        assert!(h.payments.was_charged(&order_id));
        assert_eq!(
            h.couriers.assignment(&order_id).unwrap().as_str(),
            "c1"
        );
    }

    #[tokio::test]
    async fn assign_failure_refunds_the_charge() {
        let h = setup("o2", "c1");
        h.couriers.set_fail_on_assign(true);
        let user = UserId::new("u1");

        let err = h.engine.create_order(&user, 19.99, "k2").await.unwrap_err();
        assert!(err.is_assign_failed());
        assert!(matches!(err, OrderError::AssignFailed(_)));

        let order_id = OrderId::new("o2");
        let record = h.sagas.record_for_key("k2").unwrap();
        assert_eq!(record.status, SagaStatus::Refunded);

        assert_eq!(
            step_names(&h.sagas.steps_for(&order_id)),
            vec![
                (SagaStep::Charge, StepStatus::Started),
                (SagaStep::Charge, StepStatus::Succeeded),
                (SagaStep::Assign, StepStatus::Started),
                (SagaStep::Assign, StepStatus::Failed),
                (SagaStep::Refund, StepStatus::Started),
                (SagaStep::Refund, StepStatus::Succeeded),
            ]
        );
        assert!(h.payments.was_refunded(&order_id));
        assert_eq!(h.payments.refund_amount(&order_id), Some(19.99));
        assert!(h.couriers.assignment(&order_id).is_none());
    }

    #[tokio::test]
    async fn assign_and_refund_failure_returns_composite() {
        let h = setup("o3", "c1");
        h.couriers.set_fail_on_assign(true);
        h.payments.set_fail_on_refund(true);
        let user = UserId::new("u1");

        let err = h.engine.create_order(&user, 29.99, "k3").await.unwrap_err();
        assert!(matches!(err, OrderError::AssignAndRefundFailed { .. }));
        assert!(err.is_assign_failed());
        assert!(err.is_refund_failed());

        let order_id = OrderId::new("o3");
        let record = h.sagas.record_for_key("k3").unwrap();
        assert_eq!(record.status, SagaStatus::Failed);
        assert!(h.payments.was_charged(&order_id));
        assert!(!h.payments.was_refunded(&order_id));
    }

    #[tokio::test]
    async fn charge_failure_never_touches_the_courier() {
        let h = setup("o4", "c1");
        h.payments.set_fail_on_charge(true);
        let user = UserId::new("u1");

        let err = h.engine.create_order(&user, 49.99, "k4").await.unwrap_err();
        assert!(err.is_payment_failed());
        assert!(err.to_string().starts_with("payment failed: "));

        let order_id = OrderId::new("o4");
        let record = h.sagas.record_for_key("k4").unwrap();
        assert_eq!(record.status, SagaStatus::Failed);

        assert_eq!(
            step_names(&h.sagas.steps_for(&order_id)),
            vec![
                (SagaStep::Charge, StepStatus::Started),
                (SagaStep::Charge, StepStatus::Failed),
            ]
        );
        assert!(!h.payments.was_charged(&order_id));
        assert_eq!(h.couriers.assignment_count(), 0);
    }

    #[tokio::test]
    async fn replay_of_completed_saga_returns_original_order() {
        let h = setup("oX", "c1");
        let user = UserId::new("u1");

        let first = h.engine.create_order(&user, 10.0, "k5").await.unwrap();
        assert_eq!(first.as_str(), "oX");
        let steps_before = h.sagas.step_count();

        let replay = h.engine.create_order(&user, 10.0, "k5").await.unwrap();
        assert_eq!(replay, first);
        // No new side effects, no new audit rows.
        assert_eq!(h.sagas.step_count(), steps_before);
        assert_eq!(h.payments.charge_count(), 1);
        assert_eq!(h.couriers.assignment_count(), 1);
    }

    #[tokio::test]
    async fn replay_of_incomplete_saga_is_rejected() {
        let h = setup("o6", "c1");
        h.couriers.set_fail_on_assign(true);
        let user = UserId::new("u1");

        // First run ends Refunded.
        let _ = h.engine.create_order(&user, 5.0, "k6").await.unwrap_err();

        let err = h.engine.create_order(&user, 5.0, "k6").await.unwrap_err();
        assert!(matches!(
            err,
            OrderError::AlreadyProcessed(SagaStatus::Refunded)
        ));
        assert_eq!(h.payments.charge_count(), 1);
    }

    #[tokio::test]
    async fn conflicting_payload_is_rejected() {
        let h = setup("o7", "c1");
        let user = UserId::new("u1");

        h.engine.create_order(&user, 10.0, "k7").await.unwrap();
        let err = h.engine.create_order(&user, 99.0, "k7").await.unwrap_err();
        assert!(matches!(err, OrderError::IdempotencyConflict));
    }

    #[tokio::test]
    async fn empty_idempotency_key_is_rejected() {
        let h = setup("o8", "c1");
        let err = h
            .engine
            .create_order(&UserId::new("u1"), 10.0, "")
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::IdempotencyKeyRequired));
        assert_eq!(h.payments.charge_count(), 0);
    }

    #[tokio::test]
    async fn step_log_failures_do_not_mask_success() {
        let h = setup("o9", "c1");
        h.sagas.set_fail_on_add_step(true);
        let user = UserId::new("u1");

        let order_id = h.engine.create_order(&user, 9.0, "k9").await.unwrap();
        assert!(h.payments.was_charged(&order_id));
        assert_eq!(h.sagas.step_count(), 0);
        assert_eq!(
            h.sagas.record_for_key("k9").unwrap().status,
            SagaStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn terminal_status_failure_leaves_saga_started() {
        let h = setup("o10", "c1");
        h.sagas.set_fail_on_update_status(true);
        let user = UserId::new("u1");

        let order_id = h.engine.create_order(&user, 9.0, "k10").await.unwrap();
        assert!(h.payments.was_charged(&order_id));
        assert_eq!(
            h.sagas.record_for_key("k10").unwrap().status,
            SagaStatus::Started
        );
    }
}
