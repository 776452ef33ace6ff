//! Order service adapter.

use std::sync::Arc;

use common::UserId;
use orders::{ClientError, CourierClient, OrderError, OrderSagaEngine, PaymentClient, SagaStore};
use tonic::{Request, Response, Status};

use crate::pb::order_service_server::OrderService;
use crate::pb::{CreateOrderRequest, CreateOrderResponse};

/// Adapts the saga engine to the `OrderService` RPC.
pub struct OrderGrpc<P, C, S> {
    engine: Arc<OrderSagaEngine<P, C, S>>,
}

impl<P, C, S> OrderGrpc<P, C, S> {
    pub fn new(engine: Arc<OrderSagaEngine<P, C, S>>) -> Self {
        Self { engine }
    }
}

#[tonic::async_trait]
impl<P, C, S> OrderService for OrderGrpc<P, C, S>
where
    P: PaymentClient + 'static,
    C: CourierClient + 'static,
    S: SagaStore + 'static,
{
    async fn create_order(
        &self,
        request: Request<CreateOrderRequest>,
    ) -> Result<Response<CreateOrderResponse>, Status> {
        let req = request.into_inner();
        let user_id = UserId::new(req.user_id);

        let order_id = self
            .engine
            .create_order(&user_id, req.amount, &req.idempotency_key)
            .await
            .map_err(map_order_error)?;

        Ok(Response::new(CreateOrderResponse {
            order_id: order_id.to_string(),
            status: "ok".to_string(),
            message: "order created".to_string(),
        }))
    }
}

/// Maps the domain error taxonomy onto transport status codes. The message
/// carries only the error's display form, never internals.
pub(crate) fn map_order_error(err: OrderError) -> Status {
    match client_cause(&err) {
        Some(ClientError::Canceled) => return Status::cancelled(err.to_string()),
        Some(ClientError::DeadlineExceeded) => return Status::deadline_exceeded(err.to_string()),
        _ => {}
    }

    match &err {
        OrderError::IdempotencyKeyRequired => Status::invalid_argument(err.to_string()),
        OrderError::IdempotencyConflict | OrderError::PaymentFailed(_) => {
            Status::failed_precondition(err.to_string())
        }
        _ => Status::internal(err.to_string()),
    }
}

/// The outbound-call failure underlying the saga error, if any.
fn client_cause(err: &OrderError) -> Option<&ClientError> {
    match err {
        OrderError::PaymentFailed(cause)
        | OrderError::AssignFailed(cause)
        | OrderError::RefundFailed(cause) => Some(cause),
        OrderError::AssignAndRefundFailed { assign, .. } => Some(assign),
        _ => None,
    }
}
