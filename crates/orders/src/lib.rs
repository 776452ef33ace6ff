//! Order saga orchestration: charge a payment, assign a courier, refund on
//! assignment failure.
//!
//! The [`OrderSagaEngine`] drives the flow against pluggable
//! [`PaymentClient`], [`CourierClient`], and [`SagaStore`] implementations.
//! Reliability-wrapped client decorators compose the retry, breaker, and
//! rate-limit primitives around every outbound call.

pub mod clients;
pub mod engine;
pub mod error;
pub mod reliable;
pub mod saga;

pub use clients::{
    ClientError, CourierClient, InMemoryCourierClient, InMemoryPaymentClient, NoopCourierClient,
    NoopPaymentClient, PaymentClient,
};
pub use engine::OrderSagaEngine;
pub use error::OrderError;
pub use reliable::{ReliableCourierClient, ReliablePaymentClient};
pub use saga::{
    InMemorySagaStore, SagaRecord, SagaStatus, SagaStep, SagaStore, SagaStoreError, StepStatus,
};
