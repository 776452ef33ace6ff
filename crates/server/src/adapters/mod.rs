//! gRPC adapters: wire requests in, domain errors out as status codes.

pub mod driver;
pub mod order;

pub use driver::DriverGrpc;
pub use order::OrderGrpc;

/// Service names as registered with the health registry.
pub const ORDER_SERVICE_NAME: &str = "dispatch.OrderService";
pub const DRIVER_SERVICE_NAME: &str = "dispatch.DriverService";
