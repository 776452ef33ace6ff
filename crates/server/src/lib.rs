//! gRPC service shell: adapters, ingress rate limiting, metrics, health,
//! observability endpoints, configuration, and wiring.

pub mod adapters;
pub mod app;
pub mod config;
pub mod metrics;
pub mod middleware;
pub mod observability;

/// Generated protobuf/gRPC types.
pub mod pb {
    tonic::include_proto!("dispatch");

    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("dispatch_descriptor");
}
