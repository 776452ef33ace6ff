//! Shared identifier and value types used across the dispatch backend.

pub mod ids;
pub mod location;

pub use ids::{CourierId, OrderId, UserId};
pub use location::{Location, LocationError};
