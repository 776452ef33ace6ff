//! Courier location value object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::CourierId;

/// Errors produced when constructing a [`Location`] from raw input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LocationError {
    /// The courier id was empty.
    #[error("courier id is required")]
    MissingCourierId,

    /// Latitude was outside [-90, 90].
    #[error("latitude {0} must be between -90 and 90")]
    LatitudeOutOfRange(f64),

    /// Longitude was outside [-180, 180].
    #[error("longitude {0} must be between -180 and 180")]
    LongitudeOutOfRange(f64),

    /// The timestamp could not be interpreted as an instant.
    #[error("invalid timestamp")]
    InvalidTimestamp,
}

/// A validated courier location report.
///
/// Constructed only through [`Location::new`]; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    courier_id: CourierId,
    latitude: f64,
    longitude: f64,
    recorded_at: DateTime<Utc>,
}

impl Location {
    /// Validates the raw fields and constructs a location.
    pub fn new(
        courier_id: impl Into<CourierId>,
        latitude: f64,
        longitude: f64,
        recorded_at: DateTime<Utc>,
    ) -> Result<Self, LocationError> {
        let courier_id = courier_id.into();
        if courier_id.is_empty() {
            return Err(LocationError::MissingCourierId);
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(LocationError::LatitudeOutOfRange(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(LocationError::LongitudeOutOfRange(longitude));
        }

        Ok(Self {
            courier_id,
            latitude,
            longitude,
            recorded_at,
        })
    }

    /// The reporting courier.
    pub fn courier_id(&self) -> &CourierId {
        &self.courier_id
    }

    /// Latitude in degrees.
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    /// Longitude in degrees.
    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// When the position was recorded.
    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }
}
