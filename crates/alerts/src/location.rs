//! Location provider boundary.
//!
//! The device decides how a fix is obtained (GPS, network, permission
//! prompts). The core asks for one reading and treats any failure as the
//! location being unavailable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::entities::GeoPoint;

/// A single location fix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationReading {
    pub point: GeoPoint,
    /// Horizontal accuracy in meters, when the provider reports one
    pub accuracy_m: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Why a provider could not produce a reading
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("no location fix within {0}s")]
    Timeout(u64),

    #[error("location provider failed: {0}")]
    Provider(String),
}

/// Supplies the device's current location on request.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current(&self) -> Result<LocationReading, LocationError>;
}

/// Provider that always answers with the same point (CLI, fixtures).
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation {
    point: GeoPoint,
    accuracy_m: Option<f64>,
}

impl FixedLocation {
    #[must_use]
    pub const fn new(point: GeoPoint) -> Self {
        Self {
            point,
            accuracy_m: None,
        }
    }

    #[must_use]
    pub const fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy_m = Some(accuracy_m);
        self
    }
}

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn current(&self) -> Result<LocationReading, LocationError> {
        Ok(LocationReading {
            point: self.point,
            accuracy_m: self.accuracy_m,
            timestamp: Utc::now(),
        })
    }
}
