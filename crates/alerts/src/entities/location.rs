//! Geographic point type.

use serde::{Deserialize, Serialize};

use crate::errors::{AlertError, AlertResult};

/// A WGS84 latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a point without validating it.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Reject NaN and out-of-range coordinates.
    ///
    /// Latitude must lie in `[-90, 90]` and longitude in `[-180, 180]`.
    pub fn validate(&self) -> AlertResult<()> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(AlertError::InvalidLocation {
                field: "latitude",
                value: self.latitude,
            });
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(AlertError::InvalidLocation {
                field: "longitude",
                value: self.longitude,
            });
        }
        Ok(())
    }

    /// Build a validated point.
    pub fn checked(latitude: f64, longitude: f64) -> AlertResult<Self> {
        let point = Self::new(latitude, longitude);
        point.validate()?;
        Ok(point)
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.5}, {:.5})", self.latitude, self.longitude)
    }
}
