//! GPS locations and great-circle geometry.
//!
//! All distances are metres on a spherical Earth model. The simulator uses
//! these routines both to place servers and identities and to evaluate
//! location filters in the ground-truth predictor, so they must agree with
//! themselves rather than with any particular geodesy library.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean Earth radius in metres.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Errors constructing a [`GpsLocation`].
#[derive(Debug, Error, PartialEq)]
pub enum GeoError {
    /// Latitude outside [-90, 90].
    #[error("latitude {0} out of range [-90, 90]")]
    Latitude(f64),

    /// Longitude outside (-180, 180].
    #[error("longitude {0} out of range (-180, 180]")]
    Longitude(f64),
}

/// A point on the globe in decimal degrees.
///
/// Longitude is normalised to the half-open interval (-180, 180].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsLocation {
    /// Latitude in degrees, [-90, 90].
    pub latitude: f64,
    /// Longitude in degrees, (-180, 180].
    pub longitude: f64,
}

impl GpsLocation {
    /// Create a location, validating both coordinates.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, GeoError> {
        if !(-90.0..=90.0).contains(&latitude) || latitude.is_nan() {
            return Err(GeoError::Latitude(latitude));
        }
        if longitude <= -180.0 || longitude > 180.0 || longitude.is_nan() {
            return Err(GeoError::Longitude(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Great-circle distance to another location in metres.
    pub fn distance_to(&self, other: &GpsLocation) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_M * c
    }

    /// Destination point given an initial bearing and a distance.
    ///
    /// # Arguments
    /// * `bearing_deg` - Initial bearing in degrees clockwise from north
    /// * `distance_m` - Distance along the great circle in metres
    pub fn destination(&self, bearing_deg: f64, distance_m: f64) -> GpsLocation {
        let bearing = bearing_deg.to_radians();
        let angular = distance_m / EARTH_RADIUS_M;
        let lat1 = self.latitude.to_radians();
        let lon1 = self.longitude.to_radians();

        let lat2 =
            (lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * bearing.cos()).asin();
        let lon2 = lon1
            + (bearing.sin() * angular.sin() * lat1.cos())
                .atan2(angular.cos() - lat1.sin() * lat2.sin());

        let mut lon_deg = lon2.to_degrees();
        // Normalise back into (-180, 180].
        while lon_deg > 180.0 {
            lon_deg -= 360.0;
        }
        while lon_deg <= -180.0 {
            lon_deg += 360.0;
        }

        GpsLocation {
            latitude: lat2.to_degrees().clamp(-90.0, 90.0),
            longitude: lon_deg,
        }
    }
}

impl std::fmt::Display for GpsLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:.6}, {:.6}]", self.latitude, self.longitude)
    }
}
