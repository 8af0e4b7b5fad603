//! Time-bounded geolocated activity value objects.

use crate::geo::GpsLocation;
use crate::server::ServerContact;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Composite activity key: `(type, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityId {
    /// Activity type, free-form.
    pub activity_type: String,
    /// Numeric id, unique within the simulation.
    pub id: u32,
}

impl std::fmt::Display for ActivityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.activity_type, self.id)
    }
}

/// Errors validating an [`ActivityInfo`].
#[derive(Debug, Error, PartialEq)]
pub enum ActivityError {
    /// Expiration not after start.
    #[error("expiration {expiration} not after start {start}")]
    Lifetime {
        /// Start timestamp (unix seconds).
        start: i64,
        /// Expiration timestamp (unix seconds).
        expiration: i64,
    },

    /// Precision radius outside [0, 1000].
    #[error("precision {0} out of range [0, 1000]")]
    Precision(u32),
}

/// The metadata describing one activity.
///
/// Like profiles, activities exist in a *primary* and a *propagated*
/// version; both use this shape. The Ed25519 signature over the canonical
/// wire encoding is carried separately by the owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityInfo {
    /// Protocol version as a semver string.
    pub version: String,
    /// Numeric id, unique within the simulation.
    pub id: u32,
    /// Owner identity id (SHA-256 of the owner's public key).
    pub owner_identity_id: [u8; 32],
    /// Owner's Ed25519 public key.
    pub owner_public_key: Vec<u8>,
    /// Contact of the profile server hosting the owner.
    pub owner_profile_server: ServerContact,
    /// Activity type, free-form.
    pub activity_type: String,
    /// Activity location.
    pub location: GpsLocation,
    /// Location precision radius in metres, [0, 1000].
    pub precision: u32,
    /// Start time, unix seconds.
    pub start_time: i64,
    /// Expiration time, unix seconds; strictly after `start_time`.
    pub expiration_time: i64,
    /// Application-defined extra data.
    pub extra_data: String,
}

impl ActivityInfo {
    /// Validate the lifetime and precision invariants.
    pub fn validate(&self) -> Result<(), ActivityError> {
        if self.expiration_time <= self.start_time {
            return Err(ActivityError::Lifetime {
                start: self.start_time,
                expiration: self.expiration_time,
            });
        }
        if self.precision > 1000 {
            return Err(ActivityError::Precision(self.precision));
        }
        Ok(())
    }

    /// Composite key of this activity.
    pub fn activity_id(&self) -> ActivityId {
        ActivityId {
            activity_type: self.activity_type.clone(),
            id: self.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ActivityInfo {
        ActivityInfo {
            version: "1.0.0".to_string(),
            id: 1,
            owner_identity_id: [0u8; 32],
            owner_public_key: vec![0u8; 32],
            owner_profile_server: ServerContact {
                ip_address: vec![127, 0, 0, 1],
                primary_port: 10001,
            },
            activity_type: "Test".to_string(),
            location: GpsLocation::new(10.0, 20.0).unwrap(),
            precision: 500,
            start_time: 100,
            expiration_time: 200,
            extra_data: String::new(),
        }
    }

    #[test]
    fn validate_accepts_well_formed_activity() {
        assert_eq!(sample().validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_inverted_lifetime() {
        let mut a = sample();
        a.expiration_time = a.start_time;
        assert!(matches!(a.validate(), Err(ActivityError::Lifetime { .. })));
    }

    #[test]
    fn validate_rejects_excessive_precision() {
        let mut a = sample();
        a.precision = 1001;
        assert_eq!(a.validate(), Err(ActivityError::Precision(1001)));
    }
}
