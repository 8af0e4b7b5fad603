//! Identity profile value objects.

use crate::geo::GpsLocation;
use crate::keys::sha256;
use serde::{Deserialize, Serialize};

/// The profile an identity presents to its hosting server.
///
/// Each identity carries two of these: the *primary* profile (what the host
/// knows) and the *propagated* profile (what neighbors know, which may lag
/// behind after an update).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileInfo {
    /// Protocol version as a semver string.
    pub version: String,
    /// Profile name.
    pub name: String,
    /// Identity type, free-form.
    pub identity_type: String,
    /// Declared location.
    pub location: GpsLocation,
    /// Profile image bytes, if any.
    pub profile_image: Option<Vec<u8>>,
    /// SHA-256 of the profile image.
    pub profile_image_hash: Option<[u8; 32]>,
    /// Thumbnail bytes, if any.
    pub thumbnail_image: Option<Vec<u8>>,
    /// SHA-256 of the thumbnail.
    pub thumbnail_image_hash: Option<[u8; 32]>,
    /// Application-defined extra data.
    pub extra_data: String,
}

impl ProfileInfo {
    /// Create a minimal profile with no images and empty extra data.
    pub fn new(name: &str, identity_type: &str, location: GpsLocation) -> Self {
        Self {
            version: "1.0.0".to_string(),
            name: name.to_string(),
            identity_type: identity_type.to_string(),
            location,
            profile_image: None,
            profile_image_hash: None,
            thumbnail_image: None,
            thumbnail_image_hash: None,
            extra_data: String::new(),
        }
    }

    /// Attach a profile image, computing its hash.
    pub fn with_profile_image(mut self, image: Vec<u8>) -> Self {
        self.profile_image_hash = Some(sha256(&image));
        self.profile_image = Some(image);
        self
    }

    /// Attach a thumbnail, computing its hash.
    pub fn with_thumbnail(mut self, image: Vec<u8>) -> Self {
        self.thumbnail_image_hash = Some(sha256(&image));
        self.thumbnail_image = Some(image);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_hashes_track_image_bytes() {
        let loc = GpsLocation::new(1.0, 2.0).unwrap();
        let profile = ProfileInfo::new("alice", "Test", loc).with_profile_image(vec![1, 2, 3]);
        assert_eq!(profile.profile_image_hash, Some(sha256(&[1, 2, 3])));
        assert!(profile.thumbnail_image.is_none());
    }
}
