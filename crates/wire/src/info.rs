//! Conversions between domain objects and their wire forms, and the
//! canonical-encoding signature helpers.

use crate::client::{ActivityInformation, ContactInfo, ProfileInformation};
use geosim_types::keys::verify_signature;
use geosim_types::{ActivityInfo, GpsLocation, IdentityKeys, ProfileInfo, ServerContact};
use prost::Message;
use thiserror::Error;

/// Errors converting wire forms back into domain objects.
#[derive(Debug, Error)]
pub enum InfoError {
    /// A coordinate pair was outside the valid ranges.
    #[error("invalid location: {0}")]
    Location(#[from] geosim_types::geo::GeoError),

    /// A required sub-message was missing.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A fixed-size byte field had the wrong length.
    #[error("field {0} has invalid length")]
    InvalidLength(&'static str),
}

/// Build the wire profile from a domain profile and the identity's key.
pub fn profile_to_wire(profile: &ProfileInfo, public_key: &[u8]) -> ProfileInformation {
    ProfileInformation {
        version: semver_bytes(&profile.version),
        public_key: public_key.to_vec(),
        name: profile.name.clone(),
        identity_type: profile.identity_type.clone(),
        latitude: profile.location.latitude,
        longitude: profile.location.longitude,
        profile_image_hash: profile
            .profile_image_hash
            .map(|h| h.to_vec())
            .unwrap_or_default(),
        thumbnail_image_hash: profile
            .thumbnail_image_hash
            .map(|h| h.to_vec())
            .unwrap_or_default(),
        extra_data: profile.extra_data.clone(),
    }
}

/// Build the wire activity from a domain activity.
pub fn activity_to_wire(activity: &ActivityInfo) -> ActivityInformation {
    ActivityInformation {
        version: semver_bytes(&activity.version),
        id: activity.id,
        owner_identity_id: activity.owner_identity_id.to_vec(),
        owner_public_key: activity.owner_public_key.clone(),
        owner_profile_server: Some(ContactInfo {
            ip_address: activity.owner_profile_server.ip_address.clone(),
            primary_port: u32::from(activity.owner_profile_server.primary_port),
        }),
        activity_type: activity.activity_type.clone(),
        latitude: activity.location.latitude,
        longitude: activity.location.longitude,
        precision: activity.precision,
        start_time: activity.start_time,
        expiration_time: activity.expiration_time,
        extra_data: activity.extra_data.clone(),
    }
}

/// Rebuild a domain activity from its wire form.
pub fn activity_from_wire(wire: &ActivityInformation) -> Result<ActivityInfo, InfoError> {
    let contact = wire
        .owner_profile_server
        .as_ref()
        .ok_or(InfoError::MissingField("owner_profile_server"))?;
    let owner_identity_id = <[u8; 32]>::try_from(wire.owner_identity_id.as_slice())
        .map_err(|_| InfoError::InvalidLength("owner_identity_id"))?;
    Ok(ActivityInfo {
        version: semver_string(&wire.version),
        id: wire.id,
        owner_identity_id,
        owner_public_key: wire.owner_public_key.clone(),
        owner_profile_server: ServerContact {
            ip_address: contact.ip_address.clone(),
            primary_port: contact.primary_port as u16,
        },
        activity_type: wire.activity_type.clone(),
        location: GpsLocation::new(wire.latitude, wire.longitude)?,
        precision: wire.precision,
        start_time: wire.start_time,
        expiration_time: wire.expiration_time,
        extra_data: wire.extra_data.clone(),
    })
}

/// Sign an activity's canonical encoding with the owner's key.
pub fn sign_activity(keys: &IdentityKeys, activity: &ActivityInformation) -> Vec<u8> {
    keys.sign(&activity.encode_to_vec()).to_vec()
}

/// Verify an activity signature against the embedded owner public key.
pub fn verify_activity_signature(activity: &ActivityInformation, signature: &[u8]) -> bool {
    verify_signature(
        &activity.owner_public_key,
        &activity.encode_to_vec(),
        signature,
    )
}

fn semver_bytes(version: &str) -> Vec<u8> {
    let mut parts = version.split('.').map(|p| p.parse::<u8>().unwrap_or(0));
    vec![
        parts.next().unwrap_or(1),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    ]
}

fn semver_string(bytes: &[u8]) -> String {
    match bytes {
        [major, minor, patch, ..] => format!("{major}.{minor}.{patch}"),
        _ => "1.0.0".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sample_activity(keys: &IdentityKeys) -> ActivityInfo {
        ActivityInfo {
            version: "1.0.0".to_string(),
            id: 5,
            owner_identity_id: keys.identity_id(),
            owner_public_key: keys.public_key().to_vec(),
            owner_profile_server: ServerContact {
                ip_address: vec![127, 0, 0, 1],
                primary_port: 10001,
            },
            activity_type: "Running".to_string(),
            location: GpsLocation::new(10.0, 20.0).unwrap(),
            precision: 100,
            start_time: 1000,
            expiration_time: 2000,
            extra_data: String::new(),
        }
    }

    #[test]
    fn activity_wire_round_trip() {
        let mut rng = StdRng::seed_from_u64(1);
        let keys = IdentityKeys::generate(&mut rng);
        let activity = sample_activity(&keys);
        let wire = activity_to_wire(&activity);
        let back = activity_from_wire(&wire).unwrap();
        assert_eq!(back, activity);
    }

    #[test]
    fn activity_signature_verifies_and_detects_mutation() {
        let mut rng = StdRng::seed_from_u64(2);
        let keys = IdentityKeys::generate(&mut rng);
        let mut wire = activity_to_wire(&sample_activity(&keys));
        let sig = sign_activity(&keys, &wire);
        assert!(verify_activity_signature(&wire, &sig));

        wire.precision += 1;
        assert!(!verify_activity_signature(&wire, &sig));
    }

    #[test]
    fn semver_bytes_parse() {
        assert_eq!(semver_bytes("1.2.3"), vec![1, 2, 3]);
        assert_eq!(semver_string(&[1, 2, 3]), "1.2.3");
    }
}
