//! Snapshot records: the JSON shapes persisted by `TakeSnapshot`.
//!
//! Records reference each other by name, never by handle; the loader
//! resolves names back into live objects. Image bytes are deduplicated
//! into one hex-encoded pool keyed by their SHA-256.

use crate::model::{ActivityRecord, IdentityRecord, ServerPayload, ServerRecord, WorldModel};
use geosim_types::keys::sha256;
use geosim_types::{
    ActivityInfo, GpsLocation, IdentityKeys, NetworkId, ProfileInfo, ServerInner, ServerKind,
    SharedServer,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors rebuilding a world model from snapshot records.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// A hex field failed to decode.
    #[error("invalid hex in field {0}")]
    InvalidHex(&'static str),

    /// A referenced image is missing from the pool.
    #[error("image {0} referenced but not stored")]
    MissingImage(String),

    /// A byte field had the wrong length.
    #[error("field {0} has invalid length")]
    InvalidLength(&'static str),
}

/// One server as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSnapshot {
    pub name: String,
    pub group: String,
    pub kind: ServerKind,
    pub location: GpsLocation,
    pub base_port: u16,
    /// Hex-encoded network id, when one was ever assigned.
    pub network_id: Option<NetworkId>,
    pub initialized: bool,
    pub is_running: bool,
    pub available_slots: u32,
    /// Hosted identity names; empty for proximity servers.
    pub hosted_identities: Vec<String>,
    /// Primary activity ids; empty for profile servers.
    pub primary_activities: Vec<u32>,
    /// Neighbor names; resolved back into LOC maps after load.
    pub neighbors: Vec<String>,
}

/// A profile with its image bytes replaced by pool references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub version: String,
    pub name: String,
    pub identity_type: String,
    pub location: GpsLocation,
    /// Hex SHA-256 key into the image pool.
    pub profile_image: Option<String>,
    pub thumbnail_image: Option<String>,
    pub extra_data: String,
}

/// One identity as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySnapshot {
    pub name: String,
    pub group: String,
    /// Hex-encoded Ed25519 secret key.
    pub secret_key: String,
    pub primary_profile: ProfileSnapshot,
    pub propagated_profile: ProfileSnapshot,
    pub host_server: String,
    pub profile_initialized: bool,
    pub hosting_active: bool,
}

/// One activity as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivitySnapshot {
    pub id: u32,
    pub group: String,
    pub primary_info: ActivityInfo,
    pub propagated_info: ActivityInfo,
    /// Hex-encoded owner signature.
    pub signature: String,
    pub owner: String,
    pub primary_server: String,
    pub hosting_active: bool,
    /// Positional slot index within the group (1-based); preserves holes.
    pub slot: u32,
}

/// Image pool: hex SHA-256 to hex bytes.
pub type ImagePool = HashMap<String, String>;

/// Everything `TakeSnapshot` persists about the logical state.
#[derive(Debug, Default)]
pub struct SnapshotData {
    pub profile_servers: Vec<ServerSnapshot>,
    pub proximity_servers: Vec<ServerSnapshot>,
    pub identities: Vec<IdentitySnapshot>,
    pub activities: Vec<ActivitySnapshot>,
    pub images: ImagePool,
}

impl SnapshotData {
    /// Capture the world model.
    ///
    /// # Arguments
    /// * `world` - The tables to capture
    /// * `neighbors` - Per-server neighbor names, read from the LOC servers
    pub fn capture(world: &WorldModel, neighbors: &HashMap<String, Vec<String>>) -> Self {
        let mut data = SnapshotData::default();

        let mut server_names: Vec<&String> = world.server_groups().values().flatten().collect();
        server_names.sort();
        for name in server_names {
            let Ok(record) = world.server(name) else {
                continue;
            };
            let snapshot = server_snapshot(record, neighbors);
            match record.kind {
                ServerKind::Profile => data.profile_servers.push(snapshot),
                ServerKind::Proximity => data.proximity_servers.push(snapshot),
            }
        }

        let mut identities: Vec<&IdentityRecord> = world.identities().collect();
        identities.sort_by(|a, b| a.name.cmp(&b.name));
        for identity in identities {
            data.identities.push(identity_snapshot(identity, &mut data.images));
        }

        let mut activity_entries: Vec<(String, u32, u32)> = Vec::new();
        for (group, slots) in world_activity_slots(world) {
            for (position, slot) in slots.iter().enumerate() {
                if let Some(id) = slot {
                    activity_entries.push((group.clone(), position as u32 + 1, *id));
                }
            }
        }
        activity_entries.sort();
        for (_, slot, id) in activity_entries {
            if let Ok(record) = world.activity(id) {
                data.activities.push(activity_snapshot(record, slot));
            }
        }

        data
    }

    /// Rebuild the world model and the per-server neighbor name lists.
    pub fn restore(&self) -> Result<(WorldModel, HashMap<String, Vec<String>>), SnapshotError> {
        let mut world = WorldModel::new();
        let mut neighbors = HashMap::new();

        for snapshot in self.profile_servers.iter().chain(&self.proximity_servers) {
            let shared = SharedServer::new(ServerInner::new(
                &snapshot.name,
                snapshot.kind,
                snapshot.location,
                snapshot.base_port,
            ));
            if let (true, Some(id)) = (snapshot.initialized, snapshot.network_id) {
                shared.complete_initialization(id);
            }
            let payload = match snapshot.kind {
                ServerKind::Profile => ServerPayload::Profile {
                    available_slots: snapshot.available_slots,
                    hosted: snapshot.hosted_identities.clone(),
                },
                ServerKind::Proximity => ServerPayload::Proximity {
                    available_slots: snapshot.available_slots,
                    activities: HashMap::new(),
                },
            };
            let record = ServerRecord {
                shared,
                kind: snapshot.kind,
                group: snapshot.group.clone(),
                payload,
                is_running: snapshot.is_running,
            };
            // Names were unique at capture time.
            let _ = world.insert_server(record);
            neighbors.insert(snapshot.name.clone(), snapshot.neighbors.clone());
        }

        for snapshot in &self.identities {
            let secret = decode_fixed::<32>(&snapshot.secret_key, "secret_key")?;
            let record = IdentityRecord {
                name: snapshot.name.clone(),
                group: snapshot.group.clone(),
                keys: IdentityKeys::from_secret_bytes(&secret),
                primary_profile: restore_profile(&snapshot.primary_profile, &self.images)?,
                propagated_profile: restore_profile(&snapshot.propagated_profile, &self.images)?,
                host_server: snapshot.host_server.clone(),
                profile_initialized: snapshot.profile_initialized,
                hosting_active: snapshot.hosting_active,
            };
            world.restore_identity(record);
        }

        // Activities must come back in slot order per group, re-creating
        // deleted holes between occupied slots.
        let mut by_group: HashMap<&str, Vec<&ActivitySnapshot>> = HashMap::new();
        for snapshot in &self.activities {
            by_group.entry(&snapshot.group).or_default().push(snapshot);
        }
        for (_, mut snapshots) in by_group {
            snapshots.sort_by_key(|s| s.slot);
            let mut next_slot = 1;
            for snapshot in snapshots {
                while next_slot < snapshot.slot {
                    // A hole left by a deleted activity.
                    world.restore_activity_hole(&snapshot.group);
                    next_slot += 1;
                }
                let record = ActivityRecord {
                    id: snapshot.id,
                    group: snapshot.group.clone(),
                    primary_info: snapshot.primary_info.clone(),
                    propagated_info: snapshot.propagated_info.clone(),
                    signature: hex::decode(&snapshot.signature)
                        .map_err(|_| SnapshotError::InvalidHex("signature"))?,
                    owner: snapshot.owner.clone(),
                    primary_server: snapshot.primary_server.clone(),
                    hosting_active: snapshot.hosting_active,
                };
                // Re-attach to the primary server's table.
                let id = record.id;
                let key = snapshot.primary_info.activity_id().to_string();
                world.restore_activity(record);
                if let Ok(server) = world.server_mut(&snapshot.primary_server) {
                    if let ServerPayload::Proximity { activities, .. } = &mut server.payload {
                        activities.insert(key, id);
                    }
                }
                next_slot += 1;
            }
        }

        Ok((world, neighbors))
    }
}

fn server_snapshot(
    record: &ServerRecord,
    neighbors: &HashMap<String, Vec<String>>,
) -> ServerSnapshot {
    let inner = record.shared.lock();
    let (available_slots, hosted_identities, primary_activities) = match &record.payload {
        ServerPayload::Profile {
            available_slots,
            hosted,
        } => (*available_slots, hosted.clone(), Vec::new()),
        ServerPayload::Proximity {
            available_slots,
            activities,
        } => {
            let mut ids: Vec<u32> = activities.values().copied().collect();
            ids.sort_unstable();
            (*available_slots, Vec::new(), ids)
        }
    };
    ServerSnapshot {
        name: inner.name.clone(),
        group: record.group.clone(),
        kind: record.kind,
        location: inner.location,
        base_port: inner.base_port,
        network_id: inner.network_id(),
        initialized: inner.is_initialized(),
        is_running: record.is_running,
        available_slots,
        hosted_identities,
        primary_activities,
        neighbors: neighbors.get(&inner.name).cloned().unwrap_or_default(),
    }
}

fn identity_snapshot(identity: &IdentityRecord, images: &mut ImagePool) -> IdentitySnapshot {
    IdentitySnapshot {
        name: identity.name.clone(),
        group: identity.group.clone(),
        secret_key: hex::encode(identity.keys.secret_bytes()),
        primary_profile: profile_snapshot(&identity.primary_profile, images),
        propagated_profile: profile_snapshot(&identity.propagated_profile, images),
        host_server: identity.host_server.clone(),
        profile_initialized: identity.profile_initialized,
        hosting_active: identity.hosting_active,
    }
}

fn activity_snapshot(record: &ActivityRecord, slot: u32) -> ActivitySnapshot {
    ActivitySnapshot {
        id: record.id,
        group: record.group.clone(),
        primary_info: record.primary_info.clone(),
        propagated_info: record.propagated_info.clone(),
        signature: hex::encode(&record.signature),
        owner: record.owner.clone(),
        primary_server: record.primary_server.clone(),
        hosting_active: record.hosting_active,
        slot,
    }
}

fn profile_snapshot(profile: &ProfileInfo, images: &mut ImagePool) -> ProfileSnapshot {
    ProfileSnapshot {
        version: profile.version.clone(),
        name: profile.name.clone(),
        identity_type: profile.identity_type.clone(),
        location: profile.location,
        profile_image: profile
            .profile_image
            .as_ref()
            .map(|bytes| pool_image(images, bytes)),
        thumbnail_image: profile
            .thumbnail_image
            .as_ref()
            .map(|bytes| pool_image(images, bytes)),
        extra_data: profile.extra_data.clone(),
    }
}

/// Store image bytes in the pool, returning the hex SHA-256 key.
/// Duplicate images share one entry.
fn pool_image(images: &mut ImagePool, bytes: &[u8]) -> String {
    let key = hex::encode(sha256(bytes));
    images
        .entry(key.clone())
        .or_insert_with(|| hex::encode(bytes));
    key
}

fn restore_profile(
    snapshot: &ProfileSnapshot,
    images: &ImagePool,
) -> Result<ProfileInfo, SnapshotError> {
    let mut profile = ProfileInfo {
        version: snapshot.version.clone(),
        name: snapshot.name.clone(),
        identity_type: snapshot.identity_type.clone(),
        location: snapshot.location,
        profile_image: None,
        profile_image_hash: None,
        thumbnail_image: None,
        thumbnail_image_hash: None,
        extra_data: snapshot.extra_data.clone(),
    };
    if let Some(key) = &snapshot.profile_image {
        let bytes = lookup_image(images, key)?;
        profile = profile.with_profile_image(bytes);
    }
    if let Some(key) = &snapshot.thumbnail_image {
        let bytes = lookup_image(images, key)?;
        profile = profile.with_thumbnail(bytes);
    }
    Ok(profile)
}

fn lookup_image(images: &ImagePool, key: &str) -> Result<Vec<u8>, SnapshotError> {
    let encoded = images
        .get(key)
        .ok_or_else(|| SnapshotError::MissingImage(key.to_string()))?;
    hex::decode(encoded).map_err(|_| SnapshotError::InvalidHex("image"))
}

fn decode_fixed<const N: usize>(
    encoded: &str,
    field: &'static str,
) -> Result<[u8; N], SnapshotError> {
    let bytes = hex::decode(encoded).map_err(|_| SnapshotError::InvalidHex(field))?;
    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| SnapshotError::InvalidLength(field))
}

fn world_activity_slots(world: &WorldModel) -> Vec<(String, Vec<Option<u32>>)> {
    let mut groups: Vec<(String, Vec<Option<u32>>)> = Vec::new();
    let mut names: Vec<String> = world
        .activities()
        .map(|a| a.group.clone())
        .collect::<std::collections::HashSet<_>>()
        .into_iter()
        .collect();
    names.sort();
    for name in names {
        if let Some(slots) = world.activity_slots(&name) {
            groups.push((name, slots.clone()));
        }
    }
    groups
}
