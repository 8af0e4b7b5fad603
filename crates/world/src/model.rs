//! World-model tables and records.

use geosim_types::{
    ActivityInfo, GpsLocation, IdentityKeys, ProfileInfo, ServerInner, ServerKind, SharedServer,
    MAX_ACTIVITIES, MAX_IDENTITIES,
};
use std::collections::HashMap;
use thiserror::Error;

/// Errors resolving scenario references against the world model.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Referenced server group was never declared.
    #[error("unknown server group '{0}'")]
    UnknownServerGroup(String),

    /// Referenced identity group was never declared.
    #[error("unknown identity group '{0}'")]
    UnknownIdentityGroup(String),

    /// Referenced activity group was never declared.
    #[error("unknown activity group '{0}'")]
    UnknownActivityGroup(String),

    /// A 1-based range reaches past the end of a group.
    #[error("range {index}+{count} out of bounds for group '{group}' of size {size}")]
    RangeOutOfBounds {
        group: String,
        index: u32,
        count: u32,
        size: usize,
    },

    /// Server name collision across groups.
    #[error("duplicate server name '{0}'")]
    DuplicateServer(String),

    /// A looked-up record disappeared; indicates a simulator bug.
    #[error("missing record '{0}'")]
    MissingRecord(String),

    /// Not enough identity slots on the selected profile servers.
    #[error("insufficient capacity: need {need} slots, {available} available")]
    InsufficientCapacity { need: u32, available: u32 },

    /// An activity batch would exceed a proximity server's capacity.
    #[error("proximity server '{server}' cannot take {need} more activities")]
    ActivityCapacity { server: String, need: u32 },

    /// A positional slot was already deleted.
    #[error("activity slot {index} of group '{group}' is already deleted")]
    DeletedSlot { group: String, index: u32 },
}

/// Result alias for world-model operations.
pub type WorldResult<T> = Result<T, WorldError>;

/// Role-specific server state.
#[derive(Debug)]
pub enum ServerPayload {
    Profile {
        /// Remaining identity slots.
        available_slots: u32,
        /// Names of hosted identities.
        hosted: Vec<String>,
    },
    Proximity {
        /// Remaining activity slots.
        available_slots: u32,
        /// Global ids of primary activities keyed by `(type, id)` name.
        activities: HashMap<String, u32>,
    },
}

impl ServerPayload {
    fn for_kind(kind: ServerKind) -> Self {
        match kind {
            ServerKind::Profile => ServerPayload::Profile {
                available_slots: MAX_IDENTITIES,
                hosted: Vec::new(),
            },
            ServerKind::Proximity => ServerPayload::Proximity {
                available_slots: MAX_ACTIVITIES,
                activities: HashMap::new(),
            },
        }
    }
}

/// One managed server.
#[derive(Debug)]
pub struct ServerRecord {
    /// State shared with the server's LOC endpoint.
    pub shared: SharedServer,
    pub kind: ServerKind,
    pub group: String,
    pub payload: ServerPayload,
    /// Whether a child process is attached; recorded in snapshots.
    pub is_running: bool,
}

impl ServerRecord {
    /// Remaining hosting slots regardless of kind.
    pub fn available_slots(&self) -> u32 {
        match &self.payload {
            ServerPayload::Profile {
                available_slots, ..
            }
            | ServerPayload::Proximity {
                available_slots, ..
            } => *available_slots,
        }
    }
}

/// One synthetic identity.
#[derive(Debug)]
pub struct IdentityRecord {
    /// Unique identity name, `<group><5-digit index>`.
    pub name: String,
    pub group: String,
    pub keys: IdentityKeys,
    /// What the hosting server was told.
    pub primary_profile: ProfileInfo,
    /// What neighbors believe; may lag after profile updates.
    pub propagated_profile: ProfileInfo,
    /// Name of the hosting profile server.
    pub host_server: String,
    pub profile_initialized: bool,
    pub hosting_active: bool,
}

/// One synthetic activity.
#[derive(Debug)]
pub struct ActivityRecord {
    /// Global numeric id, unique within the simulation.
    pub id: u32,
    pub group: String,
    /// What the primary server was told.
    pub primary_info: ActivityInfo,
    /// What neighbors believe.
    pub propagated_info: ActivityInfo,
    /// Owner signature over the canonical encoding of `primary_info`.
    pub signature: Vec<u8>,
    /// Name of the owning identity.
    pub owner: String,
    /// Name of the primary proximity server.
    pub primary_server: String,
    pub hosting_active: bool,
}

/// The tables every command handler works against.
#[derive(Debug, Default)]
pub struct WorldModel {
    servers: HashMap<String, ServerRecord>,
    /// Group name to ordered server names.
    server_groups: HashMap<String, Vec<String>>,
    identities: HashMap<String, IdentityRecord>,
    /// Group name to ordered identity names.
    identity_groups: HashMap<String, Vec<String>>,
    activities: HashMap<u32, ActivityRecord>,
    /// Group name to positional slots; deleted slots stay as `None` so
    /// later index arithmetic is stable.
    activity_groups: HashMap<String, Vec<Option<u32>>>,
    next_activity_id: u32,
}

impl WorldModel {
    pub fn new() -> Self {
        Self {
            next_activity_id: 1,
            ..Default::default()
        }
    }

    /// Declare one server group of `count` members named
    /// `<group><3-digit index>`.
    pub fn create_servers(
        &mut self,
        group: &str,
        kind: ServerKind,
        count: u32,
        base_port: u16,
        locations: Vec<GpsLocation>,
    ) -> WorldResult<Vec<String>> {
        let mut names = Vec::with_capacity(count as usize);
        for i in 0..count {
            let name = format!("{group}{:03}", i + 1);
            if self.servers.contains_key(&name) {
                return Err(WorldError::DuplicateServer(name));
            }
            let port = base_port + geosim_types::PORTS_PER_SERVER * i as u16;
            let shared = SharedServer::new(ServerInner::new(&name, kind, locations[i as usize], port));
            self.servers.insert(
                name.clone(),
                ServerRecord {
                    shared,
                    kind,
                    group: group.to_string(),
                    payload: ServerPayload::for_kind(kind),
                    is_running: false,
                },
            );
            names.push(name);
        }
        self.server_groups.insert(group.to_string(), names.clone());
        Ok(names)
    }

    /// Insert a fully formed server record (snapshot restore path).
    pub fn insert_server(&mut self, record: ServerRecord) -> WorldResult<()> {
        let name = record.shared.name();
        if self.servers.contains_key(&name) {
            return Err(WorldError::DuplicateServer(name));
        }
        self.server_groups
            .entry(record.group.clone())
            .or_default()
            .push(name.clone());
        self.servers.insert(name, record);
        Ok(())
    }

    /// Resolve a 1-based `(group, index, count)` server range to names.
    pub fn resolve_servers(
        &self,
        group: &str,
        index: u32,
        count: u32,
    ) -> WorldResult<Vec<String>> {
        let members = self
            .server_groups
            .get(group)
            .ok_or_else(|| WorldError::UnknownServerGroup(group.to_string()))?;
        slice_range(members, group, index, count)
    }

    /// Resolve a 1-based identity range to names.
    pub fn resolve_identities(
        &self,
        group: &str,
        index: u32,
        count: u32,
    ) -> WorldResult<Vec<String>> {
        let members = self
            .identity_groups
            .get(group)
            .ok_or_else(|| WorldError::UnknownIdentityGroup(group.to_string()))?;
        slice_range(members, group, index, count)
    }

    /// Resolve a 1-based activity range to global ids, erroring on slots
    /// that were already deleted.
    pub fn resolve_activities(
        &self,
        group: &str,
        index: u32,
        count: u32,
    ) -> WorldResult<Vec<u32>> {
        let members = self
            .activity_groups
            .get(group)
            .ok_or_else(|| WorldError::UnknownActivityGroup(group.to_string()))?;
        let start = index as usize - 1;
        let end = start + count as usize;
        if end > members.len() {
            return Err(WorldError::RangeOutOfBounds {
                group: group.to_string(),
                index,
                count,
                size: members.len(),
            });
        }
        members[start..end]
            .iter()
            .enumerate()
            .map(|(offset, slot)| {
                slot.ok_or(WorldError::DeletedSlot {
                    group: group.to_string(),
                    index: index + offset as u32,
                })
            })
            .collect()
    }

    pub fn server(&self, name: &str) -> WorldResult<&ServerRecord> {
        self.servers
            .get(name)
            .ok_or_else(|| WorldError::MissingRecord(name.to_string()))
    }

    pub fn server_mut(&mut self, name: &str) -> WorldResult<&mut ServerRecord> {
        self.servers
            .get_mut(name)
            .ok_or_else(|| WorldError::MissingRecord(name.to_string()))
    }

    pub fn identity(&self, name: &str) -> WorldResult<&IdentityRecord> {
        self.identities
            .get(name)
            .ok_or_else(|| WorldError::MissingRecord(name.to_string()))
    }

    pub fn identity_mut(&mut self, name: &str) -> WorldResult<&mut IdentityRecord> {
        self.identities
            .get_mut(name)
            .ok_or_else(|| WorldError::MissingRecord(name.to_string()))
    }

    pub fn activity(&self, id: u32) -> WorldResult<&ActivityRecord> {
        self.activities
            .get(&id)
            .ok_or_else(|| WorldError::MissingRecord(format!("activity {id}")))
    }

    pub fn activity_mut(&mut self, id: u32) -> WorldResult<&mut ActivityRecord> {
        self.activities
            .get_mut(&id)
            .ok_or_else(|| WorldError::MissingRecord(format!("activity {id}")))
    }

    /// All server records.
    pub fn servers(&self) -> impl Iterator<Item = &ServerRecord> {
        self.servers.values()
    }

    /// All identity records.
    pub fn identities(&self) -> impl Iterator<Item = &IdentityRecord> {
        self.identities.values()
    }

    /// All activity records.
    pub fn activities(&self) -> impl Iterator<Item = &ActivityRecord> {
        self.activities.values()
    }

    /// Sum of free identity slots across the given profile servers.
    pub fn total_identity_slots(&self, servers: &[String]) -> WorldResult<u32> {
        let mut total = 0;
        for name in servers {
            total += self.server(name)?.available_slots();
        }
        Ok(total)
    }

    /// Register a hosted identity, decrementing the host's free slots.
    pub fn add_identity(&mut self, record: IdentityRecord) -> WorldResult<()> {
        let host = self.server_mut(&record.host_server.clone())?;
        if let ServerPayload::Profile {
            available_slots,
            hosted,
        } = &mut host.payload
        {
            *available_slots = available_slots.saturating_sub(1);
            hosted.push(record.name.clone());
        }
        self.identity_groups
            .entry(record.group.clone())
            .or_default()
            .push(record.name.clone());
        self.identities.insert(record.name.clone(), record);
        Ok(())
    }

    /// Next unique activity id.
    pub fn allocate_activity_id(&mut self) -> u32 {
        let id = self.next_activity_id;
        self.next_activity_id += 1;
        id
    }

    /// Bump the id counter past restored activities (snapshot load).
    pub fn reserve_activity_ids(&mut self, past: u32) {
        self.next_activity_id = self.next_activity_id.max(past + 1);
    }

    /// Register a created activity with its primary server.
    pub fn add_activity(&mut self, record: ActivityRecord) -> WorldResult<()> {
        let primary = self.server_mut(&record.primary_server.clone())?;
        if let ServerPayload::Proximity {
            available_slots,
            activities,
        } = &mut primary.payload
        {
            *available_slots = available_slots.saturating_sub(1);
            activities.insert(
                record.primary_info.activity_id().to_string(),
                record.id,
            );
        }
        self.activity_groups
            .entry(record.group.clone())
            .or_default()
            .push(Some(record.id));
        self.activities.insert(record.id, record);
        Ok(())
    }

    /// Remove a deleted activity, leaving a `None` slot in its group.
    pub fn remove_activity(&mut self, id: u32) -> WorldResult<()> {
        let record = self
            .activities
            .remove(&id)
            .ok_or_else(|| WorldError::MissingRecord(format!("activity {id}")))?;
        if let Ok(primary) = self.server_mut(&record.primary_server) {
            if let ServerPayload::Proximity {
                available_slots,
                activities,
            } = &mut primary.payload
            {
                *available_slots += 1;
                activities.remove(&record.primary_info.activity_id().to_string());
            }
        }
        if let Some(slots) = self.activity_groups.get_mut(&record.group) {
            for slot in slots.iter_mut() {
                if *slot == Some(id) {
                    *slot = None;
                }
            }
        }
        Ok(())
    }

    /// Restore an identity record verbatim (snapshot load).
    pub fn restore_identity(&mut self, record: IdentityRecord) {
        self.identity_groups
            .entry(record.group.clone())
            .or_default()
            .push(record.name.clone());
        self.identities.insert(record.name.clone(), record);
    }

    /// Restore an activity record verbatim (snapshot load).
    pub fn restore_activity(&mut self, record: ActivityRecord) {
        self.activity_groups
            .entry(record.group.clone())
            .or_default()
            .push(Some(record.id));
        self.reserve_activity_ids(record.id);
        self.activities.insert(record.id, record);
    }

    /// Re-create the positional hole a deleted activity left behind
    /// (snapshot load).
    pub fn restore_activity_hole(&mut self, group: &str) {
        self.activity_groups
            .entry(group.to_string())
            .or_default()
            .push(None);
    }

    /// Positional slots of an activity group, including deleted holes.
    pub fn activity_slots(&self, group: &str) -> Option<&Vec<Option<u32>>> {
        self.activity_groups.get(group)
    }

    /// Ordered members of every identity group.
    pub fn identity_groups(&self) -> &HashMap<String, Vec<String>> {
        &self.identity_groups
    }

    /// Ordered members of every server group.
    pub fn server_groups(&self) -> &HashMap<String, Vec<String>> {
        &self.server_groups
    }
}

fn slice_range(
    members: &[String],
    group: &str,
    index: u32,
    count: u32,
) -> WorldResult<Vec<String>> {
    let start = index as usize - 1;
    let end = start + count as usize;
    if end > members.len() {
        return Err(WorldError::RangeOutOfBounds {
            group: group.to_string(),
            index,
            count,
            size: members.len(),
        });
    }
    Ok(members[start..end].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geosim_types::ServerContact;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn locations(count: usize) -> Vec<GpsLocation> {
        (0..count)
            .map(|i| GpsLocation::new(10.0 + i as f64 * 0.01, 20.0).unwrap())
            .collect()
    }

    fn sample_identity(name: &str, host: &str) -> IdentityRecord {
        let mut rng = StdRng::seed_from_u64(1);
        let keys = IdentityKeys::generate(&mut rng);
        let profile = ProfileInfo::new(name, "Test", GpsLocation::new(1.0, 2.0).unwrap());
        IdentityRecord {
            name: name.to_string(),
            group: "Ia".to_string(),
            keys,
            primary_profile: profile.clone(),
            propagated_profile: profile,
            host_server: host.to_string(),
            profile_initialized: true,
            hosting_active: true,
        }
    }

    fn sample_activity(id: u32, owner: &str, primary: &str) -> ActivityRecord {
        let info = ActivityInfo {
            version: "1.0.0".to_string(),
            id,
            owner_identity_id: [0u8; 32],
            owner_public_key: vec![0u8; 32],
            owner_profile_server: ServerContact {
                ip_address: vec![127, 0, 0, 1],
                primary_port: 10001,
            },
            activity_type: "Test".to_string(),
            location: GpsLocation::new(10.0, 20.0).unwrap(),
            precision: 0,
            start_time: 0,
            expiration_time: 100,
            extra_data: String::new(),
        };
        ActivityRecord {
            id,
            group: "A".to_string(),
            primary_info: info.clone(),
            propagated_info: info,
            signature: Vec::new(),
            owner: owner.to_string(),
            primary_server: primary.to_string(),
            hosting_active: true,
        }
    }

    #[test]
    fn server_names_are_group_plus_padded_index() {
        let mut world = WorldModel::new();
        let names = world
            .create_servers("A", ServerKind::Profile, 3, 10000, locations(3))
            .unwrap();
        assert_eq!(names, vec!["A001", "A002", "A003"]);
        assert_eq!(world.server("A002").unwrap().shared.lock().base_port, 10020);
    }

    #[test]
    fn resolve_servers_checks_bounds() {
        let mut world = WorldModel::new();
        world
            .create_servers("A", ServerKind::Profile, 2, 10000, locations(2))
            .unwrap();
        assert_eq!(world.resolve_servers("A", 1, 2).unwrap().len(), 2);
        assert!(matches!(
            world.resolve_servers("A", 2, 2),
            Err(WorldError::RangeOutOfBounds { .. })
        ));
        assert!(matches!(
            world.resolve_servers("B", 1, 1),
            Err(WorldError::UnknownServerGroup(_))
        ));
    }

    #[test]
    fn identity_bookkeeping_decrements_slots() {
        let mut world = WorldModel::new();
        world
            .create_servers("A", ServerKind::Profile, 1, 10000, locations(1))
            .unwrap();
        world.add_identity(sample_identity("Ia00001", "A001")).unwrap();

        let record = world.server("A001").unwrap();
        assert_eq!(record.available_slots(), MAX_IDENTITIES - 1);
        assert_eq!(
            world.resolve_identities("Ia", 1, 1).unwrap(),
            vec!["Ia00001"]
        );
    }

    #[test]
    fn deleting_activity_leaves_positional_hole() {
        let mut world = WorldModel::new();
        world
            .create_servers("PX", ServerKind::Proximity, 1, 20000, locations(1))
            .unwrap();
        let first = world.allocate_activity_id();
        let second = world.allocate_activity_id();
        world.add_activity(sample_activity(first, "Ia00001", "PX001")).unwrap();
        world.add_activity(sample_activity(second, "Ia00001", "PX001")).unwrap();

        world.remove_activity(first).unwrap();

        // Slot 1 is a hole, slot 2 still resolves.
        assert!(matches!(
            world.resolve_activities("A", 1, 1),
            Err(WorldError::DeletedSlot { index: 1, .. })
        ));
        assert_eq!(world.resolve_activities("A", 2, 1).unwrap(), vec![second]);
        assert_eq!(
            world.server("PX001").unwrap().available_slots(),
            MAX_ACTIVITIES - 1
        );
    }
}
