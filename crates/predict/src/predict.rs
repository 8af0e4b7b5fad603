//! Expected-result computation for test queries.

use crate::filter::WildcardFilter;
use geosim_types::GpsLocation;
use geosim_wire::client::{ActivityQueryResult, ContactInfo, ProfileQueryResult};
use geosim_wire::info::{activity_to_wire, profile_to_wire};
use geosim_world::{ActivityRecord, IdentityRecord, ServerPayload, WorldModel, WorldResult};

/// Normalised profile-search parameters.
#[derive(Debug, Clone)]
pub struct ProfileQuery {
    pub name_filter: WildcardFilter,
    pub type_filter: WildcardFilter,
    pub location: Option<GpsLocation>,
    pub radius: u32,
    pub include_hosted_only: bool,
    pub include_images: bool,
}

/// Normalised activity-search parameters.
#[derive(Debug, Clone)]
pub struct ActivityQuery {
    pub type_filter: WildcardFilter,
    pub start_not_after: Option<i64>,
    pub expiration_not_before: Option<i64>,
    pub location: Option<GpsLocation>,
    pub radius: u32,
    pub include_primary_only: bool,
}

/// Expected outcome of a profile search on one target server.
#[derive(Debug)]
pub struct ExpectedProfiles {
    pub results: Vec<ProfileQueryResult>,
    pub covered_servers: Vec<Vec<u8>>,
    /// How many results the target alone contributes.
    pub local_count: usize,
}

/// Expected outcome of an activity search on one target server.
#[derive(Debug)]
pub struct ExpectedActivities {
    pub results: Vec<ActivityQueryResult>,
    pub covered_servers: Vec<Vec<u8>>,
    pub local_count: usize,
}

/// Compute the expected profile-search result on `target`.
///
/// # Arguments
/// * `world` - The ground-truth tables
/// * `target` - Name of the queried profile server
/// * `neighbors` - Names in the target's LOC neighbor map
/// * `query` - Normalised search parameters
pub fn predict_profile_search(
    world: &WorldModel,
    target: &str,
    neighbors: &[String],
    query: &ProfileQuery,
) -> WorldResult<ExpectedProfiles> {
    let target_record = world.server(target)?;
    let mut covered_servers = Vec::new();
    if let Some(id) = target_record.shared.lock().network_id() {
        covered_servers.push(id.as_bytes().to_vec());
    }

    let mut results = Vec::new();
    for identity in hosted_identities(world, target_record)? {
        if let Some(result) = match_profile(identity, query, false, true, &[]) {
            results.push(result);
        }
    }
    let local_count = results.len();

    if !query.include_hosted_only {
        for neighbor_name in neighbors {
            let neighbor = world.server(neighbor_name)?;
            if !matches!(neighbor.payload, ServerPayload::Profile { .. }) {
                continue;
            }
            let Some(neighbor_id) = neighbor.shared.lock().network_id() else {
                continue;
            };
            covered_servers.push(neighbor_id.as_bytes().to_vec());
            for identity in hosted_identities(world, neighbor)? {
                if let Some(result) =
                    match_profile(identity, query, true, false, neighbor_id.as_bytes())
                {
                    results.push(result);
                }
            }
        }
    }

    Ok(ExpectedProfiles {
        results,
        covered_servers,
        local_count,
    })
}

/// Compute the expected activity-search result on `target`.
pub fn predict_activity_search(
    world: &WorldModel,
    target: &str,
    neighbors: &[String],
    query: &ActivityQuery,
) -> WorldResult<ExpectedActivities> {
    let target_record = world.server(target)?;
    let mut covered_servers = Vec::new();
    if let Some(id) = target_record.shared.lock().network_id() {
        covered_servers.push(id.as_bytes().to_vec());
    }

    let mut results = Vec::new();
    for activity in primary_activities(world, target) {
        if let Some(result) = match_activity(activity, query, false, None) {
            results.push(result);
        }
    }
    let local_count = results.len();

    if !query.include_primary_only {
        for neighbor_name in neighbors {
            let neighbor = world.server(neighbor_name)?;
            if !matches!(neighbor.payload, ServerPayload::Proximity { .. }) {
                continue;
            }
            let neighbor_inner = neighbor.shared.lock();
            let Some(neighbor_id) = neighbor_inner.network_id() else {
                continue;
            };
            covered_servers.push(neighbor_id.as_bytes().to_vec());
            let contact = neighbor_inner.contact();
            drop(neighbor_inner);
            let primary_contact = ContactInfo {
                ip_address: contact.ip_address,
                primary_port: u32::from(contact.primary_port),
            };
            for activity in primary_activities(world, neighbor_name) {
                if let Some(result) =
                    match_activity(activity, query, true, Some(primary_contact.clone()))
                {
                    results.push(result);
                }
            }
        }
    }

    Ok(ExpectedActivities {
        results,
        covered_servers,
        local_count,
    })
}

fn hosted_identities<'a>(
    world: &'a WorldModel,
    server: &geosim_world::ServerRecord,
) -> WorldResult<Vec<&'a IdentityRecord>> {
    let ServerPayload::Profile { hosted, .. } = &server.payload else {
        return Ok(Vec::new());
    };
    hosted.iter().map(|name| world.identity(name)).collect()
}

fn primary_activities<'a>(world: &'a WorldModel, server: &str) -> Vec<&'a ActivityRecord> {
    world
        .activities()
        .filter(|activity| activity.primary_server == server)
        .collect()
}

/// Match one identity against a profile query.
///
/// Returns the expected record tagged for the target (`is_hosted`) or a
/// neighbor (`hosting_server`), or `None` when any filter rejects it.
fn match_profile(
    identity: &IdentityRecord,
    query: &ProfileQuery,
    propagated: bool,
    is_hosted: bool,
    hosting_server: &[u8],
) -> Option<ProfileQueryResult> {
    if !identity.profile_initialized || !identity.hosting_active {
        return None;
    }
    let profile = if propagated {
        &identity.propagated_profile
    } else {
        &identity.primary_profile
    };
    if !query.name_filter.matches(&profile.name) {
        return None;
    }
    if !query.type_filter.matches(&profile.identity_type) {
        return None;
    }
    if let Some(center) = &query.location {
        if profile.location.distance_to(center) > f64::from(query.radius) {
            return None;
        }
    }

    let wire_profile = profile_to_wire(profile, &identity.keys.public_key());
    Some(ProfileQueryResult {
        is_hosted,
        is_online: false,
        hosting_server_network_id: hosting_server.to_vec(),
        profile: Some(wire_profile),
        profile_image: if query.include_images {
            profile.profile_image.clone().unwrap_or_default()
        } else {
            Vec::new()
        },
        thumbnail_image: if query.include_images {
            profile.thumbnail_image.clone().unwrap_or_default()
        } else {
            Vec::new()
        },
    })
}

/// Match one activity against an activity query.
fn match_activity(
    activity: &ActivityRecord,
    query: &ActivityQuery,
    propagated: bool,
    primary_server: Option<ContactInfo>,
) -> Option<ActivityQueryResult> {
    if !activity.hosting_active {
        return None;
    }
    let info = if propagated {
        &activity.propagated_info
    } else {
        &activity.primary_info
    };
    if !query.type_filter.matches(&info.activity_type) {
        return None;
    }
    if let Some(threshold) = query.start_not_after {
        if info.start_time > threshold {
            return None;
        }
    }
    if let Some(threshold) = query.expiration_not_before {
        if info.expiration_time < threshold {
            return None;
        }
    }
    if let Some(center) = &query.location {
        let effective = info.location.distance_to(center) - f64::from(info.precision);
        if effective > f64::from(query.radius) {
            return None;
        }
    }

    Some(ActivityQueryResult {
        is_primary: primary_server.is_none(),
        primary_server,
        activity: Some(activity_to_wire(info)),
        signature: activity.signature.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use geosim_types::{
        ActivityInfo, IdentityKeys, NetworkId, ProfileInfo, ServerContact, ServerKind,
    };
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn no_filter_profile_query() -> ProfileQuery {
        ProfileQuery {
            name_filter: WildcardFilter::None,
            type_filter: WildcardFilter::None,
            location: None,
            radius: 0,
            include_hosted_only: false,
            include_images: false,
        }
    }

    fn build_world() -> WorldModel {
        let mut world = WorldModel::new();
        let locations: Vec<GpsLocation> = (0..2)
            .map(|i| GpsLocation::new(10.0, 20.0 + i as f64 * 0.001).unwrap())
            .collect();
        world
            .create_servers("A", ServerKind::Profile, 2, 10000, locations)
            .unwrap();
        world
            .server("A001")
            .unwrap()
            .shared
            .complete_initialization(NetworkId([1u8; 32]));
        world
            .server("A002")
            .unwrap()
            .shared
            .complete_initialization(NetworkId([2u8; 32]));

        let mut rng = StdRng::seed_from_u64(5);
        for (i, host) in [(1u32, "A001"), (2, "A001"), (3, "A002")] {
            let keys = IdentityKeys::generate(&mut rng);
            let name = format!("Ia{i:05}");
            let profile =
                ProfileInfo::new(&name, "Test", GpsLocation::new(10.0, 20.0).unwrap());
            world
                .add_identity(geosim_world::IdentityRecord {
                    name: name.clone(),
                    group: "Ia".to_string(),
                    keys,
                    primary_profile: profile.clone(),
                    propagated_profile: profile,
                    host_server: host.to_string(),
                    profile_initialized: true,
                    hosting_active: true,
                })
                .unwrap();
        }
        world
    }

    #[test]
    fn local_pass_counts_only_hosted_identities() {
        let world = build_world();
        let expected =
            predict_profile_search(&world, "A001", &[], &no_filter_profile_query()).unwrap();
        assert_eq!(expected.results.len(), 2);
        assert_eq!(expected.local_count, 2);
        assert_eq!(expected.covered_servers, vec![vec![1u8; 32]]);
        assert!(expected.results.iter().all(|r| r.is_hosted));
    }

    #[test]
    fn neighbor_pass_adds_covered_server_and_tags_records() {
        let world = build_world();
        let neighbors = vec!["A002".to_string()];
        let expected =
            predict_profile_search(&world, "A001", &neighbors, &no_filter_profile_query())
                .unwrap();
        assert_eq!(expected.results.len(), 3);
        assert_eq!(expected.local_count, 2);
        assert_eq!(
            expected.covered_servers,
            vec![vec![1u8; 32], vec![2u8; 32]]
        );
        let remote: Vec<_> = expected.results.iter().filter(|r| !r.is_hosted).collect();
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].hosting_server_network_id, vec![2u8; 32]);
    }

    #[test]
    fn hosted_only_skips_neighbors() {
        let world = build_world();
        let neighbors = vec!["A002".to_string()];
        let mut query = no_filter_profile_query();
        query.include_hosted_only = true;
        let expected = predict_profile_search(&world, "A001", &neighbors, &query).unwrap();
        assert_eq!(expected.results.len(), 2);
        assert_eq!(expected.covered_servers.len(), 1);
    }

    #[test]
    fn name_filter_prunes_results() {
        let world = build_world();
        let mut query = no_filter_profile_query();
        query.name_filter = WildcardFilter::parse("Ia00001");
        let expected = predict_profile_search(&world, "A001", &[], &query).unwrap();
        assert_eq!(expected.results.len(), 1);
    }

    #[test]
    fn inactive_identity_is_invisible() {
        let mut world = build_world();
        world.identity_mut("Ia00001").unwrap().hosting_active = false;
        let expected =
            predict_profile_search(&world, "A001", &[], &no_filter_profile_query()).unwrap();
        assert_eq!(expected.results.len(), 1);
    }

    fn sample_activity_record(
        world: &mut WorldModel,
        keys: &IdentityKeys,
        primary: &str,
        start: i64,
        expiration: i64,
        precision: u32,
        location: GpsLocation,
    ) -> u32 {
        let id = world.allocate_activity_id();
        let info = ActivityInfo {
            version: "1.0.0".to_string(),
            id,
            owner_identity_id: keys.identity_id(),
            owner_public_key: keys.public_key().to_vec(),
            owner_profile_server: ServerContact {
                ip_address: vec![127, 0, 0, 1],
                primary_port: 10001,
            },
            activity_type: "Running".to_string(),
            location,
            precision,
            start_time: start,
            expiration_time: expiration,
            extra_data: String::new(),
        };
        world
            .add_activity(geosim_world::ActivityRecord {
                id,
                group: "Act".to_string(),
                primary_info: info.clone(),
                propagated_info: info,
                signature: vec![1u8; 64],
                owner: "Ia00001".to_string(),
                primary_server: primary.to_string(),
                hosting_active: true,
            })
            .unwrap();
        id
    }

    #[test]
    fn activity_time_and_location_filters() {
        let mut world = WorldModel::new();
        let location = GpsLocation::new(10.0, 20.0).unwrap();
        world
            .create_servers("PX", ServerKind::Proximity, 1, 20000, vec![location])
            .unwrap();
        world
            .server("PX001")
            .unwrap()
            .shared
            .complete_initialization(NetworkId([7u8; 32]));
        let mut rng = StdRng::seed_from_u64(6);
        let keys = IdentityKeys::generate(&mut rng);

        // Starts at 100, expires at 200, 10 km away with 1000 m precision.
        let far = location.destination(90.0, 10_000.0);
        sample_activity_record(&mut world, &keys, "PX001", 100, 200, 1000, far);

        let mut query = ActivityQuery {
            type_filter: WildcardFilter::None,
            start_not_after: Some(50),
            expiration_not_before: None,
            location: None,
            radius: 0,
            include_primary_only: false,
        };
        let expected = predict_activity_search(&world, "PX001", &[], &query).unwrap();
        assert!(expected.results.is_empty(), "start 100 > notAfter 50");

        query.start_not_after = Some(100);
        let expected = predict_activity_search(&world, "PX001", &[], &query).unwrap();
        assert_eq!(expected.results.len(), 1);

        query.expiration_not_before = Some(201);
        let expected = predict_activity_search(&world, "PX001", &[], &query).unwrap();
        assert!(expected.results.is_empty(), "expires before threshold");
        query.expiration_not_before = Some(200);

        // Location: 10 km away, precision shaves 1000 m off the distance.
        query.location = Some(location);
        query.radius = 9_200;
        let expected = predict_activity_search(&world, "PX001", &[], &query).unwrap();
        assert_eq!(expected.results.len(), 1);

        query.radius = 8_900;
        let expected = predict_activity_search(&world, "PX001", &[], &query).unwrap();
        assert!(expected.results.is_empty());
    }

    #[test]
    fn neighbor_activities_carry_primary_contact() {
        let mut world = WorldModel::new();
        let location = GpsLocation::new(10.0, 20.0).unwrap();
        world
            .create_servers("PX", ServerKind::Proximity, 2, 20000, vec![location, location])
            .unwrap();
        world
            .server("PX001")
            .unwrap()
            .shared
            .complete_initialization(NetworkId([1u8; 32]));
        world
            .server("PX002")
            .unwrap()
            .shared
            .complete_initialization(NetworkId([2u8; 32]));
        let mut rng = StdRng::seed_from_u64(8);
        let keys = IdentityKeys::generate(&mut rng);
        sample_activity_record(&mut world, &keys, "PX002", 0, 100, 0, location);

        let query = ActivityQuery {
            type_filter: WildcardFilter::None,
            start_not_after: None,
            expiration_not_before: None,
            location: None,
            radius: 0,
            include_primary_only: false,
        };
        let neighbors = vec!["PX002".to_string()];
        let expected = predict_activity_search(&world, "PX001", &neighbors, &query).unwrap();
        assert_eq!(expected.results.len(), 1);
        assert!(!expected.results[0].is_primary);
        let contact = expected.results[0].primary_server.as_ref().unwrap();
        assert_eq!(contact.primary_port, 20021);
        assert_eq!(expected.covered_servers.len(), 2);
    }
}
