//! The command executor.

use crate::{EngineError, EngineResult};
use geosim_client::{cancel_hosting, register_identity, ProximitySession};
use geosim_loc::LocServer;
use geosim_predict::WildcardFilter;
use geosim_scenario::{
    Command, CreateActivities, CreateIdentities, CreateServers, ServerRange,
};
use geosim_supervisor::{ServerHost, SimPaths};
use geosim_types::{
    ActivityInfo, GpsLocation, IdentityKeys, ProfileInfo, ServerKind, SharedServer,
};
use geosim_wire::info::{activity_to_wire, sign_activity};
use geosim_world::{ActivityRecord, IdentityRecord, WorldModel};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Live handles of one managed server.
pub(crate) struct ServerRuntime {
    pub loc: LocServer,
    pub host: ServerHost,
}

/// Outcome counters of a finished scenario.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    /// Commands executed to completion.
    pub commands_executed: usize,
    /// Test queries skipped because their target was uninitialized.
    pub queries_skipped: usize,
}

/// One simulation: the world model, the per-server runtime handles, and
/// the process-wide RNG.
pub struct Simulation {
    pub(crate) world: WorldModel,
    pub(crate) runtime: HashMap<String, ServerRuntime>,
    pub(crate) paths: SimPaths,
    pub(crate) rng: StdRng,
    pub(crate) debug: bool,
    pub(crate) queries_skipped: usize,
    image_files: Option<Vec<PathBuf>>,
}

impl Simulation {
    /// Create a simulation rooted at `paths`.
    ///
    /// With a seed, every location, image choice and lifetime draw is
    /// reproducible; without one the RNG seeds from entropy.
    pub fn new(paths: SimPaths, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            world: WorldModel::new(),
            runtime: HashMap::new(),
            paths,
            rng,
            debug: false,
            queries_skipped: 0,
            image_files: None,
        }
    }

    /// The ground-truth tables.
    pub fn world(&self) -> &WorldModel {
        &self.world
    }

    /// Execute a parsed scenario, aborting on the first failure.
    pub async fn run(&mut self, commands: &[Command]) -> EngineResult<RunSummary> {
        let mut summary = RunSummary::default();
        for (index, command) in commands.iter().enumerate() {
            let step = index + 1;
            info!(step = step, command = command.keyword(), "executing");
            self.execute(command)
                .await
                .map_err(|source| EngineError::CommandFailed {
                    step,
                    keyword: command.keyword(),
                    source: Box::new(source),
                })?;
            summary.commands_executed += 1;
        }
        summary.queries_skipped = self.queries_skipped;
        Ok(summary)
    }

    /// Stop everything: LOC servers first, then the children, reporting
    /// error and warning lines found in the instance logs.
    pub async fn shutdown(&mut self) {
        for (name, runtime) in &mut self.runtime {
            runtime.loc.shutdown().await;
            if runtime.host.is_running() {
                if let Err(e) = runtime.host.stop().await {
                    warn!(server = %name, error = %e, "stop during shutdown failed");
                }
            }
            match runtime.host.scan_logs() {
                Ok(stats) if stats.errors > 0 || stats.warnings > 0 => {
                    warn!(
                        server = %name,
                        errors = stats.errors,
                        warnings = stats.warnings,
                        "instance logs contain failures"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(server = %name, error = %e, "log scan failed"),
            }
        }
        self.runtime.clear();
    }

    async fn execute(&mut self, command: &Command) -> EngineResult<()> {
        match command {
            Command::ProfileServer(create) => {
                self.create_servers(ServerKind::Profile, create).await
            }
            Command::ProximityServer(create) => {
                self.create_servers(ServerKind::Proximity, create).await
            }
            Command::StartServer(range) => self.start_servers(range).await,
            Command::StopServer(range) => self.stop_servers(range).await,
            Command::Neighborhood(ranges) => self.neighborhood(ranges, false).await,
            Command::CancelNeighborhood(ranges) => self.neighborhood(ranges, true).await,
            Command::Neighbor { source, targets } => {
                self.neighbor(source, targets, false).await
            }
            Command::CancelNeighbor { source, targets } => {
                self.neighbor(source, targets, true).await
            }
            Command::Identity(create) => self.create_identities(create).await,
            Command::CancelIdentity { name, index, count } => {
                self.cancel_identities(name, *index, *count).await
            }
            Command::Activity(create) => self.create_activities(create).await,
            Command::DeleteActivity { name, index, count } => {
                self.delete_activities(name, *index, *count).await
            }
            Command::TestQuery(query) => self.test_query(query).await,
            Command::TestQueryActivity(query) => self.test_query_activity(query).await,
            Command::Delay { seconds } => {
                sleep(Duration::from_secs_f64(*seconds)).await;
                Ok(())
            }
            Command::TakeSnapshot { name } => self.take_snapshot(name).await,
            Command::LoadSnapshot { name } => self.load_snapshot(name).await,
            Command::DebugMode { enabled } => {
                self.debug = *enabled;
                Ok(())
            }
        }
    }

    async fn create_servers(
        &mut self,
        kind: ServerKind,
        create: &CreateServers,
    ) -> EngineResult<()> {
        let mut locations = Vec::with_capacity(create.count as usize);
        for _ in 0..create.count {
            locations.push(self.random_location(create.location, create.radius)?);
        }
        let names =
            self.world
                .create_servers(&create.group, kind, create.count, create.base_port, locations)?;

        for name in &names {
            let shared = self.world.server(name)?.shared.clone();
            let host = ServerHost::new(shared.clone(), &self.paths);
            host.init_instance(&self.paths)?;
            let loc = LocServer::start(shared, host.marker_receiver()).await?;
            self.runtime
                .insert(name.clone(), ServerRuntime { loc, host });
        }
        info!(group = %create.group, count = create.count, kind = %kind, "servers created");
        Ok(())
    }

    async fn start_servers(&mut self, range: &ServerRange) -> EngineResult<()> {
        let names = self
            .world
            .resolve_servers(&range.group, range.index, range.count)?;
        for name in names {
            let runtime = self
                .runtime
                .get_mut(&name)
                .ok_or_else(|| geosim_world::WorldError::MissingRecord(name.clone()))?;
            runtime.host.start().await?;
            self.world.server_mut(&name)?.is_running = true;
        }
        Ok(())
    }

    async fn stop_servers(&mut self, range: &ServerRange) -> EngineResult<()> {
        let names = self
            .world
            .resolve_servers(&range.group, range.index, range.count)?;
        for name in names {
            let runtime = self
                .runtime
                .get_mut(&name)
                .ok_or_else(|| geosim_world::WorldError::MissingRecord(name.clone()))?;
            runtime.host.stop().await?;
            self.world.server_mut(&name)?.is_running = false;
        }
        Ok(())
    }

    /// Wire every server of the resolved set to every other (or unwire,
    /// when `cancel`).
    async fn neighborhood(&mut self, ranges: &[ServerRange], cancel: bool) -> EngineResult<()> {
        let mut names: Vec<String> = Vec::new();
        for range in ranges {
            for name in self
                .world
                .resolve_servers(&range.group, range.index, range.count)?
            {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }

        let handles: Vec<(String, SharedServer)> = names
            .iter()
            .map(|name| Ok((name.clone(), self.world.server(name)?.shared.clone())))
            .collect::<EngineResult<_>>()?;

        for name in &names {
            let peers: Vec<SharedServer> = handles
                .iter()
                .filter(|(peer, _)| peer != name)
                .map(|(_, shared)| shared.clone())
                .collect();
            let runtime = self
                .runtime
                .get(name)
                .ok_or_else(|| geosim_world::WorldError::MissingRecord(name.clone()))?;
            if cancel {
                runtime.loc.cancel_neighborhood(&peers).await;
            } else {
                runtime.loc.add_neighborhood(&peers).await;
            }
        }
        Ok(())
    }

    /// Directed neighbor edges from one named server to others.
    async fn neighbor(
        &mut self,
        source: &str,
        targets: &[String],
        cancel: bool,
    ) -> EngineResult<()> {
        let peers: Vec<SharedServer> = targets
            .iter()
            .map(|name| Ok(self.world.server(name)?.shared.clone()))
            .collect::<EngineResult<_>>()?;
        let runtime = self
            .runtime
            .get(source)
            .ok_or_else(|| geosim_world::WorldError::MissingRecord(source.to_string()))?;
        if cancel {
            runtime.loc.cancel_neighborhood(&peers).await;
        } else {
            runtime.loc.add_neighborhood(&peers).await;
        }
        Ok(())
    }

    async fn create_identities(&mut self, create: &CreateIdentities) -> EngineResult<()> {
        let servers = self.world.resolve_servers(
            &create.servers.group,
            create.servers.index,
            create.servers.count,
        )?;
        let available = self.world.total_identity_slots(&servers)?;
        if available < create.create_count {
            return Err(geosim_world::WorldError::InsufficientCapacity {
                need: create.create_count,
                available,
            }
            .into());
        }

        let start_position = self
            .world
            .identity_groups()
            .get(&create.name)
            .map(|members| members.len())
            .unwrap_or(0);

        for i in 0..create.create_count {
            let name = format!("{}{:05}", create.name, start_position as u32 + i + 1);

            // Uniform over the currently non-full servers.
            let mut candidates = Vec::new();
            for server in &servers {
                if self.world.server(server)?.available_slots() > 0 {
                    candidates.push(server.clone());
                }
            }
            let host_name = candidates[self.rng.gen_range(0..candidates.len())].clone();

            let location = self.random_location(create.location, create.radius)?;
            let mut profile = ProfileInfo::new(&name, &create.identity_type, location);
            if self.rng.gen_range(0..100) < create.profile_image_chance {
                profile = profile.with_profile_image(self.pick_image(&create.profile_image_mask)?);
            }
            if self.rng.gen_range(0..100) < create.thumbnail_chance {
                profile = profile.with_thumbnail(self.pick_image(&create.thumbnail_mask)?);
            }
            let keys = IdentityKeys::generate(&mut self.rng);

            let (non_customer_port, customer_port) = {
                let record = self.world.server(&host_name)?;
                let inner = record.shared.lock();
                (inner.client_port(), inner.customer_port())
            };
            register_identity(
                non_customer_port,
                customer_port,
                &keys,
                &profile,
                unix_now(),
                &mut self.rng,
            )
            .await?;

            self.world.add_identity(IdentityRecord {
                name: name.clone(),
                group: create.name.clone(),
                keys,
                primary_profile: profile.clone(),
                propagated_profile: profile,
                host_server: host_name,
                profile_initialized: true,
                hosting_active: true,
            })?;
            debug!(identity = %name, "identity hosted");
        }
        info!(group = %create.name, count = create.create_count, "identities created");
        Ok(())
    }

    async fn cancel_identities(&mut self, name: &str, index: u32, count: u32) -> EngineResult<()> {
        let identities = self.world.resolve_identities(name, index, count)?;
        for identity_name in identities {
            let (customer_port, keys, host_server) = {
                let identity = self.world.identity(&identity_name)?;
                let host = self.world.server(&identity.host_server)?;
                let port = host.shared.lock().customer_port();
                (port, identity.keys.clone(), identity.host_server.clone())
            };
            cancel_hosting(customer_port, &keys, &mut self.rng).await?;

            let identity = self.world.identity_mut(&identity_name)?;
            identity.hosting_active = false;
            if let geosim_world::ServerPayload::Profile {
                available_slots,
                hosted,
            } = &mut self.world.server_mut(&host_server)?.payload
            {
                hosted.retain(|hosted_name| hosted_name != &identity_name);
                *available_slots += 1;
            }
            debug!(identity = %identity_name, "hosting cancelled");
        }
        Ok(())
    }

    async fn create_activities(&mut self, create: &CreateActivities) -> EngineResult<()> {
        let owners = self.world.resolve_identities(
            &create.owners.group,
            create.owners.index,
            create.owners.count,
        )?;

        // Candidate primaries: every proximity server, with its location.
        let mut proximity: Vec<(String, GpsLocation)> = Vec::new();
        for record in self.world.servers() {
            if record.kind == ServerKind::Proximity {
                let inner = record.shared.lock();
                proximity.push((inner.name.clone(), inner.location));
            }
        }
        if proximity.is_empty() {
            return Err(geosim_world::WorldError::UnknownServerGroup(
                "no proximity servers".to_string(),
            )
            .into());
        }
        proximity.sort_by(|a, b| a.0.cmp(&b.0));

        let now = unix_now();
        struct Prepared {
            id: u32,
            owner: String,
            primary: String,
            info: ActivityInfo,
            signature: Vec<u8>,
        }
        let mut prepared: Vec<Prepared> = Vec::new();

        for _ in 0..create.create_count {
            let owner_name = owners[self.rng.gen_range(0..owners.len())].clone();
            let location = self.random_location(create.location, create.radius)?;
            let precision = self
                .rng
                .gen_range(create.precision_min..=create.precision_max);
            let start_offset = sample_range(&mut self.rng, create.start_from, create.start_to);
            let lifetime = sample_range(&mut self.rng, create.lifetime_from, create.lifetime_to);

            // Nearest proximity server by great-circle distance.
            let primary = proximity
                .iter()
                .min_by(|a, b| {
                    let da = a.1.distance_to(&location);
                    let db = b.1.distance_to(&location);
                    da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(name, _)| name.clone())
                .unwrap_or_default();

            let (keys, owner_contact) = {
                let owner = self.world.identity(&owner_name)?;
                let host = self.world.server(&owner.host_server)?;
                (owner.keys.clone(), host.shared.lock().contact())
            };

            let id = self.world.allocate_activity_id();
            let info = ActivityInfo {
                version: "1.0.0".to_string(),
                id,
                owner_identity_id: keys.identity_id(),
                owner_public_key: keys.public_key().to_vec(),
                owner_profile_server: owner_contact,
                activity_type: create.name.clone(),
                location,
                precision,
                start_time: now + i64::from(start_offset),
                expiration_time: now + i64::from(start_offset) + i64::from(lifetime),
                extra_data: String::new(),
            };
            let signature = sign_activity(&keys, &activity_to_wire(&info));
            prepared.push(Prepared {
                id,
                owner: owner_name,
                primary,
                info,
                signature,
            });
        }

        // Pre-check that no primary would be pushed over capacity.
        let mut per_primary: BTreeMap<String, u32> = BTreeMap::new();
        for item in &prepared {
            *per_primary.entry(item.primary.clone()).or_insert(0) += 1;
        }
        for (server, need) in &per_primary {
            if self.world.server(server)?.available_slots() < *need {
                return Err(geosim_world::WorldError::ActivityCapacity {
                    server: server.clone(),
                    need: *need,
                }
                .into());
            }
        }

        // One verified-identity session per (owner, primary) pair.
        let mut batches: BTreeMap<(String, String), Vec<Prepared>> = BTreeMap::new();
        for item in prepared {
            batches
                .entry((item.owner.clone(), item.primary.clone()))
                .or_default()
                .push(item);
        }

        for ((owner_name, primary_name), items) in batches {
            let keys = self.world.identity(&owner_name)?.keys.clone();
            let port = {
                let record = self.world.server(&primary_name)?;
                let inner = record.shared.lock();
                inner.client_port()
            };
            let mut session = ProximitySession::open(port, &keys, &mut self.rng).await?;
            for item in items {
                session
                    .create_activity(
                        activity_to_wire(&item.info),
                        item.signature.clone(),
                        Vec::new(),
                    )
                    .await?;
                self.world.add_activity(ActivityRecord {
                    id: item.id,
                    group: create.name.clone(),
                    primary_info: item.info.clone(),
                    propagated_info: item.info,
                    signature: item.signature,
                    owner: item.owner,
                    primary_server: item.primary,
                    hosting_active: true,
                })?;
            }
        }
        info!(group = %create.name, count = create.create_count, "activities created");
        Ok(())
    }

    async fn delete_activities(&mut self, name: &str, index: u32, count: u32) -> EngineResult<()> {
        let ids = self.world.resolve_activities(name, index, count)?;

        // Batch deletions per (owner, primary) like creation.
        let mut batches: BTreeMap<(String, String), Vec<u32>> = BTreeMap::new();
        for id in ids {
            let record = self.world.activity(id)?;
            batches
                .entry((record.owner.clone(), record.primary_server.clone()))
                .or_default()
                .push(id);
        }

        for ((owner_name, primary_name), ids) in batches {
            let keys = self.world.identity(&owner_name)?.keys.clone();
            let port = {
                let record = self.world.server(&primary_name)?;
                let inner = record.shared.lock();
                inner.client_port()
            };
            let mut session = ProximitySession::open(port, &keys, &mut self.rng).await?;
            for id in ids {
                session.delete_activity(id).await?;
                self.world.remove_activity(id)?;
                debug!(activity = id, "activity deleted");
            }
        }
        Ok(())
    }

    /// Uniform point in the disc around `center`.
    pub(crate) fn random_location(
        &mut self,
        center: GpsLocation,
        radius: u32,
    ) -> EngineResult<GpsLocation> {
        if radius == 0 {
            return Ok(center);
        }
        let bearing = self.rng.gen_range(0.0..360.0);
        let distance = self.rng.gen_range(0.0..=f64::from(radius));
        Ok(center.destination(bearing, distance))
    }

    fn pick_image(&mut self, mask: &str) -> EngineResult<Vec<u8>> {
        let candidates = self.image_candidates(mask)?;
        if candidates.is_empty() {
            return Err(EngineError::NoMatchingImage {
                dir: self.paths.images_dir().display().to_string(),
                mask: mask.to_string(),
            });
        }
        let path = &candidates[self.rng.gen_range(0..candidates.len())];
        Ok(std::fs::read(path)?)
    }

    fn image_candidates(&mut self, mask: &str) -> EngineResult<Vec<PathBuf>> {
        if self.image_files.is_none() {
            let dir = self.paths.images_dir();
            let mut files = Vec::new();
            if dir.exists() {
                for entry in std::fs::read_dir(&dir)? {
                    let entry = entry?;
                    if entry.file_type()?.is_file() {
                        files.push(entry.path());
                    }
                }
            }
            files.sort();
            self.image_files = Some(files);
        }
        let filter = WildcardFilter::parse(mask);
        let files = self.image_files.as_ref().map(Vec::as_slice).unwrap_or(&[]);
        Ok(files
            .iter()
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| filter.matches(name))
            })
            .cloned()
            .collect())
    }
}

/// Uniform draw from `[from, to)`, degenerating to `from` when empty.
fn sample_range(rng: &mut StdRng, from: i32, to: i32) -> i32 {
    if from < to {
        rng.gen_range(from..to)
    } else {
        from
    }
}

/// Current unix time in seconds.
pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn simulation(seed: u64) -> (Simulation, TempDir) {
        let tmp = TempDir::new().unwrap();
        let sim = Simulation::new(SimPaths::new(tmp.path()), Some(seed));
        (sim, tmp)
    }

    #[test]
    fn random_locations_stay_inside_the_disc() {
        let (mut sim, _tmp) = simulation(1);
        let center = GpsLocation::new(10.0, 20.0).unwrap();
        for _ in 0..200 {
            let point = sim.random_location(center, 50_000).unwrap();
            assert!(center.distance_to(&point) <= 50_001.0);
        }
    }

    #[test]
    fn zero_radius_pins_the_center() {
        let (mut sim, _tmp) = simulation(1);
        let center = GpsLocation::new(10.0, 20.0).unwrap();
        assert_eq!(sim.random_location(center, 0).unwrap(), center);
    }

    #[test]
    fn seeded_rng_reproduces_draws() {
        let center = GpsLocation::new(10.0, 20.0).unwrap();
        let (mut a, _ta) = simulation(99);
        let (mut b, _tb) = simulation(99);
        for _ in 0..32 {
            assert_eq!(
                a.random_location(center, 10_000).unwrap(),
                b.random_location(center, 10_000).unwrap()
            );
        }
    }

    #[test]
    fn sample_range_handles_degenerate_interval() {
        let mut rng = StdRng::seed_from_u64(4);
        assert_eq!(sample_range(&mut rng, 5, 5), 5);
        for _ in 0..50 {
            let v = sample_range(&mut rng, -10, 10);
            assert!((-10..10).contains(&v));
        }
    }

    #[tokio::test]
    async fn image_mask_filters_candidates() {
        let (mut sim, tmp) = simulation(1);
        let images = tmp.path().join("images");
        std::fs::create_dir_all(&images).unwrap();
        std::fs::write(images.join("cat.jpg"), b"jpg").unwrap();
        std::fs::write(images.join("dog.png"), b"png").unwrap();

        let jpgs = sim.image_candidates("*.jpg").unwrap();
        assert_eq!(jpgs.len(), 1);
        let all = sim.image_candidates("*").unwrap();
        assert_eq!(all.len(), 2);

        let bytes = sim.pick_image("*.png").unwrap();
        assert_eq!(bytes, b"png");
    }
}
