//! Snapshot engine: freeze the whole simulation to disk and rehydrate it.

use crate::sim::{ServerRuntime, Simulation};
use crate::EngineResult;
use geosim_loc::LocServer;
use geosim_supervisor::ServerHost;
use geosim_types::SharedServer;
use geosim_world::snapshot::{
    ActivitySnapshot, IdentitySnapshot, ImagePool, ServerSnapshot, SnapshotData,
};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

const PROFILE_SERVERS_FILE: &str = "ProfileServers.json";
const PROXIMITY_SERVERS_FILE: &str = "ProximityServers.json";
const IDENTITIES_FILE: &str = "Identities.json";
const ACTIVITIES_FILE: &str = "Activities.json";
const IMAGES_FILE: &str = "Images.json";

/// Instance subdirectories excluded from snapshot copies.
const COPY_EXCLUDES: &[&str] = &["Logs", "tmp"];

impl Simulation {
    /// `TakeSnapshot`: stop every running child, persist the logical
    /// state, and copy the instance directories. The simulation is left
    /// stopped; resuming is not implicit.
    pub(crate) async fn take_snapshot(&mut self, name: &str) -> EngineResult<()> {
        // Neighbor sets and running flags are captured before the children
        // stop; the stop flips initialization state, which the children
        // re-establish themselves on restart after a load.
        let mut neighbors = HashMap::new();
        for (server, runtime) in &self.runtime {
            neighbors.insert(server.clone(), runtime.loc.neighbor_names());
        }

        for (server, runtime) in &mut self.runtime {
            if runtime.host.is_running() {
                info!(server = %server, "stopping for snapshot");
                runtime.host.stop().await?;
            }
        }

        let data = SnapshotData::capture(&self.world, &neighbors);

        let dir = self.paths.snapshot_dir(name);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;

        write_json(&dir.join(PROFILE_SERVERS_FILE), &data.profile_servers)?;
        write_json(&dir.join(PROXIMITY_SERVERS_FILE), &data.proximity_servers)?;
        write_json(&dir.join(IDENTITIES_FILE), &data.identities)?;
        write_json(&dir.join(ACTIVITIES_FILE), &data.activities)?;
        write_json(&dir.join(IMAGES_FILE), &data.images)?;

        // Per-instance binary directories, logs and scratch excluded.
        let bin_dir = dir.join("bin");
        for (server, runtime) in &self.runtime {
            let src = runtime.host.instance_dir();
            if src.exists() {
                copy_dir_excluding(src, &bin_dir.join(server), COPY_EXCLUDES)?;
            }
        }

        info!(snapshot = %name, dir = %dir.display(), "snapshot taken");
        Ok(())
    }

    /// `LoadSnapshot`: rebuild the world model, instance directories, LOC
    /// servers and neighbor maps, then restart the children that were
    /// running at capture time.
    pub(crate) async fn load_snapshot(&mut self, name: &str) -> EngineResult<()> {
        let dir = self.paths.snapshot_dir(name);
        let profile_servers: Vec<ServerSnapshot> = read_json(&dir.join(PROFILE_SERVERS_FILE))?;
        let proximity_servers: Vec<ServerSnapshot> =
            read_json(&dir.join(PROXIMITY_SERVERS_FILE))?;
        let identities: Vec<IdentitySnapshot> = read_json(&dir.join(IDENTITIES_FILE))?;
        let activities: Vec<ActivitySnapshot> = read_json(&dir.join(ACTIVITIES_FILE))?;
        let images: ImagePool = read_json(&dir.join(IMAGES_FILE))?;

        let data = SnapshotData {
            profile_servers,
            proximity_servers,
            identities,
            activities,
            images,
        };
        let (world, neighbor_names) = data.restore()?;
        self.world = world;

        // Instance directories come back from the snapshot's bin/ copies.
        let bin_dir = dir.join("bin");
        let mut server_names: Vec<String> = Vec::new();
        for record in self.world.servers() {
            server_names.push(record.shared.name());
        }
        server_names.sort();

        for server in &server_names {
            let (kind, shared) = {
                let record = self.world.server(server)?;
                (record.kind, record.shared.clone())
            };
            let instance_dir = self.paths.instance_dir(kind, server);
            let saved = bin_dir.join(server);
            if saved.exists() {
                if instance_dir.exists() {
                    std::fs::remove_dir_all(&instance_dir)?;
                }
                copy_dir_excluding(&saved, &instance_dir, &[])?;
            } else {
                warn!(server = %server, "no saved instance directory in snapshot");
            }

            let host = ServerHost::new(shared.clone(), &self.paths);
            // Re-create the scratch directories the copy excluded.
            for sub in COPY_EXCLUDES {
                std::fs::create_dir_all(instance_dir.join(sub))?;
            }
            let loc = LocServer::start(shared, host.marker_receiver()).await?;
            self.runtime
                .insert(server.clone(), ServerRuntime { loc, host });
        }

        // Neighborhood maps are replaced wholesale; no notifications.
        for server in &server_names {
            let names = neighbor_names.get(server).cloned().unwrap_or_default();
            let mut peers: Vec<SharedServer> = Vec::with_capacity(names.len());
            for peer in &names {
                peers.push(self.world.server(peer)?.shared.clone());
            }
            if let Some(runtime) = self.runtime.get(server) {
                runtime.loc.set_neighborhood(peers);
            }
        }

        // Children recorded as running come back up.
        let mut running: Vec<String> = Vec::new();
        for record in self.world.servers() {
            if record.is_running {
                running.push(record.shared.name());
            }
        }
        running.sort();
        for server in &running {
            if let Some(runtime) = self.runtime.get_mut(server) {
                info!(server = %server, "restarting from snapshot");
                runtime.host.start().await?;
            }
        }

        info!(snapshot = %name, servers = server_names.len(), "snapshot loaded");
        Ok(())
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> EngineResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> EngineResult<T> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn copy_dir_excluding(src: &Path, dst: &Path, excludes: &[&str]) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if excludes
            .iter()
            .any(|excluded| file_name.to_string_lossy() == *excluded)
        {
            continue;
        }
        let target = dst.join(&file_name);
        if entry.file_type()?.is_dir() {
            copy_dir_excluding(&entry.path(), &target, excludes)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn copy_excludes_listed_directories() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(src.join("Logs")).unwrap();
        std::fs::create_dir_all(src.join("data")).unwrap();
        std::fs::write(src.join("config"), b"x").unwrap();
        std::fs::write(src.join("Logs/server.log"), b"log").unwrap();
        std::fs::write(src.join("data/db"), b"db").unwrap();

        let dst = tmp.path().join("dst");
        copy_dir_excluding(&src, &dst, &["Logs", "tmp"]).unwrap();

        assert!(dst.join("config").exists());
        assert!(dst.join("data/db").exists());
        assert!(!dst.join("Logs").exists());
    }
}
