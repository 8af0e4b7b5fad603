//! On-disk layout of the simulator's working directory.

use geosim_types::ServerKind;
use std::path::{Path, PathBuf};

/// All simulator paths, derived from one working directory.
///
/// ```text
/// <work_dir>/bin/ProfileServer/    binary template, copied per instance
/// <work_dir>/bin/ProximityServer/
/// <work_dir>/images/               candidate profile/thumbnail images
/// <work_dir>/instances/Ps-<name>/  per-instance runtime directories
/// <work_dir>/snapshots/<name>/     snapshot state + binary copies
/// ```
#[derive(Debug, Clone)]
pub struct SimPaths {
    work_dir: PathBuf,
}

impl SimPaths {
    /// Root all paths at `work_dir`.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    /// The working directory itself.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Binary template directory for a server kind.
    pub fn template_dir(&self, kind: ServerKind) -> PathBuf {
        self.work_dir.join("bin").join(binary_name(kind))
    }

    /// Directory of candidate profile and thumbnail images.
    pub fn images_dir(&self) -> PathBuf {
        self.work_dir.join("images")
    }

    /// Parent of all instance directories.
    pub fn instances_dir(&self) -> PathBuf {
        self.work_dir.join("instances")
    }

    /// Runtime directory of one server instance.
    pub fn instance_dir(&self, kind: ServerKind, name: &str) -> PathBuf {
        let prefix = match kind {
            ServerKind::Profile => "Ps",
            ServerKind::Proximity => "Px",
        };
        self.instances_dir().join(format!("{prefix}-{name}"))
    }

    /// Directory of one named snapshot.
    pub fn snapshot_dir(&self, name: &str) -> PathBuf {
        self.work_dir.join("snapshots").join(name)
    }
}

/// Executable and template directory name for a server kind.
pub fn binary_name(kind: ServerKind) -> &'static str {
    match kind {
        ServerKind::Profile => "ProfileServer",
        ServerKind::Proximity => "ProximityServer",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_dirs_are_prefixed_by_kind() {
        let paths = SimPaths::new("/tmp/sim");
        assert!(paths
            .instance_dir(ServerKind::Profile, "A001")
            .ends_with("instances/Ps-A001"));
        assert!(paths
            .instance_dir(ServerKind::Proximity, "PX001")
            .ends_with("instances/Px-PX001"));
    }
}
