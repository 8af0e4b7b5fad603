//! Scenario orchestrator
//!
//! Executes parsed scenario commands one at a time against the world
//! model and the running child processes. Any command failure aborts the
//! scenario. The snapshot engine, which freezes and rehydrates the whole
//! simulation, also lives here.

mod query;
mod sim;
mod snapshot;

pub use sim::{RunSummary, Simulation};

use geosim_client::ClientError;
use geosim_loc::LocError;
use geosim_predict::CompareError;
use geosim_supervisor::SupervisorError;
use geosim_world::snapshot::SnapshotError;
use geosim_world::WorldError;
use thiserror::Error;

/// Errors aborting a scenario run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Scenario referenced something the world model does not have, or a
    /// capacity pre-check failed.
    #[error("world error: {0}")]
    World(#[from] WorldError),

    /// A LOC server failed to start or stop.
    #[error("loc error: {0}")]
    Loc(#[from] LocError),

    /// A child process failed to start, become ready, or stop.
    #[error("supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    /// A client protocol exchange failed.
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    /// Snapshot records could not be rebuilt.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Snapshot file I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot JSON could not be read or written.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A test query did not match its prediction.
    #[error("test query against {server} failed: {source}")]
    QueryMismatch {
        server: String,
        #[source]
        source: CompareError,
    },

    /// No image file matches the scenario's mask.
    #[error("no image in {dir} matches mask '{mask}'")]
    NoMatchingImage { dir: String, mask: String },

    /// Wrapper carrying the failing command's position.
    #[error("command {step} ({keyword}) failed: {source}")]
    CommandFailed {
        step: usize,
        keyword: &'static str,
        #[source]
        source: Box<EngineError>,
    },
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
