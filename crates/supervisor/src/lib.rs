//! Child-process lifecycle for managed servers
//!
//! For every managed server the supervisor populates a per-instance
//! directory from a binary template, synthesises the server's
//! configuration file and TLS material, launches the executable with
//! redirected stdio, watches stdout for the readiness marker, and stops
//! the child with a newline-then-kill escalation. It also scans instance
//! logs for error and warning lines after a run.

mod config;
mod host;
mod paths;

pub use config::render_config;
pub use host::{LogStats, ServerHost, SupervisorError, SupervisorResult};
pub use paths::SimPaths;
